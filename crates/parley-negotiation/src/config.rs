//! Negotiation configuration.

use std::time::Duration;

/// Settings for the pending-request table.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// How long a request may stay unanswered before it is dropped.
    ///
    /// Default: 5 minutes. `Duration::ZERO` keeps requests until they are
    /// answered or the initiator goes away.
    pub request_ttl: Duration,

    /// How often the server sweeps the table for expired requests.
    /// Expired requests are also ignored lazily on resolve, so this only
    /// bounds memory, not correctness.
    pub sweep_interval: Duration,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            request_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl NegotiationConfig {
    /// Returns `true` if requests expire at all.
    pub fn expires(&self) -> bool {
        !self.request_ttl.is_zero()
    }
}
