//! Server configuration loaded from a TOML file.
//!
//! Every section and key is optional; a missing file means "all
//! defaults". Command-line flags are applied on top by the binary.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:4000"
//! max_sessions = 10000
//! idle_timeout_secs = 0
//! reject_spoofed_sender = false
//!
//! [negotiation]
//! request_ttl_secs = 300
//! sweep_interval_secs = 30
//!
//! [store]
//! kind = "file"
//! data_dir = "parley-data"
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_negotiation::NegotiationConfig;
use parley_session::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::server::{HandlerConfig, ParleyServerBuilder};
use crate::ParleyError;

/// Root of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub negotiation: NegotiationSection,

    #[serde(default)]
    pub store: StoreSection,
}

/// `[server]`: listener and per-connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to listen on.
    pub bind: String,
    /// Maximum simultaneously bound identities. 0 means unlimited.
    pub max_sessions: usize,
    /// Close connections that stay silent this long. 0 disables.
    pub idle_timeout_secs: u64,
    /// Treat a `sender_id` that differs from the session identity as a
    /// protocol violation instead of silently overriding it.
    pub reject_spoofed_sender: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4000".to_string(),
            max_sessions: SessionConfig::default().max_sessions,
            idle_timeout_secs: 0,
            reject_spoofed_sender: false,
        }
    }
}

/// `[negotiation]`: chat-request expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationSection {
    /// Seconds before an unanswered request is dropped. 0 disables.
    pub request_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for NegotiationSection {
    fn default() -> Self {
        let defaults = NegotiationConfig::default();
        Self {
            request_ttl_secs: defaults.request_ttl.as_secs(),
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
        }
    }
}

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Nothing survives a restart.
    Memory,
    /// `users.json` and `messages.jsonl` under `data_dir`.
    #[default]
    File,
}

/// `[store]`: persistence backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub kind: StoreKind,
    pub data_dir: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            kind: StoreKind::File,
            data_dir: PathBuf::from("parley-data"),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration at `path`. A missing file yields defaults.
    ///
    /// # Errors
    /// [`ParleyError::Config`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ParleyError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ParleyError::Config {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
            }
        };
        Self::from_toml(&content).map_err(|message| ParleyError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_sessions: self.server.max_sessions,
        }
    }

    pub fn negotiation_config(&self) -> NegotiationConfig {
        NegotiationConfig {
            request_ttl: Duration::from_secs(self.negotiation.request_ttl_secs),
            // A zero interval would make the sweeper spin.
            sweep_interval: Duration::from_secs(self.negotiation.sweep_interval_secs.max(1)),
        }
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            idle_timeout: match self.server.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            reject_spoofed_sender: self.server.reject_spoofed_sender,
        }
    }

    /// Returns a server builder populated from this configuration.
    pub fn builder(&self) -> ParleyServerBuilder {
        ParleyServerBuilder::new()
            .bind(&self.server.bind)
            .session_config(self.session_config())
            .negotiation_config(self.negotiation_config())
            .handler_config(self.handler_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml_empty_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.server.bind, "127.0.0.1:4000");
        assert_eq!(config.store.kind, StoreKind::File);
    }

    #[test]
    fn test_from_toml_partial_section_keeps_other_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            [server]
            bind = "0.0.0.0:5000"

            [store]
            kind = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:5000");
        assert_eq!(config.server.max_sessions, 10_000);
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.negotiation.request_ttl_secs, 300);
    }

    #[test]
    fn test_from_toml_unknown_store_kind_fails() {
        let result = ServerConfig::from_toml("[store]\nkind = \"postgres\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_handler_config_zero_idle_timeout_is_disabled() {
        let config = ServerConfig::default();
        assert_eq!(config.handler_config().idle_timeout, None);

        let config = ServerConfig::from_toml("[server]\nidle_timeout_secs = 7\n").unwrap();
        assert_eq!(
            config.handler_config().idle_timeout,
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_negotiation_config_zero_sweep_interval_is_clamped() {
        let config = ServerConfig::from_toml(
            "[negotiation]\nrequest_ttl_secs = 0\nsweep_interval_secs = 0\n",
        )
        .unwrap();
        let negotiation = config.negotiation_config();
        assert!(!negotiation.expires());
        assert_eq!(negotiation.sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_load_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "[server\nbind = 1").unwrap();

        let err = ServerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ParleyError::Config { .. }));
        assert!(err.to_string().contains("parley.toml"));
    }
}
