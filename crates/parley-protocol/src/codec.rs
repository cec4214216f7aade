//! The fixed-width frame codec.
//!
//! A frame is a 48-byte text header followed by a raw body:
//!
//! ```text
//! [body_length: 4 digits][kind: 4 chars][sender_id: 20 digits][receiver_id: 20 digits][body]
//!  0005                   #S_M           00000000000000000001  00000000000000000002      hello
//! ```
//!
//! Numeric fields are zero-padded decimal. Twenty digits is exactly
//! enough for `u64::MAX`, so every identity fits.
//!
//! Reading happens in two steps because the body length is only known
//! after the header has been parsed: [`FrameCodec::decode_header`] on
//! the first 48 bytes, then [`FrameCodec::decode_body`] on the next
//! `body_length` bytes. Any error from either step is a protocol
//! violation; the codec never tries to find the next frame boundary
//! after a bad one.

use crate::{Identity, Message, MessageKind, ProtocolError};

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 48;

/// Largest body a frame can carry.
pub const MAX_BODY_LEN: usize = 512;

/// Width of the kind code.
pub const KIND_LEN: usize = 4;

const LENGTH_DIGITS: usize = 4;
const ID_DIGITS: usize = 20;

/// A decoded header, before the body has been read.
///
/// `kind` is the raw 4-character code. It is only checked against the
/// closed [`MessageKind`] set in [`FrameCodec::decode_body`], so that an
/// unknown code can still be reported back to the client by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub body_length: usize,
    pub kind: String,
    pub sender: Identity,
    pub receiver: Identity,
}

/// Encodes and decodes Parley frames.
///
/// Stateless; a unit struct so call sites read as `codec.encode(..)`
/// and the codec can be stored next to other server state.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Encodes a typed message into a complete frame.
    ///
    /// # Errors
    /// [`ProtocolError::BodyTooLarge`] if the body exceeds
    /// [`MAX_BODY_LEN`].
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        self.encode_parts(
            message.kind.code(),
            message.sender.0,
            message.receiver.0,
            &message.body,
        )
    }

    /// Encodes a frame from raw parts.
    ///
    /// This is the lower-level entry point used by [`encode`](Self::encode);
    /// it also lets tools emit codes outside the [`MessageKind`] set.
    ///
    /// # Errors
    /// - [`ProtocolError::BodyTooLarge`] if `body` exceeds [`MAX_BODY_LEN`]
    /// - [`ProtocolError::InvalidKind`] if `kind` is not exactly four
    ///   printable ASCII characters
    pub fn encode_parts(
        &self,
        kind: &str,
        sender: u64,
        receiver: u64,
        body: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        if body.len() > MAX_BODY_LEN {
            return Err(ProtocolError::BodyTooLarge(body.len()));
        }
        if !is_valid_kind(kind.as_bytes()) {
            return Err(ProtocolError::InvalidKind(kind.to_string()));
        }

        let header = format!(
            "{:0len$}{kind}{sender:0id$}{receiver:0id$}",
            body.len(),
            len = LENGTH_DIGITS,
            id = ID_DIGITS,
        );
        debug_assert_eq!(header.len(), HEADER_LEN);

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(body);
        Ok(frame)
    }

    /// Parses the fixed 48-byte header.
    ///
    /// # Errors
    /// - [`ProtocolError::HeaderLength`] if `bytes` is not 48 bytes long
    /// - [`ProtocolError::InvalidNumber`] for non-numeric or overflowing
    ///   length/id fields
    /// - [`ProtocolError::InvalidKind`] for a kind field that is not
    ///   printable ASCII
    /// - [`ProtocolError::BodyTooLarge`] if the declared length exceeds
    ///   [`MAX_BODY_LEN`]
    pub fn decode_header(&self, bytes: &[u8]) -> Result<Header, ProtocolError> {
        if bytes.len() != HEADER_LEN {
            return Err(ProtocolError::HeaderLength(bytes.len()));
        }

        let (length_field, rest) = bytes.split_at(LENGTH_DIGITS);
        let (kind_field, rest) = rest.split_at(KIND_LEN);
        let (sender_field, receiver_field) = rest.split_at(ID_DIGITS);

        let body_length = parse_number("body_length", length_field)? as usize;
        if !is_valid_kind(kind_field) {
            return Err(ProtocolError::InvalidKind(
                String::from_utf8_lossy(kind_field).into_owned(),
            ));
        }
        let sender = parse_number("sender_id", sender_field)?;
        let receiver = parse_number("receiver_id", receiver_field)?;

        if body_length > MAX_BODY_LEN {
            return Err(ProtocolError::BodyTooLarge(body_length));
        }

        Ok(Header {
            body_length,
            // Checked above: four printable ASCII bytes are valid UTF-8.
            kind: String::from_utf8_lossy(kind_field).into_owned(),
            sender: Identity(sender),
            receiver: Identity(receiver),
        })
    }

    /// Combines a decoded header with the body bytes that followed it.
    ///
    /// # Errors
    /// - [`ProtocolError::BodyLengthMismatch`] if `body` is not exactly
    ///   `header.body_length` bytes
    /// - [`ProtocolError::UnknownKind`] if the header's code is not a
    ///   [`MessageKind`]
    pub fn decode_body(
        &self,
        header: &Header,
        body: Vec<u8>,
    ) -> Result<Message, ProtocolError> {
        if body.len() != header.body_length {
            return Err(ProtocolError::BodyLengthMismatch {
                declared: header.body_length,
                actual: body.len(),
            });
        }
        let kind = MessageKind::from_code(&header.kind)
            .ok_or_else(|| ProtocolError::UnknownKind(header.kind.clone()))?;

        Ok(Message {
            kind,
            sender: header.sender,
            receiver: header.receiver,
            body,
        })
    }

    /// Decodes one complete frame held in a single buffer.
    ///
    /// Convenience for callers that already have the whole frame, such
    /// as test clients. Trailing bytes beyond the declared body count as
    /// a length mismatch.
    pub fn decode(&self, frame: &[u8]) -> Result<Message, ProtocolError> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::HeaderLength(frame.len()));
        }
        let (head, body) = frame.split_at(HEADER_LEN);
        let header = self.decode_header(head)?;
        self.decode_body(&header, body.to_vec())
    }
}

fn is_valid_kind(kind: &[u8]) -> bool {
    kind.len() == KIND_LEN && kind.iter().all(u8::is_ascii_graphic)
}

/// Parses a fixed-width decimal field.
///
/// Leading spaces are tolerated so that peers padding with
/// `printf("%4d")` still interoperate; encode always zero-pads.
fn parse_number(field: &'static str, raw: &[u8]) -> Result<u64, ProtocolError> {
    let invalid = || ProtocolError::InvalidNumber {
        field,
        value: String::from_utf8_lossy(raw).into_owned(),
    };

    let start = raw.iter().position(|b| *b != b' ').ok_or_else(invalid)?;
    let digits = &raw[start..];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    // All bytes are ASCII digits at this point, so only overflow can fail.
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(invalid)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec
    }

    fn header_bytes(len: &str, kind: &str, sender: &str, receiver: &str) -> Vec<u8> {
        format!("{len}{kind}{sender}{receiver}").into_bytes()
    }

    // =====================================================================
    // encode
    // =====================================================================

    #[test]
    fn test_encode_layout_is_zero_padded() {
        let msg = Message::new(
            MessageKind::SendMessage,
            Identity(1),
            Identity(2),
            b"hi".to_vec(),
        );
        let frame = codec().encode(&msg).unwrap();

        assert_eq!(frame.len(), HEADER_LEN + 2);
        assert_eq!(
            &frame[..HEADER_LEN],
            b"0002#S_M0000000000000000000100000000000000000002"
        );
        assert_eq!(&frame[HEADER_LEN..], b"hi");
    }

    #[test]
    fn test_encode_max_identity_fits_header() {
        let frame = codec()
            .encode_parts("#C_C", u64::MAX, u64::MAX, b"")
            .unwrap();
        assert_eq!(frame.len(), HEADER_LEN);
        let header = codec().decode_header(&frame).unwrap();
        assert_eq!(header.sender, Identity(u64::MAX));
        assert_eq!(header.receiver, Identity(u64::MAX));
    }

    #[test]
    fn test_encode_body_at_limit_succeeds() {
        let body = vec![b'x'; MAX_BODY_LEN];
        let frame = codec().encode_parts("#S_M", 1, 2, &body).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + MAX_BODY_LEN);
        assert_eq!(&frame[..4], b"0512");
    }

    #[test]
    fn test_encode_body_over_limit_fails() {
        let body = vec![b'x'; MAX_BODY_LEN + 1];
        let result = codec().encode_parts("#S_M", 1, 2, &body);
        assert_eq!(result, Err(ProtocolError::BodyTooLarge(MAX_BODY_LEN + 1)));
    }

    #[test]
    fn test_encode_kind_wrong_length_fails() {
        assert!(matches!(
            codec().encode_parts("REG", 1, 0, b""),
            Err(ProtocolError::InvalidKind(_))
        ));
        assert!(matches!(
            codec().encode_parts("#REGX", 1, 0, b""),
            Err(ProtocolError::InvalidKind(_))
        ));
    }

    #[test]
    fn test_encode_kind_with_whitespace_fails() {
        assert!(matches!(
            codec().encode_parts("# RG", 1, 0, b""),
            Err(ProtocolError::InvalidKind(_))
        ));
    }

    // =====================================================================
    // decode_header
    // =====================================================================

    #[test]
    fn test_decode_header_valid() {
        let bytes = header_bytes(
            "0010",
            "#REG",
            "00000000000000000042",
            "00000000000000000000",
        );
        let header = codec().decode_header(&bytes).unwrap();
        assert_eq!(
            header,
            Header {
                body_length: 10,
                kind: "#REG".into(),
                sender: Identity(42),
                receiver: Identity(0),
            }
        );
    }

    #[test]
    fn test_decode_header_accepts_space_padding() {
        let bytes = header_bytes(
            "   5",
            "#S_M",
            "                   1",
            "                   2",
        );
        let header = codec().decode_header(&bytes).unwrap();
        assert_eq!(header.body_length, 5);
        assert_eq!(header.sender, Identity(1));
        assert_eq!(header.receiver, Identity(2));
    }

    #[test]
    fn test_decode_header_wrong_length_fails() {
        assert_eq!(
            codec().decode_header(b"0000#REG"),
            Err(ProtocolError::HeaderLength(8))
        );
        assert_eq!(
            codec().decode_header(&[b'0'; HEADER_LEN + 1]),
            Err(ProtocolError::HeaderLength(HEADER_LEN + 1))
        );
    }

    #[test]
    fn test_decode_header_body_too_large_fails() {
        let bytes = header_bytes(
            "0513",
            "#S_M",
            "00000000000000000001",
            "00000000000000000002",
        );
        assert_eq!(
            codec().decode_header(&bytes),
            Err(ProtocolError::BodyTooLarge(513))
        );

        let bytes = header_bytes(
            "9999",
            "#S_M",
            "00000000000000000001",
            "00000000000000000002",
        );
        assert_eq!(
            codec().decode_header(&bytes),
            Err(ProtocolError::BodyTooLarge(9999))
        );
    }

    #[test]
    fn test_decode_header_non_numeric_sender_fails() {
        let bytes = header_bytes(
            "0000",
            "#S_C",
            "0000000000000000abcd",
            "00000000000000000000",
        );
        assert!(matches!(
            codec().decode_header(&bytes),
            Err(ProtocolError::InvalidNumber { field: "sender_id", .. })
        ));
    }

    #[test]
    fn test_decode_header_negative_length_fails() {
        let bytes = header_bytes(
            "  -1",
            "#S_C",
            "00000000000000000001",
            "00000000000000000000",
        );
        assert!(matches!(
            codec().decode_header(&bytes),
            Err(ProtocolError::InvalidNumber { field: "body_length", .. })
        ));
    }

    #[test]
    fn test_decode_header_blank_receiver_fails() {
        let bytes = header_bytes(
            "0000",
            "#S_C",
            "00000000000000000001",
            "                    ",
        );
        assert!(matches!(
            codec().decode_header(&bytes),
            Err(ProtocolError::InvalidNumber { field: "receiver_id", .. })
        ));
    }

    #[test]
    fn test_decode_header_id_overflow_fails() {
        // u64::MAX + 1
        let bytes = header_bytes(
            "0000",
            "#S_C",
            "18446744073709551616",
            "00000000000000000000",
        );
        assert!(matches!(
            codec().decode_header(&bytes),
            Err(ProtocolError::InvalidNumber { field: "sender_id", .. })
        ));
    }

    #[test]
    fn test_decode_header_binary_garbage_fails_without_panic() {
        let garbage: Vec<u8> = (0..HEADER_LEN as u8).map(|b| b.wrapping_mul(37)).collect();
        assert!(codec().decode_header(&garbage).is_err());
        assert!(codec().decode_header(&[0xFF; HEADER_LEN]).is_err());
    }

    #[test]
    fn test_decode_header_keeps_unknown_kind() {
        let bytes = header_bytes(
            "0000",
            "#XYZ",
            "00000000000000000001",
            "00000000000000000000",
        );
        let header = codec().decode_header(&bytes).unwrap();
        assert_eq!(header.kind, "#XYZ");
    }

    // =====================================================================
    // decode_body / decode
    // =====================================================================

    #[test]
    fn test_decode_body_length_mismatch_fails() {
        let header = Header {
            body_length: 5,
            kind: "#S_M".into(),
            sender: Identity(1),
            receiver: Identity(2),
        };
        assert_eq!(
            codec().decode_body(&header, b"abc".to_vec()),
            Err(ProtocolError::BodyLengthMismatch {
                declared: 5,
                actual: 3
            })
        );
    }

    #[test]
    fn test_decode_body_unknown_kind_names_code() {
        let header = Header {
            body_length: 0,
            kind: "#XYZ".into(),
            sender: Identity(1),
            receiver: Identity(0),
        };
        assert_eq!(
            codec().decode_body(&header, Vec::new()),
            Err(ProtocolError::UnknownKind("#XYZ".into()))
        );
    }

    #[test]
    fn test_decode_round_trip_every_kind() {
        for kind in MessageKind::ALL {
            let msg = Message::new(kind, Identity(7), Identity(9), b"payload".to_vec());
            let frame = codec().encode(&msg).unwrap();
            assert_eq!(codec().decode(&frame).unwrap(), msg);
        }
    }

    #[test]
    fn test_decode_round_trip_empty_and_binary_body() {
        let empty = Message::new(MessageKind::ShowClients, Identity(1), Identity(0), Vec::new());
        let frame = codec().encode(&empty).unwrap();
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(codec().decode(&frame).unwrap(), empty);

        let binary: Vec<u8> = (0..=255).collect();
        let msg = Message::new(MessageKind::SendMessage, Identity(1), Identity(2), binary);
        let frame = codec().encode(&msg).unwrap();
        assert_eq!(codec().decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_decode_trailing_bytes_is_mismatch() {
        let msg = Message::new(MessageKind::SendMessage, Identity(1), Identity(2), b"hi".to_vec());
        let mut frame = codec().encode(&msg).unwrap();
        frame.push(b'!');
        assert!(matches!(
            codec().decode(&frame),
            Err(ProtocolError::BodyLengthMismatch { declared: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_decode_short_frame_fails() {
        assert_eq!(
            codec().decode(b"00"),
            Err(ProtocolError::HeaderLength(2))
        );
    }
}
