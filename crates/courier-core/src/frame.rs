//! The fixed-size frame header that precedes every payload on the wire.
//!
//! Layout (all fields big-endian):
//!
//! ```text
//! bytes 0..7   : protocol version (must be 1)
//! bytes 8..15  : sequence id
//! bytes 16..23 : payload length
//! bytes 24..55 : reserved, zero on send, ignored on receive
//! ```

use std::fmt;

/// The only protocol version this library speaks.
pub const PROTOCOL_VERSION: u64 = 1;

/// Size of the encoded frame header in bytes (must be 56).
pub const FRAME_HEADER_SIZE: usize = 56;

const _: () = assert!(FRAME_HEADER_SIZE == 7 * 8);

/// Parsed frame header.
///
/// Construction via [`FrameHeader::new`] always yields a header with the
/// current [`PROTOCOL_VERSION`]; parsing rejects any other version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version; 1 for every valid frame.
    pub version: u64,
    /// Per-connection sequence id. Zero means "unsolicited event".
    pub sequence_id: u64,
    /// Number of payload bytes following the header.
    pub payload_len: u64,
}

impl FrameHeader {
    /// Header for an outbound frame carrying `payload_len` payload bytes.
    pub fn new(sequence_id: u64, payload_len: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence_id,
            payload_len,
        }
    }

    /// Serialize to the 56-byte wire form. Reserved words are zero.
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.version.to_be_bytes());
        buf[8..16].copy_from_slice(&self.sequence_id.to_be_bytes());
        buf[16..24].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Parse and validate a header from the front of `data`.
    ///
    /// `data` is the complete received frame; the payload length declared by
    /// the header must fit in the bytes that follow it. Reserved words are
    /// ignored.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::Truncated { len: data.len() });
        }

        let mut word = [0u8; 8];
        word.copy_from_slice(&data[0..8]);
        let version = u64::from_be_bytes(word);
        word.copy_from_slice(&data[8..16]);
        let sequence_id = u64::from_be_bytes(word);
        word.copy_from_slice(&data[16..24]);
        let payload_len = u64::from_be_bytes(word);

        if version != PROTOCOL_VERSION {
            return Err(FrameError::BadVersion(version));
        }

        let available = (data.len() - FRAME_HEADER_SIZE) as u64;
        if payload_len > available {
            return Err(FrameError::LengthMismatch {
                declared: payload_len,
                available,
            });
        }

        Ok(Self {
            version,
            sequence_id,
            payload_len,
        })
    }
}

/// Errors produced while validating a received frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a header were received.
    Truncated {
        /// Number of bytes actually received.
        len: usize,
    },
    /// The version word was not [`PROTOCOL_VERSION`]. Fatal for the frame.
    BadVersion(u64),
    /// The header declared more payload than the frame carries.
    LengthMismatch {
        /// Payload length claimed by the header.
        declared: u64,
        /// Payload bytes actually present after the header.
        available: u64,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated { len } => {
                write!(f, "frame shorter than header: {} bytes", len)
            }
            FrameError::BadVersion(v) => {
                write!(f, "unsupported protocol version: {}", v)
            }
            FrameError::LengthMismatch {
                declared,
                available,
            } => {
                write!(
                    f,
                    "header declares {} payload bytes but frame carries {}",
                    declared, available
                )
            }
        }
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let hdr = FrameHeader::new(42, 1000);
        let bytes = hdr.to_bytes();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE);

        let mut frame = bytes.to_vec();
        frame.extend(std::iter::repeat_n(0u8, 1000));
        let parsed = FrameHeader::parse(&frame).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn reserved_ignored_on_receive() {
        let hdr = FrameHeader::new(7, 0);
        let mut bytes = hdr.to_bytes();
        for b in &mut bytes[24..] {
            *b = 0xaa;
        }
        let parsed = FrameHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.sequence_id, 7);
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = FrameHeader::new(1, 0).to_bytes();
        bytes[7] = 2;
        assert_eq!(FrameHeader::parse(&bytes), Err(FrameError::BadVersion(2)));
    }

    #[test]
    fn rejects_truncated() {
        let bytes = FrameHeader::new(1, 0).to_bytes();
        assert!(matches!(
            FrameHeader::parse(&bytes[..30]),
            Err(FrameError::Truncated { len: 30 })
        ));
    }

    #[test]
    fn rejects_short_payload() {
        let bytes = FrameHeader::new(1, 10).to_bytes();
        assert_eq!(
            FrameHeader::parse(&bytes),
            Err(FrameError::LengthMismatch {
                declared: 10,
                available: 0
            })
        );
    }
}
