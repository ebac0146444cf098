//! Codec error taxonomy.

use std::fmt;

/// Errors produced while encoding or decoding values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Underlying read failed. Produced by callers that feed the decoder
    /// from a fallible byte source; in-memory decoding never emits it.
    Io(String),
    /// Malformed input: bad tag, reserved byte, truncation, or a compound
    /// header declaring more children than the input could possibly hold.
    Invalid(&'static str),
    /// Structurally sound input with the wrong type in context, e.g. a map
    /// key that is not a string.
    Type(&'static str),
    /// Declared size exceeds the buffer, the node pool, or a configured
    /// limit.
    TooBig(&'static str),
    /// Allocator failure.
    Memory,
    /// Invariant violation inside the codec itself.
    Bug(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Io(msg) => write!(f, "read failed: {}", msg),
            CodecError::Invalid(msg) => write!(f, "invalid input: {}", msg),
            CodecError::Type(msg) => write!(f, "type error: {}", msg),
            CodecError::TooBig(msg) => write!(f, "too big: {}", msg),
            CodecError::Memory => write!(f, "out of memory"),
            CodecError::Bug(msg) => write!(f, "codec invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}
