//! The unified error type of the connection layer.

use std::fmt;

use courier_codec::CodecError;
use courier_core::{ErrorCode, FrameError, TransportError};
use courier_value::ValueError;

/// Anything that can go wrong between a send call and a delivered value.
#[derive(Debug)]
pub enum Error {
    /// Encoding or decoding a payload failed.
    Codec(CodecError),
    /// The transport failed or closed.
    Transport(TransportError),
    /// A received frame header did not validate.
    Frame(FrameError),
    /// A value-level operation failed.
    Value(ValueError),
}

impl Error {
    /// The engine-level code this error maps to, for sentinel construction.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::Codec(CodecError::TooBig(_)) => ErrorCode::TooBig,
            Error::Codec(CodecError::Memory) => ErrorCode::Memory,
            Error::Codec(CodecError::Type(_)) => ErrorCode::Type,
            Error::Codec(_) => ErrorCode::Invalid,
            Error::Transport(e) => e.error_code(),
            Error::Frame(_) => ErrorCode::Invalid,
            Error::Value(_) => ErrorCode::Type,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Codec(e) => write!(f, "codec: {}", e),
            Error::Transport(e) => write!(f, "transport: {}", e),
            Error::Frame(e) => write!(f, "frame: {}", e),
            Error::Value(e) => write!(f, "value: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Codec(e) => Some(e),
            Error::Transport(e) => Some(e),
            Error::Frame(e) => Some(e),
            Error::Value(e) => Some(e),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::Frame(e)
    }
}

impl From<ValueError> for Error {
    fn from(e: ValueError) -> Self {
        Error::Value(e)
    }
}
