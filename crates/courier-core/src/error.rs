//! Engine-level error codes and transport errors.

use std::fmt;

/// The engine-level error taxonomy.
///
/// These are the conditions a connection can surface to user code, either as
/// the synthetic error value delivered to an event handler or as the status
/// of a synchronous call. Each code has a stable `u32` wire representation
/// so the sentinel survives encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Peer closed or was never reachable.
    ConnectionInvalid,
    /// Transient transport error, possibly retryable.
    ConnectionInterrupted,
    /// Host is shutting the process down.
    TerminationImminent,
    /// Underlying syscall failed on send or receive.
    Io,
    /// Malformed frame header or payload.
    Invalid,
    /// A typed accessor was used on the wrong variant.
    Type,
    /// Frame or value exceeds configured limits.
    TooBig,
    /// Allocation failed.
    Memory,
}

impl ErrorCode {
    /// Stable wire code.
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::ConnectionInvalid => 1,
            ErrorCode::ConnectionInterrupted => 2,
            ErrorCode::TerminationImminent => 3,
            ErrorCode::Io => 4,
            ErrorCode::Invalid => 5,
            ErrorCode::Type => 6,
            ErrorCode::TooBig => 7,
            ErrorCode::Memory => 8,
        }
    }

    /// Inverse of [`ErrorCode::code`].
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => ErrorCode::ConnectionInvalid,
            2 => ErrorCode::ConnectionInterrupted,
            3 => ErrorCode::TerminationImminent,
            4 => ErrorCode::Io,
            5 => ErrorCode::Invalid,
            6 => ErrorCode::Type,
            7 => ErrorCode::TooBig,
            8 => ErrorCode::Memory,
            _ => return None,
        })
    }

    /// Canonical human-readable message.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ConnectionInvalid => "connection invalid",
            ErrorCode::ConnectionInterrupted => "connection interrupted",
            ErrorCode::TerminationImminent => "termination imminent",
            ErrorCode::Io => "input/output error",
            ErrorCode::Invalid => "malformed frame or payload",
            ErrorCode::Type => "type mismatch",
            ErrorCode::TooBig => "frame or value too big",
            ErrorCode::Memory => "out of memory",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Errors surfaced by transport backends.
#[derive(Debug)]
pub enum TransportError {
    /// Underlying syscall or I/O operation failed.
    Io(std::io::Error),
    /// Peer closed the port, or the port was closed locally.
    Closed,
    /// Named service does not exist.
    NotFound(String),
    /// Service name is not acceptable to the transport.
    InvalidName(String),
    /// The kernel did not supply peer credentials for the port.
    CredentialsUnavailable,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "transport I/O error: {}", e),
            TransportError::Closed => write!(f, "transport closed"),
            TransportError::NotFound(name) => {
                write!(f, "no such service: {:?}", name)
            }
            TransportError::InvalidName(name) => {
                write!(f, "invalid service name: {:?}", name)
            }
            TransportError::CredentialsUnavailable => {
                write!(f, "peer credentials unavailable")
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl TransportError {
    /// The engine-level code this transport error maps to.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TransportError::Io(_) => ErrorCode::Io,
            TransportError::Closed => ErrorCode::ConnectionInvalid,
            TransportError::NotFound(_) => ErrorCode::ConnectionInvalid,
            TransportError::InvalidName(_) => ErrorCode::Invalid,
            TransportError::CredentialsUnavailable => ErrorCode::Io,
        }
    }
}
