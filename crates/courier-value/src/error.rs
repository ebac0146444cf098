//! Value-level errors: synchronous results of typed access.

use std::fmt;

use crate::ValueType;

/// Errors returned by typed accessors and container mutators.
///
/// These are plain return values; they are never stored in a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A typed accessor was used on the wrong variant.
    TypeMismatch {
        /// Variant the accessor expected.
        expected: ValueType,
        /// Variant actually present.
        actual: ValueType,
    },
    /// Dictionary lookup missed.
    KeyNotFound(String),
    /// Array index past the end.
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Current element count.
        len: usize,
    },
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::TypeMismatch { expected, actual } => {
                write!(f, "expected {} value, found {}", expected, actual)
            }
            ValueError::KeyNotFound(key) => write!(f, "no such key: {:?}", key),
            ValueError::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds (len {})", index, len)
            }
        }
    }
}

impl std::error::Error for ValueError {}
