//! UTF-8 validated byte strings.
//!
//! String payloads decoded from the wire are zero-copy slices of the input
//! buffer. [`ByteStr`] validates once at construction and hands out `&str`
//! without re-checking; length is authoritative, there is no terminator.

use std::borrow::Borrow;
use std::fmt;
use std::str::Utf8Error;

use bytes::Bytes;

/// An immutable UTF-8 string backed by (possibly shared) bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteStr {
    bytes: Bytes,
}

impl ByteStr {
    /// Wrap already-validated bytes.
    ///
    /// Validation happens here, once; accessors never re-check.
    pub fn from_utf8(bytes: Bytes) -> Result<Self, Utf8Error> {
        std::str::from_utf8(&bytes)?;
        Ok(Self { bytes })
    }

    /// The string contents.
    pub fn as_str(&self) -> &str {
        // SAFETY: `bytes` was validated as UTF-8 in every constructor.
        unsafe { std::str::from_utf8_unchecked(&self.bytes) }
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the string is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for ByteStr {
    fn from(s: &str) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(s.as_bytes()),
        }
    }
}

impl From<String> for ByteStr {
    fn from(s: String) -> Self {
        Self {
            bytes: Bytes::from(s.into_bytes()),
        }
    }
}

impl Borrow<str> for ByteStr {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<str> for ByteStr {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ByteStr {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_utf8() {
        assert!(ByteStr::from_utf8(Bytes::from_static(&[0xff, 0xfe])).is_err());
    }

    #[test]
    fn zero_copy_slice_roundtrip() {
        let backing = Bytes::from_static(b"hello world");
        let s = ByteStr::from_utf8(backing.slice(0..5)).unwrap();
        assert_eq!(s.as_str(), "hello");
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn compares_as_str() {
        let a = ByteStr::from("abc");
        assert_eq!(a, "abc");
        assert!(a < ByteStr::from("abd"));
    }
}
