//! The wire writer.
//!
//! Emits every value in its shortest representation: integers pick the
//! narrowest width that holds them, a non-negative signed integer goes
//! through the unsigned ladder, and containers and strings pick the
//! smallest header form that fits their count.

use crate::tag;
use crate::CodecError;

/// Append-only writer over a byte buffer.
pub struct Writer<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> Writer<'a> {
    /// Write into `out`, appending.
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out }
    }

    /// Bytes written so far (including anything already in the buffer).
    pub fn len(&self) -> usize {
        self.out.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Emit nil.
    pub fn write_nil(&mut self) {
        self.out.push(tag::NIL);
    }

    /// Emit a boolean.
    pub fn write_bool(&mut self, v: bool) {
        self.out.push(if v { tag::TRUE } else { tag::FALSE });
    }

    /// Emit an unsigned integer in its shortest form.
    pub fn write_u64(&mut self, v: u64) {
        if v <= u64::from(tag::POSFIXINT_MAX) {
            self.out.push(v as u8);
        } else if v <= u64::from(u8::MAX) {
            self.out.push(tag::UINT8);
            self.out.push(v as u8);
        } else if v <= u64::from(u16::MAX) {
            self.out.push(tag::UINT16);
            self.out.extend_from_slice(&(v as u16).to_be_bytes());
        } else if v <= u64::from(u32::MAX) {
            self.out.push(tag::UINT32);
            self.out.extend_from_slice(&(v as u32).to_be_bytes());
        } else {
            self.out.push(tag::UINT64);
            self.out.extend_from_slice(&v.to_be_bytes());
        }
    }

    /// Emit a signed integer in its shortest form. Non-negative values use
    /// the unsigned encodings.
    pub fn write_i64(&mut self, v: i64) {
        if v >= 0 {
            self.write_u64(v as u64);
        } else if v >= -32 {
            self.out.push(v as u8);
        } else if v >= i64::from(i8::MIN) {
            self.out.push(tag::INT8);
            self.out.push(v as u8);
        } else if v >= i64::from(i16::MIN) {
            self.out.push(tag::INT16);
            self.out.extend_from_slice(&(v as i16).to_be_bytes());
        } else if v >= i64::from(i32::MIN) {
            self.out.push(tag::INT32);
            self.out.extend_from_slice(&(v as i32).to_be_bytes());
        } else {
            self.out.push(tag::INT64);
            self.out.extend_from_slice(&v.to_be_bytes());
        }
    }

    /// Emit a double. Always the 64-bit form; narrowing is lossy and the
    /// object model has no float32 variant.
    pub fn write_f64(&mut self, v: f64) {
        self.out.push(tag::FLOAT64);
        self.out.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    /// Emit a UTF-8 string.
    pub fn write_str(&mut self, s: &str) -> Result<(), CodecError> {
        let len = s.len();
        if len <= tag::FIXSTR_LEN_MAX {
            self.out.push(tag::FIXSTR_BASE | len as u8);
        } else if len <= usize::from(u8::MAX) {
            self.out.push(tag::STR8);
            self.out.push(len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.out.push(tag::STR16);
            self.out.extend_from_slice(&(len as u16).to_be_bytes());
        } else if len <= u32::MAX as usize {
            self.out.push(tag::STR32);
            self.out.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(CodecError::TooBig("string exceeds 32-bit length"));
        }
        self.out.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// Emit opaque bytes.
    pub fn write_bin(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = bytes.len();
        if len <= usize::from(u8::MAX) {
            self.out.push(tag::BIN8);
            self.out.push(len as u8);
        } else if len <= usize::from(u16::MAX) {
            self.out.push(tag::BIN16);
            self.out.extend_from_slice(&(len as u16).to_be_bytes());
        } else if len <= u32::MAX as usize {
            self.out.push(tag::BIN32);
            self.out.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(CodecError::TooBig("binary exceeds 32-bit length"));
        }
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    /// Emit an extension value. Fixext forms are used for their exact
    /// lengths, otherwise the shortest length-prefixed form.
    pub fn write_ext(&mut self, ext_type: i8, payload: &[u8]) -> Result<(), CodecError> {
        match payload.len() {
            1 => self.out.push(tag::FIXEXT1),
            2 => self.out.push(tag::FIXEXT2),
            4 => self.out.push(tag::FIXEXT4),
            8 => self.out.push(tag::FIXEXT8),
            16 => self.out.push(tag::FIXEXT16),
            len if len <= usize::from(u8::MAX) => {
                self.out.push(tag::EXT8);
                self.out.push(len as u8);
            }
            len if len <= usize::from(u16::MAX) => {
                self.out.push(tag::EXT16);
                self.out.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len if len <= u32::MAX as usize => {
                self.out.push(tag::EXT32);
                self.out.extend_from_slice(&(len as u32).to_be_bytes());
            }
            _ => return Err(CodecError::TooBig("extension exceeds 32-bit length")),
        }
        self.out.push(ext_type as u8);
        self.out.extend_from_slice(payload);
        Ok(())
    }

    /// Emit an array header; `count` elements must follow.
    pub fn start_array(&mut self, count: usize) -> Result<(), CodecError> {
        if count <= tag::FIX_CONTAINER_MAX {
            self.out.push(tag::FIXARRAY_BASE | count as u8);
        } else if count <= usize::from(u16::MAX) {
            self.out.push(tag::ARRAY16);
            self.out.extend_from_slice(&(count as u16).to_be_bytes());
        } else if count <= u32::MAX as usize {
            self.out.push(tag::ARRAY32);
            self.out.extend_from_slice(&(count as u32).to_be_bytes());
        } else {
            return Err(CodecError::TooBig("array exceeds 32-bit count"));
        }
        Ok(())
    }

    /// Emit a map header; `count` key/value pairs must follow.
    pub fn start_map(&mut self, count: usize) -> Result<(), CodecError> {
        if count <= tag::FIX_CONTAINER_MAX {
            self.out.push(tag::FIXMAP_BASE | count as u8);
        } else if count <= usize::from(u16::MAX) {
            self.out.push(tag::MAP16);
            self.out.extend_from_slice(&(count as u16).to_be_bytes());
        } else if count <= u32::MAX as usize {
            self.out.push(tag::MAP32);
            self.out.extend_from_slice(&(count as u32).to_be_bytes());
        } else {
            return Err(CodecError::TooBig("map exceeds 32-bit count"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(f: impl FnOnce(&mut Writer<'_>)) -> Vec<u8> {
        let mut buf = Vec::new();
        f(&mut Writer::new(&mut buf));
        buf
    }

    #[test]
    fn canonical_unsigned_widths() {
        assert_eq!(emit(|w| w.write_u64(0)), [0x00]);
        assert_eq!(emit(|w| w.write_u64(42)), [0x2a]);
        assert_eq!(emit(|w| w.write_u64(127)), [0x7f]);
        assert_eq!(emit(|w| w.write_u64(128)), [0xcc, 0x80]);
        assert_eq!(emit(|w| w.write_u64(255)), [0xcc, 0xff]);
        assert_eq!(emit(|w| w.write_u64(256)), [0xcd, 0x01, 0x00]);
        assert_eq!(emit(|w| w.write_u64(65535)), [0xcd, 0xff, 0xff]);
        assert_eq!(emit(|w| w.write_u64(65536)), [0xce, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(
            emit(|w| w.write_u64(u64::from(u32::MAX) + 1)),
            [0xcf, 0, 0, 0, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn canonical_signed_widths() {
        assert_eq!(emit(|w| w.write_i64(-1)), [0xff]);
        assert_eq!(emit(|w| w.write_i64(-32)), [0xe0]);
        assert_eq!(emit(|w| w.write_i64(-33)), [0xd0, 0xdf]);
        assert_eq!(emit(|w| w.write_i64(-128)), [0xd0, 0x80]);
        assert_eq!(emit(|w| w.write_i64(-129)), [0xd1, 0xff, 0x7f]);
        assert_eq!(emit(|w| w.write_i64(-32768)), [0xd1, 0x80, 0x00]);
        assert_eq!(
            emit(|w| w.write_i64(-32769)),
            [0xd2, 0xff, 0xff, 0x7f, 0xff]
        );
        assert_eq!(
            emit(|w| w.write_i64(i64::from(i32::MIN) - 1)),
            [0xd3, 0xff, 0xff, 0xff, 0xff, 0x7f, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn non_negative_signed_uses_unsigned_ladder() {
        assert_eq!(emit(|w| w.write_i64(42)), [0x2a]);
        assert_eq!(emit(|w| w.write_i64(128)), [0xcc, 0x80]);
        assert_eq!(emit(|w| w.write_i64(300)), [0xcd, 0x01, 0x2c]);
    }

    #[test]
    fn string_header_selection() {
        assert_eq!(emit(|w| w.write_str("").unwrap()), [0xa0]);
        let short = "a".repeat(31);
        assert_eq!(emit(|w| w.write_str(&short).unwrap())[0], 0xa0 | 31);
        let medium = "a".repeat(32);
        assert_eq!(emit(|w| w.write_str(&medium).unwrap())[..2], [0xd9, 32]);
        let long = "a".repeat(256);
        assert_eq!(emit(|w| w.write_str(&long).unwrap())[..3], [0xda, 1, 0]);
    }

    #[test]
    fn container_header_selection() {
        assert_eq!(emit(|w| w.start_array(0).unwrap()), [0x90]);
        assert_eq!(emit(|w| w.start_array(15).unwrap()), [0x9f]);
        assert_eq!(emit(|w| w.start_array(16).unwrap()), [0xdc, 0x00, 0x10]);
        assert_eq!(emit(|w| w.start_map(0).unwrap()), [0x80]);
        assert_eq!(emit(|w| w.start_map(15).unwrap()), [0x8f]);
        assert_eq!(emit(|w| w.start_map(16).unwrap()), [0xde, 0x00, 0x10]);
    }

    #[test]
    fn ext_forms() {
        assert_eq!(emit(|w| w.write_ext(3, &[7]).unwrap()), [0xd4, 3, 7]);
        assert_eq!(
            emit(|w| w.write_ext(2, &[0; 8]).unwrap())[..2],
            [0xd7, 2]
        );
        assert_eq!(
            emit(|w| w.write_ext(6, &[0; 12]).unwrap())[..3],
            [0xc7, 12, 6]
        );
    }

    #[test]
    fn float_is_always_wide() {
        let bytes = emit(|w| w.write_f64(1.0));
        assert_eq!(bytes[0], 0xcb);
        assert_eq!(bytes.len(), 9);
    }
}
