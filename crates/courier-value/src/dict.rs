//! Dictionary operations.
//!
//! Dictionaries are insertion-ordered association lists. Lookup is O(n) on
//! purpose: the maps this model carries are small, and the ordering
//! guarantee matters more than asymptotics. Setting an existing key
//! replaces the entry in place without disturbing its position.

use bytes::Bytes;

use crate::value::{DictEntry, Repr};
use crate::{Value, ValueError, ValueType};

impl Value {
    /// Insert or replace `key`.
    ///
    /// A new key lands at the tail; an existing key keeps its original
    /// position. The inserted child is retained, the displaced one (if any)
    /// released.
    pub fn dict_set(&mut self, key: impl AsRef<str>, value: Value) -> Result<(), ValueError> {
        let key = key.as_ref();
        let actual = self.value_type();
        match self.make_mut() {
            Repr::Dictionary(entries) => {
                if let Some(entry) = entries.iter_mut().find(|e| e.key == *key) {
                    entry.value = value;
                } else {
                    entries.push(DictEntry {
                        key: key.into(),
                        value,
                    });
                }
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch {
                expected: ValueType::Dictionary,
                actual,
            }),
        }
    }

    /// Remove `key`, releasing its value. Later entries shift up.
    pub fn dict_remove(&mut self, key: impl AsRef<str>) -> Result<Option<Value>, ValueError> {
        let key = key.as_ref();
        let actual = self.value_type();
        match self.make_mut() {
            Repr::Dictionary(entries) => {
                match entries.iter().position(|e| e.key == *key) {
                    Some(index) => Ok(Some(entries.remove(index).value)),
                    None => Ok(None),
                }
            }
            _ => Err(ValueError::TypeMismatch {
                expected: ValueType::Dictionary,
                actual,
            }),
        }
    }

    /// Borrow the value for `key`.
    pub fn dict_get(&self, key: impl AsRef<str>) -> Result<&Value, ValueError> {
        let key = key.as_ref();
        match &self.node.repr {
            Repr::Dictionary(entries) => entries
                .iter()
                .find(|e| e.key == *key)
                .map(|e| &e.value)
                .ok_or_else(|| ValueError::KeyNotFound(key.to_string())),
            _ => Err(ValueError::TypeMismatch {
                expected: ValueType::Dictionary,
                actual: self.value_type(),
            }),
        }
    }

    /// Entry count.
    pub fn dict_len(&self) -> Result<usize, ValueError> {
        match &self.node.repr {
            Repr::Dictionary(entries) => Ok(entries.len()),
            _ => Err(ValueError::TypeMismatch {
                expected: ValueType::Dictionary,
                actual: self.value_type(),
            }),
        }
    }

    /// Visit each entry in insertion order. Returning `false` stops the
    /// walk; the overall result is `false` iff a visitor stopped early.
    pub fn dict_apply(&self, mut visit: impl FnMut(&str, &Value) -> bool) -> bool {
        if let Repr::Dictionary(entries) = &self.node.repr {
            for entry in entries {
                if !visit(entry.key.as_str(), &entry.value) {
                    return false;
                }
            }
        }
        true
    }

    /// Iterate over `(key, value)` pairs of a dictionary value.
    pub fn dict_iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        let entries: &[DictEntry] = match &self.node.repr {
            Repr::Dictionary(entries) => entries,
            _ => &[],
        };
        entries.iter().map(|e| (e.key.as_str(), &e.value))
    }

    /// Set a boolean for `key`.
    pub fn dict_set_bool(&mut self, key: impl AsRef<str>, v: bool) -> Result<(), ValueError> {
        self.dict_set(key, Value::boolean(v))
    }

    /// Set a signed integer for `key`.
    pub fn dict_set_int64(&mut self, key: impl AsRef<str>, v: i64) -> Result<(), ValueError> {
        self.dict_set(key, Value::int64(v))
    }

    /// Set an unsigned integer for `key`.
    pub fn dict_set_uint64(&mut self, key: impl AsRef<str>, v: u64) -> Result<(), ValueError> {
        self.dict_set(key, Value::uint64(v))
    }

    /// Set a double for `key`.
    pub fn dict_set_double(&mut self, key: impl AsRef<str>, v: f64) -> Result<(), ValueError> {
        self.dict_set(key, Value::double(v))
    }

    /// Set a string for `key`.
    pub fn dict_set_string(
        &mut self,
        key: impl AsRef<str>,
        v: impl AsRef<str>,
    ) -> Result<(), ValueError> {
        self.dict_set(key, Value::string(v.as_ref()))
    }

    /// Set opaque bytes for `key`.
    pub fn dict_set_data(
        &mut self,
        key: impl AsRef<str>,
        v: impl Into<Bytes>,
    ) -> Result<(), ValueError> {
        self.dict_set(key, Value::data(v))
    }

    /// Set a date (nanoseconds since the epoch) for `key`.
    pub fn dict_set_date(&mut self, key: impl AsRef<str>, nanos: i64) -> Result<(), ValueError> {
        self.dict_set(key, Value::date(nanos))
    }

    /// Set a UUID for `key`.
    pub fn dict_set_uuid(&mut self, key: impl AsRef<str>, uuid: [u8; 16]) -> Result<(), ValueError> {
        self.dict_set(key, Value::uuid(uuid))
    }

    /// Set a file descriptor for `key`. The dictionary owns the handle
    /// until the value is sent.
    pub fn dict_set_fd(
        &mut self,
        key: impl AsRef<str>,
        fd: std::os::fd::OwnedFd,
    ) -> Result<(), ValueError> {
        self.dict_set(key, Value::fd(fd))
    }

    /// Get the boolean at `key`.
    pub fn dict_get_bool(&self, key: impl AsRef<str>) -> Result<bool, ValueError> {
        self.dict_get(key)?.as_bool()
    }

    /// Get the signed integer at `key`.
    pub fn dict_get_int64(&self, key: impl AsRef<str>) -> Result<i64, ValueError> {
        self.dict_get(key)?.as_int64()
    }

    /// Get the unsigned integer at `key`.
    pub fn dict_get_uint64(&self, key: impl AsRef<str>) -> Result<u64, ValueError> {
        self.dict_get(key)?.as_uint64()
    }

    /// Get the double at `key`.
    pub fn dict_get_double(&self, key: impl AsRef<str>) -> Result<f64, ValueError> {
        self.dict_get(key)?.as_double()
    }

    /// Get the string at `key`.
    pub fn dict_get_string(&self, key: impl AsRef<str>) -> Result<&str, ValueError> {
        self.dict_get(key)?.as_str()
    }

    /// Get the data at `key`.
    pub fn dict_get_data(&self, key: impl AsRef<str>) -> Result<&[u8], ValueError> {
        self.dict_get(key)?.as_data()
    }

    /// Get the date at `key`, nanoseconds since the epoch.
    pub fn dict_get_date(&self, key: impl AsRef<str>) -> Result<i64, ValueError> {
        self.dict_get(key)?.as_date()
    }

    /// Get the UUID at `key`.
    pub fn dict_get_uuid(&self, key: impl AsRef<str>) -> Result<&[u8; 16], ValueError> {
        self.dict_get(key)?.as_uuid()
    }
}
