//! Array operations.

use crate::value::Repr;
use crate::{Value, ValueError, ValueType};

impl Value {
    /// Append `child` to an array, retaining it.
    pub fn array_append(&mut self, child: Value) -> Result<(), ValueError> {
        let actual = self.value_type();
        match self.make_mut() {
            Repr::Array(items) => {
                items.push(child);
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch {
                expected: ValueType::Array,
                actual,
            }),
        }
    }

    /// Replace the element at `index`, releasing the previous occupant.
    pub fn array_set(&mut self, index: usize, child: Value) -> Result<(), ValueError> {
        let actual = self.value_type();
        match self.make_mut() {
            Repr::Array(items) => {
                let len = items.len();
                if index >= len {
                    return Err(ValueError::IndexOutOfBounds { index, len });
                }
                items[index] = child;
                Ok(())
            }
            _ => Err(ValueError::TypeMismatch {
                expected: ValueType::Array,
                actual,
            }),
        }
    }

    /// Borrow the element at `index`.
    pub fn array_get(&self, index: usize) -> Result<&Value, ValueError> {
        match &self.node.repr {
            Repr::Array(items) => items.get(index).ok_or(ValueError::IndexOutOfBounds {
                index,
                len: items.len(),
            }),
            _ => Err(ValueError::TypeMismatch {
                expected: ValueType::Array,
                actual: self.value_type(),
            }),
        }
    }

    /// Element count.
    pub fn array_len(&self) -> Result<usize, ValueError> {
        match &self.node.repr {
            Repr::Array(items) => Ok(items.len()),
            _ => Err(ValueError::TypeMismatch {
                expected: ValueType::Array,
                actual: self.value_type(),
            }),
        }
    }

    /// Visit each element in order. The visitor borrows the child for the
    /// duration of the call; returning `false` stops the walk. The overall
    /// result is `false` iff a visitor stopped early.
    pub fn array_apply(&self, mut visit: impl FnMut(usize, &Value) -> bool) -> bool {
        if let Repr::Array(items) = &self.node.repr {
            for (index, item) in items.iter().enumerate() {
                if !visit(index, item) {
                    return false;
                }
            }
        }
        true
    }

    /// Iterate over the elements of an array value.
    pub fn array_iter(&self) -> impl Iterator<Item = &Value> {
        let items: &[Value] = match &self.node.repr {
            Repr::Array(items) => items,
            _ => &[],
        };
        items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_get() {
        let mut arr = Value::array();
        arr.array_append(Value::int64(1)).unwrap();
        arr.array_append(Value::string("two")).unwrap();

        assert_eq!(arr.array_len(), Ok(2));
        assert_eq!(arr.array_get(0).unwrap().as_int64(), Ok(1));
        assert_eq!(arr.array_get(1).unwrap().as_str(), Ok("two"));
        assert!(matches!(
            arr.array_get(2),
            Err(ValueError::IndexOutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut arr = Value::array();
        arr.array_append(Value::int64(1)).unwrap();
        arr.array_set(0, Value::int64(9)).unwrap();
        assert_eq!(arr.array_get(0).unwrap().as_int64(), Ok(9));
        assert!(arr.array_set(1, Value::null()).is_err());
    }

    #[test]
    fn apply_stops_early() {
        let mut arr = Value::array();
        for i in 0..10 {
            arr.array_append(Value::int64(i)).unwrap();
        }
        let mut seen = 0;
        let completed = arr.array_apply(|_, _| {
            seen += 1;
            seen < 3
        });
        assert!(!completed);
        assert_eq!(seen, 3);
    }

    #[test]
    fn mutating_a_shared_array_leaves_the_clone_alone() {
        let mut arr = Value::array();
        arr.array_append(Value::int64(1)).unwrap();
        let snapshot = arr.clone();

        arr.array_append(Value::int64(2)).unwrap();
        assert_eq!(arr.array_len(), Ok(2));
        assert_eq!(snapshot.array_len(), Ok(1));
    }

    #[test]
    fn non_array_rejects_ops() {
        let mut v = Value::int64(1);
        assert!(v.array_append(Value::null()).is_err());
        assert!(v.array_len().is_err());
    }
}
