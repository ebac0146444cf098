//! The `Value` handle and its variants.

use std::fmt;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use bytes::Bytes;
use courier_core::{ErrorCode, ResourceSlot};

use crate::{ByteStr, ValueError};

/// Variant tags, used in diagnostics and type-mismatch errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// No payload.
    Null,
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    Uint64,
    /// IEEE 754 double.
    Double,
    /// UTF-8 string.
    String,
    /// Opaque bytes.
    Data,
    /// 16-byte UUID.
    Uuid,
    /// Nanoseconds since the epoch, signed.
    Date,
    /// File descriptor resource.
    Fd,
    /// Shared memory resource.
    SharedMemory,
    /// Transport endpoint label.
    Endpoint,
    /// Ordered sequence of values.
    Array,
    /// Insertion-ordered string-keyed map.
    Dictionary,
    /// Error sentinel: code plus message.
    Error,
}

impl ValueType {
    /// Lowercase name, as used by the describe formatter.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int64 => "int64",
            ValueType::Uint64 => "uint64",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Data => "data",
            ValueType::Uuid => "uuid",
            ValueType::Date => "date",
            ValueType::Fd => "fd",
            ValueType::SharedMemory => "shmem",
            ValueType::Endpoint => "endpoint",
            ValueType::Array => "array",
            ValueType::Dictionary => "dictionary",
            ValueType::Error => "error",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One dictionary entry. Entries keep their insertion position for the life
/// of the key.
#[derive(Clone)]
pub(crate) struct DictEntry {
    pub(crate) key: ByteStr,
    pub(crate) value: Value,
}

#[derive(Clone)]
pub(crate) enum Repr {
    Null,
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(ByteStr),
    Data(Bytes),
    Uuid([u8; 16]),
    Date(i64),
    Fd(ResourceSlot),
    SharedMemory(ResourceSlot, u64),
    Endpoint(String),
    Array(Vec<Value>),
    Dictionary(Vec<DictEntry>),
    Error(u32, String),
}

pub(crate) struct Node {
    pub(crate) repr: Repr,
    /// Set on values produced by the decoder. Gates reply construction.
    pub(crate) from_wire: bool,
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self {
            repr: self.repr.clone(),
            from_wire: self.from_wire,
        }
    }
}

/// A reference-counted value of the object model.
///
/// `clone` retains, `drop` releases; destruction of the last owner
/// recursively releases children. Container mutation through a shared
/// handle copies the spine first (children are retained, not copied), which
/// makes the "mutate only while sole owner" contract of the C-era API safe
/// to expose.
#[derive(Clone)]
pub struct Value {
    pub(crate) node: Arc<Node>,
}

impl Value {
    pub(crate) fn from_repr(repr: Repr) -> Self {
        Self {
            node: Arc::new(Node {
                repr,
                from_wire: false,
            }),
        }
    }

    /// The null value.
    pub fn null() -> Self {
        Self::from_repr(Repr::Null)
    }

    /// A boolean.
    pub fn boolean(v: bool) -> Self {
        Self::from_repr(Repr::Bool(v))
    }

    /// A signed 64-bit integer.
    pub fn int64(v: i64) -> Self {
        Self::from_repr(Repr::Int64(v))
    }

    /// An unsigned 64-bit integer.
    pub fn uint64(v: u64) -> Self {
        Self::from_repr(Repr::Uint64(v))
    }

    /// A double.
    pub fn double(v: f64) -> Self {
        Self::from_repr(Repr::Double(v))
    }

    /// A string. Copies `s` into shared storage.
    pub fn string(s: impl Into<ByteStr>) -> Self {
        Self::from_repr(Repr::String(s.into()))
    }

    /// A string from already-shared bytes; used by the decoder.
    pub fn string_bytes(s: ByteStr) -> Self {
        Self::from_repr(Repr::String(s))
    }

    /// Opaque bytes.
    pub fn data(bytes: impl Into<Bytes>) -> Self {
        Self::from_repr(Repr::Data(bytes.into()))
    }

    /// A UUID from its raw bytes.
    pub fn uuid(bytes: [u8; 16]) -> Self {
        Self::from_repr(Repr::Uuid(bytes))
    }

    /// A date as nanoseconds since the epoch.
    pub fn date(nanos: i64) -> Self {
        Self::from_repr(Repr::Date(nanos))
    }

    /// The current wall-clock time as a date value.
    pub fn date_now() -> Self {
        let nanos = match std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
        {
            Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
            Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
        };
        Self::date(nanos)
    }

    /// A file descriptor value. The value owns `fd` until the handle is
    /// drained for a transport send.
    pub fn fd(fd: OwnedFd) -> Self {
        Self::from_repr(Repr::Fd(ResourceSlot::new(fd)))
    }

    /// An fd value with an already-built slot; used by the decoder.
    pub fn fd_slot(slot: ResourceSlot) -> Self {
        Self::from_repr(Repr::Fd(slot))
    }

    /// A shared memory value: backing descriptor plus mapping size.
    pub fn shared_memory(fd: OwnedFd, size: u64) -> Self {
        Self::from_repr(Repr::SharedMemory(ResourceSlot::new(fd), size))
    }

    /// A shared memory value with an already-built slot; used by the decoder.
    pub fn shared_memory_slot(slot: ResourceSlot, size: u64) -> Self {
        Self::from_repr(Repr::SharedMemory(slot, size))
    }

    /// A transport endpoint label. Connection-local: the label re-resolves
    /// through the configured transport, it is not a transferable capability.
    pub fn endpoint(name: impl Into<String>) -> Self {
        Self::from_repr(Repr::Endpoint(name.into()))
    }

    /// An empty array.
    pub fn array() -> Self {
        Self::from_repr(Repr::Array(Vec::new()))
    }

    /// An array seeded with `items`.
    pub fn array_from(items: impl IntoIterator<Item = Value>) -> Self {
        Self::from_repr(Repr::Array(items.into_iter().collect()))
    }

    /// An empty dictionary.
    pub fn dictionary() -> Self {
        Self::from_repr(Repr::Dictionary(Vec::new()))
    }

    /// A dictionary seeded with `pairs`, applying the usual replace-in-place
    /// rule for repeated keys.
    pub fn dictionary_from<'k>(
        pairs: impl IntoIterator<Item = (&'k str, Value)>,
    ) -> Self {
        let mut dict = Self::dictionary();
        for (key, value) in pairs {
            // Infallible: dict is a dictionary by construction.
            let _ = dict.dict_set(key, value);
        }
        dict
    }

    /// An error sentinel with an explicit code and message.
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self::from_repr(Repr::Error(code, message.into()))
    }

    /// The canonical sentinel for an engine error code.
    pub fn error_code(code: ErrorCode) -> Self {
        Self::error(code.code(), code.message())
    }

    /// Variant tag.
    pub fn value_type(&self) -> ValueType {
        match &self.node.repr {
            Repr::Null => ValueType::Null,
            Repr::Bool(_) => ValueType::Bool,
            Repr::Int64(_) => ValueType::Int64,
            Repr::Uint64(_) => ValueType::Uint64,
            Repr::Double(_) => ValueType::Double,
            Repr::String(_) => ValueType::String,
            Repr::Data(_) => ValueType::Data,
            Repr::Uuid(_) => ValueType::Uuid,
            Repr::Date(_) => ValueType::Date,
            Repr::Fd(_) => ValueType::Fd,
            Repr::SharedMemory(..) => ValueType::SharedMemory,
            Repr::Endpoint(_) => ValueType::Endpoint,
            Repr::Array(_) => ValueType::Array,
            Repr::Dictionary(_) => ValueType::Dictionary,
            Repr::Error(..) => ValueType::Error,
        }
    }

    fn mismatch(&self, expected: ValueType) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            actual: self.value_type(),
        }
    }

    /// The boolean payload.
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match &self.node.repr {
            Repr::Bool(v) => Ok(*v),
            _ => Err(self.mismatch(ValueType::Bool)),
        }
    }

    /// The signed integer payload.
    pub fn as_int64(&self) -> Result<i64, ValueError> {
        match &self.node.repr {
            Repr::Int64(v) => Ok(*v),
            _ => Err(self.mismatch(ValueType::Int64)),
        }
    }

    /// The unsigned integer payload.
    pub fn as_uint64(&self) -> Result<u64, ValueError> {
        match &self.node.repr {
            Repr::Uint64(v) => Ok(*v),
            _ => Err(self.mismatch(ValueType::Uint64)),
        }
    }

    /// The double payload.
    pub fn as_double(&self) -> Result<f64, ValueError> {
        match &self.node.repr {
            Repr::Double(v) => Ok(*v),
            _ => Err(self.mismatch(ValueType::Double)),
        }
    }

    /// The string payload.
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match &self.node.repr {
            Repr::String(s) => Ok(s.as_str()),
            _ => Err(self.mismatch(ValueType::String)),
        }
    }

    /// The data payload.
    pub fn as_data(&self) -> Result<&[u8], ValueError> {
        match &self.node.repr {
            Repr::Data(b) => Ok(b),
            _ => Err(self.mismatch(ValueType::Data)),
        }
    }

    /// The UUID payload.
    pub fn as_uuid(&self) -> Result<&[u8; 16], ValueError> {
        match &self.node.repr {
            Repr::Uuid(u) => Ok(u),
            _ => Err(self.mismatch(ValueType::Uuid)),
        }
    }

    /// The date payload, nanoseconds since the epoch.
    pub fn as_date(&self) -> Result<i64, ValueError> {
        match &self.node.repr {
            Repr::Date(v) => Ok(*v),
            _ => Err(self.mismatch(ValueType::Date)),
        }
    }

    /// The fd value's handle slot.
    pub fn as_fd_slot(&self) -> Result<&ResourceSlot, ValueError> {
        match &self.node.repr {
            Repr::Fd(slot) => Ok(slot),
            _ => Err(self.mismatch(ValueType::Fd)),
        }
    }

    /// Move the fd out of an fd value. `None` if already drained.
    pub fn take_fd(&self) -> Result<Option<OwnedFd>, ValueError> {
        self.as_fd_slot().map(ResourceSlot::take)
    }

    /// The shared memory value's slot and size.
    pub fn as_shared_memory(&self) -> Result<(&ResourceSlot, u64), ValueError> {
        match &self.node.repr {
            Repr::SharedMemory(slot, size) => Ok((slot, *size)),
            _ => Err(self.mismatch(ValueType::SharedMemory)),
        }
    }

    /// The endpoint label.
    pub fn as_endpoint(&self) -> Result<&str, ValueError> {
        match &self.node.repr {
            Repr::Endpoint(name) => Ok(name),
            _ => Err(self.mismatch(ValueType::Endpoint)),
        }
    }

    /// The error payload: code and message.
    pub fn as_error(&self) -> Result<(u32, &str), ValueError> {
        match &self.node.repr {
            Repr::Error(code, message) => Ok((*code, message)),
            _ => Err(self.mismatch(ValueType::Error)),
        }
    }

    /// Whether this is an error sentinel carrying the given engine code.
    pub fn is_error_code(&self, code: ErrorCode) -> bool {
        matches!(&self.node.repr, Repr::Error(c, _) if *c == code.code())
    }

    /// Whether this value was produced by the decoder.
    pub fn is_from_wire(&self) -> bool {
        self.node.from_wire
    }

    /// Flag a decoded value as wire-born. Used by the codec.
    pub fn mark_from_wire(mut self) -> Self {
        Arc::make_mut(&mut self.node).from_wire = true;
        self
    }

    /// An empty dictionary suitable as a reply to `original`.
    ///
    /// `None` unless `original` is a dictionary that arrived over the wire.
    pub fn dictionary_create_reply(original: &Value) -> Option<Value> {
        match &original.node.repr {
            Repr::Dictionary(_) if original.node.from_wire => Some(Value::dictionary()),
            _ => None,
        }
    }

    /// Number of strong owners, for diagnostics and tests.
    pub fn owner_count(&self) -> usize {
        Arc::strong_count(&self.node)
    }

    pub(crate) fn make_mut(&mut self) -> &mut Repr {
        &mut Arc::make_mut(&mut self.node).repr
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::uint64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}
