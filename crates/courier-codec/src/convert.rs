//! Phase two: values to wire bytes and parsed trees back to values.
//!
//! Encoding walks the value tree in pre-order, draining fd and shared
//! memory slots into a resource table as it goes; the payload carries only
//! table indices. Decoding re-attaches received handles by index and marks
//! every produced value as wire-born.

use bytes::Bytes;

use courier_core::{Resource, ResourceSlot};
use courier_value::{ByteStr, Value, ValueError, ValueType};

use crate::node::NodeRef;
use crate::tag::{ext, RESOURCE_INDEX_NONE};
use crate::tree::Tree;
use crate::writer::Writer;
use crate::CodecError;

/// Nesting bound for the value conversion passes. The parse phase is
/// iterative and bounded by input length; conversion walks the tree
/// recursively, so it refuses depths no sane message reaches.
const MAX_DEPTH: usize = 512;

fn accessor_bug(_: ValueError) -> CodecError {
    CodecError::Bug("accessor disagreed with variant tag")
}

/// Encode `value`, appending to `out`.
///
/// Returns the resource table drained from the value tree, in pre-order.
/// Values that do not carry resources produce an empty table, and for them
/// encoding is a pure function.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<Vec<Resource>, CodecError> {
    let mut resources = Vec::new();
    let mut writer = Writer::new(out);
    write_value(&mut writer, value, &mut resources, 0)?;
    Ok(resources)
}

fn write_value(
    writer: &mut Writer<'_>,
    value: &Value,
    resources: &mut Vec<Resource>,
    depth: usize,
) -> Result<(), CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooBig("value nesting exceeds depth limit"));
    }

    match value.value_type() {
        ValueType::Null => writer.write_nil(),
        ValueType::Bool => writer.write_bool(value.as_bool().map_err(accessor_bug)?),
        ValueType::Int64 => writer.write_i64(value.as_int64().map_err(accessor_bug)?),
        ValueType::Uint64 => writer.write_u64(value.as_uint64().map_err(accessor_bug)?),
        ValueType::Double => writer.write_f64(value.as_double().map_err(accessor_bug)?),
        ValueType::String => writer.write_str(value.as_str().map_err(accessor_bug)?)?,
        ValueType::Data => writer.write_bin(value.as_data().map_err(accessor_bug)?)?,
        ValueType::Uuid => {
            writer.write_ext(ext::UUID, value.as_uuid().map_err(accessor_bug)?)?;
        }
        ValueType::Date => {
            let nanos = value.as_date().map_err(accessor_bug)?;
            writer.write_ext(ext::DATE, &nanos.to_be_bytes())?;
        }
        ValueType::Fd => {
            let slot = value.as_fd_slot().map_err(accessor_bug)?;
            let index = match slot.take() {
                Some(fd) => {
                    let index = resources.len() as u32;
                    resources.push(Resource::Fd(fd));
                    index
                }
                None => RESOURCE_INDEX_NONE,
            };
            writer.write_ext(ext::FD, &index.to_be_bytes())?;
        }
        ValueType::SharedMemory => {
            let (slot, size) = value.as_shared_memory().map_err(accessor_bug)?;
            let index = match slot.take() {
                Some(fd) => {
                    let index = resources.len() as u32;
                    resources.push(Resource::SharedMemory(fd, size));
                    index
                }
                None => RESOURCE_INDEX_NONE,
            };
            let mut payload = [0u8; 12];
            payload[0..4].copy_from_slice(&index.to_be_bytes());
            payload[4..12].copy_from_slice(&size.to_be_bytes());
            writer.write_ext(ext::SHMEM, &payload)?;
        }
        ValueType::Endpoint => {
            let name = value.as_endpoint().map_err(accessor_bug)?;
            writer.write_ext(ext::ENDPOINT, name.as_bytes())?;
        }
        ValueType::Error => {
            let (code, message) = value.as_error().map_err(accessor_bug)?;
            let mut payload = Vec::with_capacity(4 + message.len());
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(message.as_bytes());
            writer.write_ext(ext::ERROR, &payload)?;
        }
        ValueType::Array => {
            let len = value.array_len().map_err(accessor_bug)?;
            writer.start_array(len)?;
            for child in value.array_iter() {
                write_value(writer, child, resources, depth + 1)?;
            }
        }
        ValueType::Dictionary => {
            let len = value.dict_len().map_err(accessor_bug)?;
            writer.start_map(len)?;
            for (key, child) in value.dict_iter() {
                writer.write_str(key)?;
                write_value(writer, child, resources, depth + 1)?;
            }
        }
    }
    Ok(())
}

/// Decode one value from `input` with no resource table. Fd and shared
/// memory placeholders come out drained.
pub fn decode_value(input: &Bytes) -> Result<Value, CodecError> {
    decode_value_with_resources(input, Vec::new())
}

/// Decode one value from `input`, re-attaching `resources` by table index.
///
/// The decoded tree holds zero-copy slices of `input`; cloning `Bytes` is
/// how the buffer stays alive as long as the values that reference it.
pub fn decode_value_with_resources(
    input: &Bytes,
    resources: Vec<Resource>,
) -> Result<Value, CodecError> {
    let tree = Tree::parse(input.clone())?;
    let mut table: Vec<Option<Resource>> = resources.into_iter().map(Some).collect();
    node_to_value(tree.root(), &mut table, 0)
}

fn node_to_value(
    node: NodeRef<'_>,
    table: &mut Vec<Option<Resource>>,
    depth: usize,
) -> Result<Value, CodecError> {
    use crate::tree::NodeData;

    if depth > MAX_DEPTH {
        return Err(CodecError::TooBig("input nesting exceeds depth limit"));
    }

    let value = match node.data() {
        NodeData::Nil => Value::null(),
        NodeData::Bool(v) => Value::boolean(v),
        NodeData::Uint(v) => Value::uint64(v),
        NodeData::Int(v) => Value::int64(v),
        NodeData::Double(v) => Value::double(v),
        NodeData::Str { .. } => {
            let bytes = node.str_bytes()?;
            let s = ByteStr::from_utf8(bytes)
                .map_err(|_| CodecError::Invalid("string payload is not UTF-8"))?;
            Value::string_bytes(s)
        }
        NodeData::Bin { .. } => Value::data(node.bin_bytes()?),
        NodeData::Ext { .. } => {
            let (ext_type, payload) = node.ext()?;
            ext_to_value(ext_type, &payload, table)?
        }
        NodeData::Array(_) => {
            let len = node.array_len()?;
            let mut array = Value::array();
            for index in 0..len {
                let child = node_to_value(node.array_at(index)?, table, depth + 1)?;
                array
                    .array_append(child)
                    .map_err(accessor_bug)?;
            }
            array
        }
        NodeData::Map(_) => {
            let len = node.map_len()?;
            let mut dict = Value::dictionary();
            for index in 0..len {
                let key_bytes = node.map_key_at(index)?.str_bytes().map_err(|_| {
                    CodecError::Type("map key must be a string")
                })?;
                let key = ByteStr::from_utf8(key_bytes)
                    .map_err(|_| CodecError::Invalid("map key is not UTF-8"))?;
                let child = node_to_value(node.map_value_at(index)?, table, depth + 1)?;
                // Duplicate keys: last occurrence wins, first position kept,
                // the same rule as dict_set.
                dict.dict_set(key.as_str(), child).map_err(accessor_bug)?;
            }
            dict
        }
    };

    Ok(value.mark_from_wire())
}

fn take_resource(table: &mut [Option<Resource>], index: u32) -> ResourceSlot {
    if index == RESOURCE_INDEX_NONE {
        return ResourceSlot::empty();
    }
    match table.get_mut(index as usize).and_then(Option::take) {
        Some(resource) => ResourceSlot::new(resource.into_fd()),
        None => ResourceSlot::empty(),
    }
}

fn ext_to_value(
    ext_type: i8,
    payload: &Bytes,
    table: &mut [Option<Resource>],
) -> Result<Value, CodecError> {
    match ext_type {
        ext::UUID => {
            let bytes: [u8; 16] = payload[..]
                .try_into()
                .map_err(|_| CodecError::Invalid("uuid payload must be 16 bytes"))?;
            Ok(Value::uuid(bytes))
        }
        ext::DATE => {
            let bytes: [u8; 8] = payload[..]
                .try_into()
                .map_err(|_| CodecError::Invalid("date payload must be 8 bytes"))?;
            Ok(Value::date(i64::from_be_bytes(bytes)))
        }
        ext::FD => {
            let bytes: [u8; 4] = payload[..]
                .try_into()
                .map_err(|_| CodecError::Invalid("fd payload must be 4 bytes"))?;
            Ok(Value::fd_slot(take_resource(table, u32::from_be_bytes(bytes))))
        }
        ext::SHMEM => {
            if payload.len() != 12 {
                return Err(CodecError::Invalid("shmem payload must be 12 bytes"));
            }
            let mut index = [0u8; 4];
            index.copy_from_slice(&payload[0..4]);
            let mut size = [0u8; 8];
            size.copy_from_slice(&payload[4..12]);
            Ok(Value::shared_memory_slot(
                take_resource(table, u32::from_be_bytes(index)),
                u64::from_be_bytes(size),
            ))
        }
        ext::ENDPOINT => {
            let name = std::str::from_utf8(payload)
                .map_err(|_| CodecError::Invalid("endpoint name is not UTF-8"))?;
            Ok(Value::endpoint(name))
        }
        ext::ERROR => {
            if payload.len() < 4 {
                return Err(CodecError::Invalid("error payload shorter than its code"));
            }
            let mut code = [0u8; 4];
            code.copy_from_slice(&payload[0..4]);
            let message = std::str::from_utf8(&payload[4..])
                .map_err(|_| CodecError::Invalid("error message is not UTF-8"))?;
            Ok(Value::error(u32::from_be_bytes(code), message))
        }
        _ => Err(CodecError::Invalid("unknown extension type")),
    }
}
