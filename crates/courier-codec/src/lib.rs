#![doc = include_str!("../README.md")]
#![forbid(unsafe_op_in_unsafe_fn)]

mod convert;
mod error;
mod node;
pub mod tag;
mod tree;
mod writer;

pub use convert::{decode_value, decode_value_with_resources, encode_value};
pub use error::CodecError;
pub use node::NodeRef;
pub use tree::Tree;
pub use writer::Writer;

use bytes::Bytes;
use courier_core::Resource;
use courier_value::Value;

/// Encode `value` into a fresh buffer.
///
/// Returns the payload bytes and the resource table drained from the value
/// tree (empty for resource-free values).
pub fn encode(value: &Value) -> Result<(Vec<u8>, Vec<Resource>), CodecError> {
    let mut out = Vec::new();
    let resources = encode_value(value, &mut out)?;
    Ok((out, resources))
}

/// Decode one value. See [`decode_value_with_resources`] for the variant
/// that re-attaches received descriptors.
pub fn decode(input: &Bytes) -> Result<Value, CodecError> {
    decode_value(input)
}
