//! Cursor access into a parsed [`Tree`](crate::Tree).

use bytes::Bytes;

use crate::tree::{NodeData, Tree};
use crate::CodecError;

/// A lightweight cursor over one node of a parsed tree.
#[derive(Clone, Copy)]
pub struct NodeRef<'t> {
    pub(crate) tree: &'t Tree,
    pub(crate) page: u32,
    pub(crate) index: u32,
}

impl<'t> NodeRef<'t> {
    pub(crate) fn data(&self) -> NodeData {
        self.tree.node(self.page, self.index)
    }

    /// Whether this node is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self.data(), NodeData::Nil)
    }

    /// Boolean payload.
    pub fn as_bool(&self) -> Result<bool, CodecError> {
        match self.data() {
            NodeData::Bool(v) => Ok(v),
            _ => Err(CodecError::Type("expected bool node")),
        }
    }

    /// Unsigned integer payload.
    pub fn as_u64(&self) -> Result<u64, CodecError> {
        match self.data() {
            NodeData::Uint(v) => Ok(v),
            _ => Err(CodecError::Type("expected uint node")),
        }
    }

    /// Signed integer payload.
    pub fn as_i64(&self) -> Result<i64, CodecError> {
        match self.data() {
            NodeData::Int(v) => Ok(v),
            _ => Err(CodecError::Type("expected int node")),
        }
    }

    /// Double payload.
    pub fn as_f64(&self) -> Result<f64, CodecError> {
        match self.data() {
            NodeData::Double(v) => Ok(v),
            _ => Err(CodecError::Type("expected double node")),
        }
    }

    /// String payload as a zero-copy byte slice. UTF-8 validation happens
    /// at value conversion, once.
    pub fn str_bytes(&self) -> Result<Bytes, CodecError> {
        match self.data() {
            NodeData::Str { offset, len } => Ok(self.tree.slice(offset, len)),
            _ => Err(CodecError::Type("expected str node")),
        }
    }

    /// Binary payload as a zero-copy byte slice.
    pub fn bin_bytes(&self) -> Result<Bytes, CodecError> {
        match self.data() {
            NodeData::Bin { offset, len } => Ok(self.tree.slice(offset, len)),
            _ => Err(CodecError::Type("expected bin node")),
        }
    }

    /// Extension payload: type byte plus zero-copy bytes.
    pub fn ext(&self) -> Result<(i8, Bytes), CodecError> {
        match self.data() {
            NodeData::Ext {
                ext_type,
                offset,
                len,
            } => Ok((ext_type, self.tree.slice(offset, len))),
            _ => Err(CodecError::Type("expected ext node")),
        }
    }

    /// Array element count.
    pub fn array_len(&self) -> Result<usize, CodecError> {
        match self.data() {
            NodeData::Array(children) => Ok(children.count as usize),
            _ => Err(CodecError::Type("expected array node")),
        }
    }

    /// Array element by index.
    pub fn array_at(&self, index: usize) -> Result<NodeRef<'t>, CodecError> {
        match self.data() {
            NodeData::Array(children) => {
                if index >= children.count as usize {
                    return Err(CodecError::Type("array index out of bounds"));
                }
                Ok(NodeRef {
                    tree: self.tree,
                    page: children.page,
                    index: children.start + index as u32,
                })
            }
            _ => Err(CodecError::Type("expected array node")),
        }
    }

    /// Map pair count.
    pub fn map_len(&self) -> Result<usize, CodecError> {
        match self.data() {
            NodeData::Map(children) => Ok((children.count / 2) as usize),
            _ => Err(CodecError::Type("expected map node")),
        }
    }

    /// Key node of the `index`-th pair.
    pub fn map_key_at(&self, index: usize) -> Result<NodeRef<'t>, CodecError> {
        self.map_slot(index, 0)
    }

    /// Value node of the `index`-th pair.
    pub fn map_value_at(&self, index: usize) -> Result<NodeRef<'t>, CodecError> {
        self.map_slot(index, 1)
    }

    fn map_slot(&self, index: usize, which: u32) -> Result<NodeRef<'t>, CodecError> {
        match self.data() {
            NodeData::Map(children) => {
                if index >= (children.count / 2) as usize {
                    return Err(CodecError::Type("map index out of bounds"));
                }
                Ok(NodeRef {
                    tree: self.tree,
                    page: children.page,
                    index: children.start + 2 * index as u32 + which,
                })
            }
            _ => Err(CodecError::Type("expected map node")),
        }
    }
}
