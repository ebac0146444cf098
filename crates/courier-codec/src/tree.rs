//! Phase one of decoding: byte stream to node tree.
//!
//! The parser is iterative, not recursive: a stack of levels tracks how many
//! children remain to fill at each depth. Nodes live in a paged pool; a
//! compound node's children are always contiguous within one allocation so
//! child access is an index add.
//!
//! Allocation is bounded by the *possible-nodes-left* counter. It starts at
//! the input length; every consumed byte and every reserved child slot
//! decrements it (each future node occupies at least its one tag byte). A
//! header that declares more children than the counter allows is rejected
//! before any child allocation happens, so hostile headers cannot force the
//! pool to balloon: total node count never exceeds the input length.

use bytes::Bytes;

use crate::node::NodeRef;
use crate::{tag, CodecError};

/// Nodes per pool page.
pub(crate) const NODE_PAGE_SIZE: usize = 1024;

/// Initial capacity of the level stack; grows geometrically when nesting
/// exceeds it.
const INITIAL_DEPTH: usize = 32;

/// Location of a node's children inside the pool.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChildrenRef {
    pub(crate) page: u32,
    pub(crate) start: u32,
    /// Number of child nodes (keys and values both count for maps).
    pub(crate) count: u32,
}

/// One parsed node. String-ish payloads reference the input buffer by
/// offset; nothing is copied.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) enum NodeData {
    #[default]
    Nil,
    Bool(bool),
    Uint(u64),
    Int(i64),
    Double(f64),
    Str {
        offset: usize,
        len: usize,
    },
    Bin {
        offset: usize,
        len: usize,
    },
    Ext {
        ext_type: i8,
        offset: usize,
        len: usize,
    },
    Array(ChildrenRef),
    Map(ChildrenRef),
}

/// The paged node pool.
///
/// Small child blocks are carved out of the current page. When a block does
/// not fit, the remaining-slots heuristic decides between starting a fresh
/// page (wasting the tail of the old one, at most one eighth) and giving
/// the block its own exactly-sized allocation.
struct Pool {
    pages: Vec<Vec<NodeData>>,
    current: usize,
    pos: usize,
    left: usize,
}

impl Pool {
    fn new() -> Self {
        Self {
            pages: vec![vec![NodeData::Nil; NODE_PAGE_SIZE]],
            current: 0,
            pos: 0,
            left: NODE_PAGE_SIZE,
        }
    }

    fn alloc(&mut self, total: usize) -> ChildrenRef {
        if total <= self.left {
            let children = ChildrenRef {
                page: self.current as u32,
                start: self.pos as u32,
                count: total as u32,
            };
            self.pos += total;
            self.left -= total;
            children
        } else if total > NODE_PAGE_SIZE || self.left > NODE_PAGE_SIZE / 8 {
            // Dedicated, exactly-sized block; the current page keeps
            // serving later small allocations.
            self.pages.push(vec![NodeData::Nil; total]);
            ChildrenRef {
                page: (self.pages.len() - 1) as u32,
                start: 0,
                count: total as u32,
            }
        } else {
            // Waste the little that is left and start a fresh page.
            self.pages.push(vec![NodeData::Nil; NODE_PAGE_SIZE]);
            self.current = self.pages.len() - 1;
            self.pos = total;
            self.left = NODE_PAGE_SIZE - total;
            ChildrenRef {
                page: self.current as u32,
                start: 0,
                count: total as u32,
            }
        }
    }
}

#[derive(Clone, Copy)]
struct Level {
    page: u32,
    index: u32,
    left: u32,
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
    possible_nodes_left: usize,
}

impl Parser<'_> {
    fn take_u8(&mut self) -> Result<u8, CodecError> {
        if self.possible_nodes_left < 1 {
            return Err(CodecError::Invalid("truncated input"));
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        self.possible_nodes_left -= 1;
        Ok(byte)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        if self.possible_nodes_left < N {
            return Err(CodecError::Invalid("truncated input"));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        self.possible_nodes_left -= N;
        Ok(out)
    }

    fn take_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    fn take_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    fn take_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    /// Claim `len` payload bytes, returning their offset.
    fn take_bytes(&mut self, len: usize) -> Result<usize, CodecError> {
        if self.possible_nodes_left < len {
            return Err(CodecError::Invalid("truncated payload"));
        }
        let offset = self.pos;
        self.pos += len;
        self.possible_nodes_left -= len;
        Ok(offset)
    }
}

/// A fully parsed input.
///
/// The tree borrows nothing: string and binary nodes hold offsets into the
/// shared input [`Bytes`], so slices handed out later are zero-copy views
/// that keep the buffer alive.
#[derive(Debug)]
pub struct Tree {
    input: Bytes,
    pages: Vec<Vec<NodeData>>,
    root: (u32, u32),
    node_count: usize,
}

impl Tree {
    /// Parse one complete value from `input`. Trailing bytes are ignored;
    /// the frame layer already bounds the payload.
    pub fn parse(input: Bytes) -> Result<Self, CodecError> {
        if input.is_empty() {
            return Err(CodecError::Invalid("empty input"));
        }

        let mut pool = Pool::new();
        let root = pool.alloc(1);
        let mut node_count = 1usize;

        let mut parser = Parser {
            data: &input,
            pos: 0,
            possible_nodes_left: input.len(),
        };
        // The root slot's tag byte is pre-counted, mirroring the child
        // reservation accounting below.
        parser.possible_nodes_left -= 1;

        let mut stack: Vec<Level> = Vec::with_capacity(INITIAL_DEPTH);
        stack.push(Level {
            page: root.page,
            index: root.start,
            left: 1,
        });

        loop {
            let (page, index) = {
                let top = match stack.last_mut() {
                    Some(top) => top,
                    None => return Err(CodecError::Bug("level stack underflow")),
                };
                let slot = (top.page, top.index);
                top.left -= 1;
                top.index += 1;
                slot
            };

            // The slot's tag byte was counted when the slot was reserved;
            // give it back before consuming it for real.
            parser.possible_nodes_left += 1;
            let tag_byte = parser.take_u8()?;

            let node = match tag_byte {
                0x00..=0x7f => NodeData::Uint(u64::from(tag_byte)),
                0xe0..=0xff => NodeData::Int(i64::from(tag_byte as i8)),
                tag::FIXMAP_BASE..=tag::FIXMAP_MAX => {
                    let pairs = usize::from(tag_byte & 0x0f);
                    reserve_map(&mut parser, &mut pool, &mut stack, &mut node_count, pairs)?
                }
                tag::FIXARRAY_BASE..=tag::FIXARRAY_MAX => {
                    let count = usize::from(tag_byte & 0x0f);
                    reserve_array(&mut parser, &mut pool, &mut stack, &mut node_count, count)?
                }
                tag::FIXSTR_BASE..=tag::FIXSTR_MAX => {
                    let len = usize::from(tag_byte & 0x1f);
                    let offset = parser.take_bytes(len)?;
                    NodeData::Str { offset, len }
                }
                tag::NIL => NodeData::Nil,
                tag::RESERVED => return Err(CodecError::Invalid("reserved tag byte 0xc1")),
                tag::FALSE => NodeData::Bool(false),
                tag::TRUE => NodeData::Bool(true),
                tag::BIN8 => {
                    let len = usize::from(parser.take_u8()?);
                    let offset = parser.take_bytes(len)?;
                    NodeData::Bin { offset, len }
                }
                tag::BIN16 => {
                    let len = usize::from(parser.take_u16()?);
                    let offset = parser.take_bytes(len)?;
                    NodeData::Bin { offset, len }
                }
                tag::BIN32 => {
                    let len = parser.take_u32()? as usize;
                    let offset = parser.take_bytes(len)?;
                    NodeData::Bin { offset, len }
                }
                tag::EXT8 => {
                    let len = usize::from(parser.take_u8()?);
                    take_ext(&mut parser, len)?
                }
                tag::EXT16 => {
                    let len = usize::from(parser.take_u16()?);
                    take_ext(&mut parser, len)?
                }
                tag::EXT32 => {
                    let len = parser.take_u32()? as usize;
                    take_ext(&mut parser, len)?
                }
                tag::FLOAT32 => {
                    let bits = parser.take_u32()?;
                    NodeData::Double(f64::from(f32::from_bits(bits)))
                }
                tag::FLOAT64 => {
                    let bits = parser.take_u64()?;
                    NodeData::Double(f64::from_bits(bits))
                }
                tag::UINT8 => NodeData::Uint(u64::from(parser.take_u8()?)),
                tag::UINT16 => NodeData::Uint(u64::from(parser.take_u16()?)),
                tag::UINT32 => NodeData::Uint(u64::from(parser.take_u32()?)),
                tag::UINT64 => NodeData::Uint(parser.take_u64()?),
                tag::INT8 => NodeData::Int(i64::from(parser.take_u8()? as i8)),
                tag::INT16 => NodeData::Int(i64::from(parser.take_u16()? as i16)),
                tag::INT32 => NodeData::Int(i64::from(parser.take_u32()? as i32)),
                tag::INT64 => NodeData::Int(parser.take_u64()? as i64),
                tag::FIXEXT1 => take_ext(&mut parser, 1)?,
                tag::FIXEXT2 => take_ext(&mut parser, 2)?,
                tag::FIXEXT4 => take_ext(&mut parser, 4)?,
                tag::FIXEXT8 => take_ext(&mut parser, 8)?,
                tag::FIXEXT16 => take_ext(&mut parser, 16)?,
                tag::STR8 => {
                    let len = usize::from(parser.take_u8()?);
                    let offset = parser.take_bytes(len)?;
                    NodeData::Str { offset, len }
                }
                tag::STR16 => {
                    let len = usize::from(parser.take_u16()?);
                    let offset = parser.take_bytes(len)?;
                    NodeData::Str { offset, len }
                }
                tag::STR32 => {
                    let len = parser.take_u32()? as usize;
                    let offset = parser.take_bytes(len)?;
                    NodeData::Str { offset, len }
                }
                tag::ARRAY16 => {
                    let count = usize::from(parser.take_u16()?);
                    reserve_array(&mut parser, &mut pool, &mut stack, &mut node_count, count)?
                }
                tag::ARRAY32 => {
                    let count = parser.take_u32()? as usize;
                    reserve_array(&mut parser, &mut pool, &mut stack, &mut node_count, count)?
                }
                tag::MAP16 => {
                    let pairs = usize::from(parser.take_u16()?);
                    reserve_map(&mut parser, &mut pool, &mut stack, &mut node_count, pairs)?
                }
                tag::MAP32 => {
                    let pairs = parser.take_u32()? as usize;
                    reserve_map(&mut parser, &mut pool, &mut stack, &mut node_count, pairs)?
                }
            };

            pool.pages[page as usize][index as usize] = node;

            // Unwind levels whose children are all filled.
            while stack.last().is_some_and(|level| level.left == 0) {
                stack.pop();
                if stack.is_empty() {
                    return Ok(Tree {
                        input,
                        pages: pool.pages,
                        root: (root.page, root.start),
                        node_count,
                    });
                }
            }
        }
    }

    /// The root node.
    pub fn root(&self) -> NodeRef<'_> {
        NodeRef {
            tree: self,
            page: self.root.0,
            index: self.root.1,
        }
    }

    /// Total nodes allocated for this input. Never exceeds the input's byte
    /// length.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub(crate) fn node(&self, page: u32, index: u32) -> NodeData {
        self.pages[page as usize][index as usize]
    }

    /// Zero-copy view of payload bytes.
    pub(crate) fn slice(&self, offset: usize, len: usize) -> Bytes {
        self.input.slice(offset..offset + len)
    }
}

fn take_ext(parser: &mut Parser<'_>, len: usize) -> Result<NodeData, CodecError> {
    let ext_type = parser.take_u8()? as i8;
    let offset = parser.take_bytes(len)?;
    Ok(NodeData::Ext {
        ext_type,
        offset,
        len,
    })
}

fn reserve_children(
    parser: &mut Parser<'_>,
    pool: &mut Pool,
    stack: &mut Vec<Level>,
    node_count: &mut usize,
    total: usize,
) -> Result<ChildrenRef, CodecError> {
    // Every future node occupies at least one byte; a header that promises
    // more children than that can cover is lying.
    if total > parser.possible_nodes_left {
        return Err(CodecError::Invalid(
            "compound header declares more children than the input holds",
        ));
    }
    parser.possible_nodes_left -= total;
    *node_count += total;

    let children = pool.alloc(total);
    stack.push(Level {
        page: children.page,
        index: children.start,
        left: total as u32,
    });
    Ok(children)
}

fn reserve_array(
    parser: &mut Parser<'_>,
    pool: &mut Pool,
    stack: &mut Vec<Level>,
    node_count: &mut usize,
    count: usize,
) -> Result<NodeData, CodecError> {
    let children = reserve_children(parser, pool, stack, node_count, count)?;
    Ok(NodeData::Array(children))
}

fn reserve_map(
    parser: &mut Parser<'_>,
    pool: &mut Pool,
    stack: &mut Vec<Level>,
    node_count: &mut usize,
    pairs: usize,
) -> Result<NodeData, CodecError> {
    let total = pairs
        .checked_mul(2)
        .ok_or(CodecError::TooBig("map pair count overflows"))?;
    let children = reserve_children(parser, pool, stack, node_count, total)?;
    Ok(NodeData::Map(children))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Result<Tree, CodecError> {
        Tree::parse(Bytes::copy_from_slice(bytes))
    }

    #[test]
    fn scalar_roots() {
        assert!(matches!(parse(&[0xc0]).unwrap().root().data(), NodeData::Nil));
        assert!(matches!(
            parse(&[0x2a]).unwrap().root().data(),
            NodeData::Uint(42)
        ));
        assert!(matches!(
            parse(&[0xff]).unwrap().root().data(),
            NodeData::Int(-1)
        ));
    }

    #[test]
    fn hostile_map32_header_is_rejected_without_allocation() {
        // map32 claiming 2^32 - 1 entries, then nothing.
        let err = parse(&[0xdf, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CodecError::Invalid(_)));
    }

    #[test]
    fn hostile_nested_map_headers_are_rejected() {
        // Repeated map16 headers each claiming 0xffff entries.
        let mut bytes = Vec::new();
        for _ in 0..6 {
            bytes.extend_from_slice(&[0xde, 0xff, 0xff]);
        }
        assert!(matches!(
            parse(&bytes).unwrap_err(),
            CodecError::Invalid(_)
        ));
    }

    #[test]
    fn reserved_byte_is_invalid() {
        assert!(matches!(
            parse(&[0xc1]).unwrap_err(),
            CodecError::Invalid(_)
        ));
    }

    #[test]
    fn truncated_string_is_invalid() {
        // fixstr of length 5 with only two payload bytes.
        assert!(matches!(
            parse(&[0xa5, b'h', b'i']).unwrap_err(),
            CodecError::Invalid(_)
        ));
    }

    #[test]
    fn truncated_fixed_width_is_invalid() {
        assert!(matches!(
            parse(&[0xcd, 0x01]).unwrap_err(),
            CodecError::Invalid(_)
        ));
    }

    #[test]
    fn node_count_is_bounded_by_input_length() {
        // A legitimate nested value.
        let mut bytes = vec![0x91]; // array of 1
        bytes.push(0x92); // array of 2
        bytes.push(0x01);
        bytes.push(0x02);
        let tree = parse(&bytes).unwrap();
        assert!(tree.node_count() <= bytes.len());
    }

    #[test]
    fn deep_nesting_parses_iteratively() {
        // 1000 nested single-element arrays around one integer; deeper than
        // any recursion-based parser's stack would enjoy.
        let mut bytes = vec![0x91; 1000];
        bytes.push(0x07);
        let tree = parse(&bytes).unwrap();
        assert!(tree.node_count() <= bytes.len());

        let mut node = tree.root();
        for _ in 0..1000 {
            node = node.array_at(0).unwrap();
        }
        assert!(matches!(node.data(), NodeData::Uint(7)));
    }

    #[test]
    fn dedicated_block_for_oversized_children() {
        // An array with more elements than one page holds.
        let count = NODE_PAGE_SIZE + 10;
        let mut bytes = vec![0xdc];
        bytes.extend_from_slice(&(count as u16).to_be_bytes());
        bytes.extend(std::iter::repeat_n(0x01u8, count));
        let tree = parse(&bytes).unwrap();
        assert_eq!(tree.root().array_len().unwrap(), count);
        for i in [0, 1, count - 1] {
            assert!(matches!(
                tree.root().array_at(i).unwrap().data(),
                NodeData::Uint(1)
            ));
        }
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let tree = parse(&[0x01, 0x02, 0x03]).unwrap();
        assert!(matches!(tree.root().data(), NodeData::Uint(1)));
    }
}
