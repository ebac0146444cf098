#![doc = include_str!("../README.md")]
#![forbid(unsafe_op_in_unsafe_fn)]

mod connection;
mod error;
mod pipe;

pub use connection::{Connection, ConnectionFlags, Message};
pub use error::Error;
pub use pipe::{pipe_recv, pipe_send};

// Re-export the layers beneath the connection API.
pub use courier_codec::{decode, encode, CodecError};
pub use courier_core::{
    Credentials, ErrorCode, FrameError, FrameHeader, Inbound, Listener, Port, Resource,
    ResourceSlot, SerialQueue, Source, Transport, TransportError, FRAME_HEADER_SIZE,
    PROTOCOL_VERSION,
};
pub use courier_value::{ByteStr, Value, ValueError, ValueType};

/// Convenient imports for typical users.
///
/// ```ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Connection, ConnectionFlags, Credentials, ErrorCode, Message, SerialQueue, Transport,
        Value, ValueType,
    };
}
