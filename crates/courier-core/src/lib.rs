#![doc = include_str!("../README.md")]
#![forbid(unsafe_op_in_unsafe_fn)]

mod credentials;
mod error;
mod frame;
mod queue;
mod resource;
mod source;
mod transport;

pub use credentials::*;
pub use error::*;
pub use frame::*;
pub use queue::*;
pub use resource::*;
pub use source::*;
pub use transport::*;
