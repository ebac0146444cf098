#![doc = include_str!("../README.md")]
#![forbid(unsafe_op_in_unsafe_fn)]

mod array;
mod compare;
mod describe;
mod dict;
mod error;
mod string;
mod value;

pub use error::*;
pub use string::*;
pub use value::*;

pub use courier_core::ErrorCode;
