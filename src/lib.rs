pub mod codec;
pub mod constant;
pub mod error;
mod opts;
pub mod protocol;
pub mod rows;
pub mod tokio;

pub use codec::{CodecEntry, CodecRegistry, FromValue, Value, Varint};
pub use constant::Consistency;
pub use error::{Error, Result};
pub use opts::Opts;
pub use protocol::response::{Output, Prepared};
pub use rows::{Row, Rows};
pub use crate::tokio::Conn;

#[cfg(test)]
mod opts_test;
