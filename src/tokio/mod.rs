mod conn;

pub use conn::{Conn, QueryHandle, StreamId};
