use thiserror::Error;

use crate::protocol::response::ErrorPayload;

#[derive(Debug, Error)]
pub enum Error {
    /// An ERROR frame returned by the server for one request.
    /// Carried as data; the connection stays usable.
    #[error("Server error: {0}")]
    Server(#[from] ErrorPayload),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport failed while requests were in flight. Every pending
    /// job on the connection is completed with this error exactly once.
    #[error("Connection lost")]
    ConnectionLost,

    /// All 128 stream ids are in use. The connection stays usable;
    /// retry once an in-flight request completes.
    #[error("No free stream id")]
    Exhausted,

    /// The pending job was failed externally via `Conn::fail_pending`.
    #[error("Request aborted")]
    Aborted,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("Column not found: {0}")]
    NotFound(String),

    #[error("Column index {index} out of range (row has {len} columns)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Unexpected end of frame body")]
    UnexpectedEof,

    #[error("Invalid frame")]
    InvalidFrame,

    #[error("Bad config error: {0}")]
    BadConfig(String),
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;
