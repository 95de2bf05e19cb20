//! Inbound frame classification.
//!
//! [`parse`] is the single dispatch point from raw response frames to typed
//! variants; nothing outside this module interprets body bytes directly. An
//! ERROR frame is returned as data, not as `Err`; the multiplexer decides
//! how to surface it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::codec::CodecRegistry;
use crate::constant::{Consistency, Opcode, error_code, result_kind};
use crate::error::{Error, Result};
use crate::protocol::frame::ResponseFrame;
use crate::protocol::primitive::*;
use crate::rows::{Metadata, Rows, parse_rows, read_metadata};

/// A classified response frame
#[derive(Debug)]
pub enum Response {
    Ready,
    /// Authentication required; carries the authenticator class name
    Authenticate(String),
    Supported(HashMap<String, Vec<String>>),
    Result(Output),
    Error(ErrorPayload),
    Event(Event),
}

/// RESULT body variants
#[derive(Debug)]
pub enum Output {
    Void,
    Rows(Rows),
    SetKeyspace(String),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

/// A prepared-statement descriptor: server-assigned id plus the parameter
/// metadata used to encode EXECUTE values
#[derive(Debug, Clone)]
pub struct Prepared {
    pub id: Vec<u8>,
    pub metadata: Arc<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub change: String,
    pub keyspace: String,
    pub table: String,
}

/// ERROR frame payload. Code and message are preserved verbatim for the
/// caller; codes with documented extra fields carry them in `detail`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("ERROR {code:#06x}: {message}")]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
    pub detail: Option<ErrorDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    Unavailable {
        consistency: Consistency,
        required: i32,
        alive: i32,
    },
    WriteTimeout {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        write_type: String,
    },
    ReadTimeout {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        data_present: bool,
    },
}

/// Server-push event (stream id -1, delivered after REGISTER)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TopologyChange { change: String, node: SocketAddr },
    StatusChange { change: String, node: SocketAddr },
    SchemaChange(SchemaChange),
}

/// Classify a raw response frame into its typed variant
pub fn parse(frame: &ResponseFrame, registry: &CodecRegistry) -> Result<Response> {
    let body = &frame.body[..];
    let opcode = Opcode::from_u8(frame.opcode).ok_or_else(|| {
        Error::ProtocolViolation(format!("unrecognized opcode {:#04x}", frame.opcode))
    })?;

    match opcode {
        Opcode::Ready => Ok(Response::Ready),
        Opcode::Authenticate => {
            let (authenticator, _) = read_string(body)?;
            Ok(Response::Authenticate(authenticator.to_string()))
        }
        Opcode::Supported => {
            let (options, _) = read_string_multimap(body)?;
            Ok(Response::Supported(options))
        }
        Opcode::Result => Ok(Response::Result(parse_result(body, registry)?)),
        Opcode::Error => Ok(Response::Error(parse_error(body)?)),
        Opcode::Event => Ok(Response::Event(parse_event(body)?)),
        // Request opcodes can never arrive on a response frame.
        Opcode::Startup
        | Opcode::Credentials
        | Opcode::Options
        | Opcode::Query
        | Opcode::Prepare
        | Opcode::Execute
        | Opcode::Register => Err(Error::ProtocolViolation(format!(
            "request opcode {opcode:?} in response frame"
        ))),
    }
}

fn parse_result(body: &[u8], registry: &CodecRegistry) -> Result<Output> {
    let (kind, rest) = read_int(body)?;
    match kind {
        result_kind::VOID => Ok(Output::Void),
        result_kind::ROWS => Ok(Output::Rows(parse_rows(registry, rest)?)),
        result_kind::SET_KEYSPACE => {
            let (keyspace, _) = read_string(rest)?;
            Ok(Output::SetKeyspace(keyspace.to_string()))
        }
        result_kind::PREPARED => {
            let (id, rest) = read_short_bytes(rest)?;
            let (metadata, _) = read_metadata(rest)?;
            Ok(Output::Prepared(Prepared {
                id: id.to_vec(),
                metadata: Arc::new(metadata),
            }))
        }
        result_kind::SCHEMA_CHANGE => {
            let (change, _) = read_schema_change(rest)?;
            Ok(Output::SchemaChange(change))
        }
        other => Err(Error::ProtocolViolation(format!(
            "unrecognized result kind {other:#06x}"
        ))),
    }
}

fn read_consistency(data: &[u8]) -> Result<(Consistency, &[u8])> {
    let (raw, rest) = read_short(data)?;
    let consistency = Consistency::from_u16(raw).ok_or_else(|| {
        Error::ProtocolViolation(format!("unrecognized consistency code {raw:#06x}"))
    })?;
    Ok((consistency, rest))
}

fn parse_error(body: &[u8]) -> Result<ErrorPayload> {
    let (code, rest) = read_int(body)?;
    let (message, rest) = read_string(rest)?;
    let detail = match code {
        error_code::UNAVAILABLE => {
            let (consistency, rest) = read_consistency(rest)?;
            let (required, rest) = read_int(rest)?;
            let (alive, _) = read_int(rest)?;
            Some(ErrorDetail::Unavailable {
                consistency,
                required,
                alive,
            })
        }
        error_code::WRITE_TIMEOUT => {
            let (consistency, rest) = read_consistency(rest)?;
            let (received, rest) = read_int(rest)?;
            let (block_for, rest) = read_int(rest)?;
            let (write_type, _) = read_string(rest)?;
            Some(ErrorDetail::WriteTimeout {
                consistency,
                received,
                block_for,
                write_type: write_type.to_string(),
            })
        }
        error_code::READ_TIMEOUT => {
            let (consistency, rest) = read_consistency(rest)?;
            let (received, rest) = read_int(rest)?;
            let (block_for, rest) = read_int(rest)?;
            let (data_present, _) = read_byte(rest)?;
            Some(ErrorDetail::ReadTimeout {
                consistency,
                received,
                block_for,
                data_present: data_present != 0,
            })
        }
        _ => None,
    };

    Ok(ErrorPayload {
        code,
        message: message.to_string(),
        detail,
    })
}

fn read_schema_change(data: &[u8]) -> Result<(SchemaChange, &[u8])> {
    let (change, rest) = read_string(data)?;
    let (keyspace, rest) = read_string(rest)?;
    let (table, rest) = read_string(rest)?;
    Ok((
        SchemaChange {
            change: change.to_string(),
            keyspace: keyspace.to_string(),
            table: table.to_string(),
        },
        rest,
    ))
}

fn parse_event(body: &[u8]) -> Result<Event> {
    let (event_type, rest) = read_string(body)?;
    match event_type {
        "TOPOLOGY_CHANGE" => {
            let (change, rest) = read_string(rest)?;
            let (node, _) = read_inet(rest)?;
            Ok(Event::TopologyChange {
                change: change.to_string(),
                node,
            })
        }
        "STATUS_CHANGE" => {
            let (change, rest) = read_string(rest)?;
            let (node, _) = read_inet(rest)?;
            Ok(Event::StatusChange {
                change: change.to_string(),
                node,
            })
        }
        "SCHEMA_CHANGE" => {
            let (change, _) = read_schema_change(rest)?;
            Ok(Event::SchemaChange(change))
        }
        other => Err(Error::ProtocolViolation(format!(
            "unrecognized event type {other:?}"
        ))),
    }
}
