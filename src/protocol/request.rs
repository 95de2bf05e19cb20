//! Outbound request frames. Each writer appends one complete frame
//! (header + body) for the given stream id.

use crate::constant::{Consistency, EventType, FrameFlags, Opcode, QueryFlags};
use crate::protocol::frame::{begin_frame, finish_frame};
use crate::protocol::primitive::*;

/// CQL version announced in STARTUP
const CQL_VERSION: &str = "3.0.0";

/// Write a STARTUP frame
pub fn write_startup(out: &mut Vec<u8>, stream_id: i8) {
    begin_frame(out, Opcode::Startup, stream_id, FrameFlags::empty());
    write_string_map(out, [("CQL_VERSION", CQL_VERSION)]);
    finish_frame(out);
}

/// Write a CREDENTIALS frame answering an AUTHENTICATE challenge
pub fn write_credentials(out: &mut Vec<u8>, stream_id: i8, credentials: &[(&str, &str)]) {
    begin_frame(out, Opcode::Credentials, stream_id, FrameFlags::empty());
    write_string_map(out, credentials.iter().copied());
    finish_frame(out);
}

/// Write an OPTIONS frame (empty body)
pub fn write_options(out: &mut Vec<u8>, stream_id: i8) {
    begin_frame(out, Opcode::Options, stream_id, FrameFlags::empty());
    finish_frame(out);
}

/// Write a QUERY frame: cql + consistency code + query flag byte
pub fn write_query(
    out: &mut Vec<u8>,
    stream_id: i8,
    cql: &str,
    consistency: Consistency,
    flags: QueryFlags,
) {
    begin_frame(out, Opcode::Query, stream_id, FrameFlags::empty());
    write_long_string(out, cql);
    write_short(out, consistency as u16);
    write_byte(out, flags.bits());
    finish_frame(out);
}

/// Write a PREPARE frame
pub fn write_prepare(out: &mut Vec<u8>, stream_id: i8, cql: &str) {
    begin_frame(out, Opcode::Prepare, stream_id, FrameFlags::empty());
    write_long_string(out, cql);
    finish_frame(out);
}

/// Write an EXECUTE frame. Parameters are already codec-encoded;
/// `None` sends a null cell.
pub fn write_execute(
    out: &mut Vec<u8>,
    stream_id: i8,
    prepared_id: &[u8],
    params: &[Option<Vec<u8>>],
    consistency: Consistency,
    flags: QueryFlags,
) {
    begin_frame(out, Opcode::Execute, stream_id, FrameFlags::empty());
    write_short_bytes(out, prepared_id);
    write_short(out, params.len() as u16);
    for param in params {
        write_bytes(out, param.as_deref());
    }
    write_short(out, consistency as u16);
    write_byte(out, flags.bits());
    finish_frame(out);
}

/// Write a REGISTER frame subscribing to server-push events
pub fn write_register(out: &mut Vec<u8>, stream_id: i8, events: &[EventType]) {
    begin_frame(out, Opcode::Register, stream_id, FrameFlags::empty());
    write_short(out, events.len() as u16);
    for event in events {
        write_string(out, event.as_str());
    }
    finish_frame(out);
}
