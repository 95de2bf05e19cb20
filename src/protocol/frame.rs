use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
use zerocopy::byteorder::big_endian::U32 as U32BE;

use crate::constant::{
    FRAME_HEADER_LEN, FrameFlags, MAX_FRAME_BODY_LEN, Opcode, REQUEST_VERSION, RESPONSE_VERSION,
};
use crate::error::{Error, Result};

/// CQL frame header (zero-copy)
///
/// Layout matches the CQL wire protocol:
/// - version: 1 byte (0x01 request, 0x81 response)
/// - flags: 1 byte
/// - stream: 1 byte (signed; negative ids are server-initiated)
/// - opcode: 1 byte
/// - length: 4 bytes (big-endian, body length)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct FrameHeader {
    pub version: u8,
    pub flags: u8,
    pub stream: u8,
    pub opcode: u8,
    pub length: U32BE,
}

impl FrameHeader {
    pub fn length(&self) -> usize {
        self.length.get() as usize
    }

    pub fn stream_id(&self) -> i8 {
        self.stream as i8
    }
}

/// A raw inbound frame before interpretation
#[derive(Debug)]
pub struct ResponseFrame {
    pub stream_id: i8,
    pub opcode: u8,
    pub body: BytesMut,
}

/// CQL frame decoder implementing tokio_util::Decoder
///
/// Only validates the header shape; body bytes are classified later by the
/// frame parser. A non-response version byte or an oversized body length is
/// fatal to the connection.
pub struct FrameDecoder {
    state: DecoderState,
}

enum DecoderState {
    ReadingHeader,
    ReadingBody {
        stream_id: i8,
        opcode: u8,
        length: usize,
    },
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameDecoder {
    type Item = ResponseFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.state {
                DecoderState::ReadingHeader => {
                    if src.len() < FRAME_HEADER_LEN {
                        return Ok(None);
                    }

                    let version = src.get_u8();
                    let _flags = src.get_u8();
                    let stream_id = src.get_u8() as i8;
                    let opcode = src.get_u8();
                    let length = src.get_u32() as usize;

                    if version != RESPONSE_VERSION {
                        return Err(Error::ProtocolViolation(format!(
                            "unexpected frame version {version:#04x}"
                        )));
                    }
                    if length > MAX_FRAME_BODY_LEN {
                        return Err(Error::ProtocolViolation(format!(
                            "frame body length {length} exceeds limit"
                        )));
                    }

                    self.state = DecoderState::ReadingBody {
                        stream_id,
                        opcode,
                        length,
                    };
                }
                DecoderState::ReadingBody {
                    stream_id,
                    opcode,
                    length,
                } => {
                    if src.len() < length {
                        return Ok(None);
                    }

                    let body = src.split_to(length);

                    self.state = DecoderState::ReadingHeader;

                    return Ok(Some(ResponseFrame {
                        stream_id,
                        opcode,
                        body,
                    }));
                }
            }
        }
    }
}

/// Start a request frame: write the 8-byte header with a zero length.
/// The body is appended by the caller; `finish_frame` patches the length.
pub fn begin_frame(out: &mut Vec<u8>, opcode: Opcode, stream_id: i8, flags: FrameFlags) {
    let header = FrameHeader {
        version: REQUEST_VERSION,
        flags: flags.bits(),
        stream: stream_id as u8,
        opcode: opcode as u8,
        length: U32BE::new(0),
    };
    out.extend_from_slice(header.as_bytes());
}

/// Patch the body length into a frame started with `begin_frame`.
pub fn finish_frame(out: &mut [u8]) {
    debug_assert!(out.len() >= FRAME_HEADER_LEN);
    let body_len = (out.len() - FRAME_HEADER_LEN) as u32;
    FrameHeader::mut_from_bytes(&mut out[..FRAME_HEADER_LEN])
        .unwrap()
        .length = U32BE::new(body_len);
}
