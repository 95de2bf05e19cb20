//! Wire primitives. All integers are big-endian per the CQL binary protocol.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I32 as I32BE, I64 as I64BE, U16 as U16BE};

use crate::error::{Error, Result};

/// Read 1-byte integer
pub fn read_byte(data: &[u8]) -> Result<(u8, &[u8])> {
    if data.is_empty() {
        return Err(Error::UnexpectedEof);
    }
    Ok((data[0], &data[1..]))
}

/// Read 2-byte big-endian unsigned integer ([short])
pub fn read_short(data: &[u8]) -> Result<(u16, &[u8])> {
    if data.len() < 2 {
        return Err(Error::UnexpectedEof);
    }
    let value = U16BE::ref_from_bytes(&data[..2])
        .map_err(|_| Error::InvalidFrame)?
        .get();
    Ok((value, &data[2..]))
}

/// Read 4-byte big-endian signed integer ([int])
pub fn read_int(data: &[u8]) -> Result<(i32, &[u8])> {
    if data.len() < 4 {
        return Err(Error::UnexpectedEof);
    }
    let value = I32BE::ref_from_bytes(&data[..4])
        .map_err(|_| Error::InvalidFrame)?
        .get();
    Ok((value, &data[4..]))
}

/// Read 8-byte big-endian signed integer ([long])
pub fn read_long(data: &[u8]) -> Result<(i64, &[u8])> {
    if data.len() < 8 {
        return Err(Error::UnexpectedEof);
    }
    let value = I64BE::ref_from_bytes(&data[..8])
        .map_err(|_| Error::InvalidFrame)?
        .get();
    Ok((value, &data[8..]))
}

/// Read fixed-length slice
pub fn read_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::UnexpectedEof);
    }
    Ok((&data[..len], &data[len..]))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::basic::from_utf8(bytes).map_err(|_| Error::InvalidFrame)
}

/// Read [string]: u16 length + UTF-8 bytes
pub fn read_string(data: &[u8]) -> Result<(&str, &[u8])> {
    let (len, rest) = read_short(data)?;
    let (bytes, rest) = read_fix(rest, len as usize)?;
    Ok((utf8(bytes)?, rest))
}

/// Read [long string]: i32 length + UTF-8 bytes
pub fn read_long_string(data: &[u8]) -> Result<(&str, &[u8])> {
    let (len, rest) = read_int(data)?;
    if len < 0 {
        return Err(Error::InvalidFrame);
    }
    let (bytes, rest) = read_fix(rest, len as usize)?;
    Ok((utf8(bytes)?, rest))
}

/// Read [bytes]: i32 length + bytes. A negative length denotes null and
/// consumes no value bytes.
pub fn read_bytes(data: &[u8]) -> Result<(Option<&[u8]>, &[u8])> {
    let (len, rest) = read_int(data)?;
    if len < 0 {
        return Ok((None, rest));
    }
    let (bytes, rest) = read_fix(rest, len as usize)?;
    Ok((Some(bytes), rest))
}

/// Read [short bytes]: u16 length + bytes
pub fn read_short_bytes(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_short(data)?;
    read_fix(rest, len as usize)
}

/// Read [string list]: u16 count of [string]
pub fn read_string_list(data: &[u8]) -> Result<(Vec<String>, &[u8])> {
    let (count, mut rest) = read_short(data)?;
    let mut list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (s, r) = read_string(rest)?;
        list.push(s.to_string());
        rest = r;
    }
    Ok((list, rest))
}

/// Read [string map]: u16 count of [string] key + [string] value
pub fn read_string_map(data: &[u8]) -> Result<(HashMap<String, String>, &[u8])> {
    let (count, mut rest) = read_short(data)?;
    let mut map = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let (k, r) = read_string(rest)?;
        let (v, r) = read_string(r)?;
        map.insert(k.to_string(), v.to_string());
        rest = r;
    }
    Ok((map, rest))
}

/// Read [string multimap]: u16 count of [string] key + [string list] value
pub fn read_string_multimap(data: &[u8]) -> Result<(HashMap<String, Vec<String>>, &[u8])> {
    let (count, mut rest) = read_short(data)?;
    let mut map = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let (k, r) = read_string(rest)?;
        let (v, r) = read_string_list(r)?;
        map.insert(k.to_string(), v);
        rest = r;
    }
    Ok((map, rest))
}

/// Read [inet]: u8 address size (4 or 16) + address bytes + i32 port
pub fn read_inet(data: &[u8]) -> Result<(SocketAddr, &[u8])> {
    let (size, rest) = read_byte(data)?;
    let (addr, rest) = match size {
        4 => {
            let (bytes, rest) = read_fix(rest, 4)?;
            let octets: [u8; 4] = bytes.try_into().map_err(|_| Error::InvalidFrame)?;
            (IpAddr::V4(Ipv4Addr::from(octets)), rest)
        }
        16 => {
            let (bytes, rest) = read_fix(rest, 16)?;
            let octets: [u8; 16] = bytes.try_into().map_err(|_| Error::InvalidFrame)?;
            (IpAddr::V6(Ipv6Addr::from(octets)), rest)
        }
        _ => return Err(Error::InvalidFrame),
    };
    let (port, rest) = read_int(rest)?;
    Ok((SocketAddr::new(addr, port as u16), rest))
}

/// Write 1-byte integer
pub fn write_byte(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 2-byte big-endian unsigned integer ([short])
pub fn write_short(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 4-byte big-endian signed integer ([int])
pub fn write_int(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 8-byte big-endian signed integer ([long])
pub fn write_long(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write [string]
pub fn write_string(out: &mut Vec<u8>, s: &str) {
    write_short(out, s.len() as u16);
    out.extend_from_slice(s.as_bytes());
}

/// Write [long string]
pub fn write_long_string(out: &mut Vec<u8>, s: &str) {
    write_int(out, s.len() as i32);
    out.extend_from_slice(s.as_bytes());
}

/// Write [bytes]; `None` writes length -1 and no value bytes
pub fn write_bytes(out: &mut Vec<u8>, data: Option<&[u8]>) {
    match data {
        Some(data) => {
            write_int(out, data.len() as i32);
            out.extend_from_slice(data);
        }
        None => write_int(out, -1),
    }
}

/// Write [short bytes]
pub fn write_short_bytes(out: &mut Vec<u8>, data: &[u8]) {
    write_short(out, data.len() as u16);
    out.extend_from_slice(data);
}

/// Write [string list]
pub fn write_string_list(out: &mut Vec<u8>, list: &[&str]) {
    write_short(out, list.len() as u16);
    for s in list {
        write_string(out, s);
    }
}

/// Write [string map]; the entry count is taken from the iterator length
pub fn write_string_map<'a, I>(out: &mut Vec<u8>, entries: I)
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
    I::IntoIter: ExactSizeIterator,
{
    let entries = entries.into_iter();
    write_short(out, entries.len() as u16);
    for (k, v) in entries {
        write_string(out, k);
        write_string(out, v);
    }
}
