//! Per-wire-type codecs.
//!
//! Each column type tag maps to a pure `decode`/`encode` pair in the
//! [`CodecRegistry`]. Lookup is by tag only; the row materializer and the
//! frame parser never branch on concrete types themselves, so a new type is
//! supported by registering an entry, not by editing call sites. The registry
//! is populated once and shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use uuid::Uuid;

use crate::constant::TypeCode;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// Column type descriptor carried in result metadata.
///
/// Parameterized types embed their element types; `code()` yields the tag
/// used for codec lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInfo {
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Text,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    Custom(String),
    List(Box<TypeInfo>),
    Set(Box<TypeInfo>),
    Map(Box<TypeInfo>, Box<TypeInfo>),
}

impl TypeInfo {
    pub fn code(&self) -> TypeCode {
        match self {
            Self::Ascii => TypeCode::Ascii,
            Self::Bigint => TypeCode::Bigint,
            Self::Blob => TypeCode::Blob,
            Self::Boolean => TypeCode::Boolean,
            Self::Counter => TypeCode::Counter,
            Self::Decimal => TypeCode::Decimal,
            Self::Double => TypeCode::Double,
            Self::Float => TypeCode::Float,
            Self::Int => TypeCode::Int,
            Self::Text => TypeCode::Text,
            Self::Timestamp => TypeCode::Timestamp,
            Self::Uuid => TypeCode::Uuid,
            Self::Varchar => TypeCode::Varchar,
            Self::Varint => TypeCode::Varint,
            Self::Timeuuid => TypeCode::Timeuuid,
            Self::Inet => TypeCode::Inet,
            Self::Custom(_) => TypeCode::Custom,
            Self::List(_) => TypeCode::List,
            Self::Set(_) => TypeCode::Set,
            Self::Map(_, _) => TypeCode::Map,
        }
    }
}

/// Arbitrary-precision integer stored as its minimal-length big-endian
/// two's-complement encoding. No arithmetic; the driver only needs exact
/// round-tripping and comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Varint(Vec<u8>);

impl Varint {
    /// Interpret a big-endian two's-complement byte string of any width.
    /// Redundant sign bytes are stripped so equal integers compare equal.
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let mut v = bytes.to_vec();
        if v.is_empty() {
            v.push(0);
        }
        while v.len() > 1 {
            let strip = (v[0] == 0x00 && v[1] & 0x80 == 0)
                || (v[0] == 0xff && v[1] & 0x80 == 0x80);
            if !strip {
                break;
            }
            v.remove(0);
        }
        Self(v)
    }

    /// The minimal big-endian two's-complement encoding.
    pub fn as_be_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Narrow to i64 if the value fits.
    pub fn to_i64(&self) -> Option<i64> {
        if self.0.len() > 8 {
            return None;
        }
        let fill = if self.0[0] & 0x80 != 0 { 0xff } else { 0x00 };
        let mut buf = [fill; 8];
        buf[8 - self.0.len()..].copy_from_slice(&self.0);
        Some(i64::from_be_bytes(buf))
    }
}

impl From<i64> for Varint {
    fn from(value: i64) -> Self {
        Self::from_be_bytes(&value.to_be_bytes())
    }
}

/// DECIMAL wire value: base-10 scale + arbitrary-precision unscaled value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    pub scale: i32,
    pub unscaled: Varint,
}

/// A decoded native value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int(i32),
    Bigint(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
    /// Milliseconds since the epoch
    Timestamp(i64),
    Inet(IpAddr),
    Varint(Varint),
    Decimal(Decimal),
    List(Vec<Value>),
    /// Entries in wire order; CQL map keys have no defined ordering
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "int",
            Self::Bigint(_) => "bigint",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
            Self::Inet(_) => "inet",
            Self::Varint(_) => "varint",
            Self::Decimal(_) => "decimal",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

pub type DecodeFn = fn(&CodecRegistry, &TypeInfo, &[u8]) -> Result<Value>;
pub type EncodeFn = fn(&CodecRegistry, &TypeInfo, &Value) -> Result<Vec<u8>>;

/// One codec: a pure decode/encode pair for a single wire-type tag
#[derive(Clone, Copy)]
pub struct CodecEntry {
    pub decode: DecodeFn,
    pub encode: EncodeFn,
}

/// Tag-indexed codec table. Immutable once shared with a connection.
pub struct CodecRegistry {
    entries: HashMap<TypeCode, CodecEntry>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// A registry covering every type code in [`TypeCode`]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for code in [TypeCode::Ascii, TypeCode::Text, TypeCode::Varchar] {
            registry.register(code, CodecEntry { decode: decode_text, encode: encode_text });
        }
        for code in [TypeCode::Bigint, TypeCode::Counter] {
            registry.register(code, CodecEntry { decode: decode_bigint, encode: encode_bigint });
        }
        for code in [TypeCode::Blob, TypeCode::Custom] {
            registry.register(code, CodecEntry { decode: decode_blob, encode: encode_blob });
        }
        for code in [TypeCode::Uuid, TypeCode::Timeuuid] {
            registry.register(code, CodecEntry { decode: decode_uuid, encode: encode_uuid });
        }
        for code in [TypeCode::List, TypeCode::Set] {
            registry.register(code, CodecEntry { decode: decode_list, encode: encode_list });
        }
        registry.register(TypeCode::Boolean, CodecEntry { decode: decode_boolean, encode: encode_boolean });
        registry.register(TypeCode::Int, CodecEntry { decode: decode_int, encode: encode_int });
        registry.register(TypeCode::Float, CodecEntry { decode: decode_float, encode: encode_float });
        registry.register(TypeCode::Double, CodecEntry { decode: decode_double, encode: encode_double });
        registry.register(TypeCode::Timestamp, CodecEntry { decode: decode_timestamp, encode: encode_timestamp });
        registry.register(TypeCode::Inet, CodecEntry { decode: decode_inet, encode: encode_inet });
        registry.register(TypeCode::Varint, CodecEntry { decode: decode_varint, encode: encode_varint });
        registry.register(TypeCode::Decimal, CodecEntry { decode: decode_decimal, encode: encode_decimal });
        registry.register(TypeCode::Map, CodecEntry { decode: decode_map, encode: encode_map });
        registry
    }

    /// Register or replace the codec for a type tag
    pub fn register(&mut self, code: TypeCode, entry: CodecEntry) {
        self.entries.insert(code, entry);
    }

    fn entry(&self, code: TypeCode) -> Result<&CodecEntry> {
        self.entries
            .get(&code)
            .ok_or_else(|| Error::ProtocolViolation(format!("no codec registered for {code:?}")))
    }

    /// Decode raw column bytes into a native value
    pub fn decode(&self, type_info: &TypeInfo, bytes: &[u8]) -> Result<Value> {
        (self.entry(type_info.code())?.decode)(self, type_info, bytes)
    }

    /// Encode a native value into raw column bytes
    pub fn encode(&self, type_info: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
        (self.entry(type_info.code())?.encode)(self, type_info, value)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::TypeMismatch {
        expected,
        actual: value.type_name().to_string(),
    }
}

fn width_mismatch(expected: &'static str, bytes: &[u8]) -> Error {
    Error::TypeMismatch {
        expected,
        actual: format!("{} bytes", bytes.len()),
    }
}

fn decode_boolean(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    if bytes.len() != 1 {
        return Err(width_mismatch("1-byte boolean", bytes));
    }
    Ok(Value::Boolean(bytes[0] != 0))
}

fn encode_boolean(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Boolean(b) => Ok(vec![u8::from(*b)]),
        other => Err(mismatch("boolean", other)),
    }
}

fn decode_int(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    let be: [u8; 4] = bytes
        .try_into()
        .map_err(|_| width_mismatch("4-byte int", bytes))?;
    Ok(Value::Int(i32::from_be_bytes(be)))
}

fn encode_int(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Int(v) => Ok(v.to_be_bytes().to_vec()),
        other => Err(mismatch("int", other)),
    }
}

fn decode_i64(bytes: &[u8], expected: &'static str) -> Result<i64> {
    let be: [u8; 8] = bytes
        .try_into()
        .map_err(|_| width_mismatch(expected, bytes))?;
    Ok(i64::from_be_bytes(be))
}

fn decode_bigint(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Bigint(decode_i64(bytes, "8-byte bigint")?))
}

fn encode_bigint(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bigint(v) => Ok(v.to_be_bytes().to_vec()),
        other => Err(mismatch("bigint", other)),
    }
}

fn decode_timestamp(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Timestamp(decode_i64(bytes, "8-byte timestamp")?))
}

fn encode_timestamp(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Timestamp(v) => Ok(v.to_be_bytes().to_vec()),
        other => Err(mismatch("timestamp", other)),
    }
}

fn decode_float(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    let be: [u8; 4] = bytes
        .try_into()
        .map_err(|_| width_mismatch("4-byte float", bytes))?;
    Ok(Value::Float(f32::from_bits(u32::from_be_bytes(be))))
}

fn encode_float(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Float(v) => Ok(v.to_bits().to_be_bytes().to_vec()),
        other => Err(mismatch("float", other)),
    }
}

fn decode_double(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    let be: [u8; 8] = bytes
        .try_into()
        .map_err(|_| width_mismatch("8-byte double", bytes))?;
    Ok(Value::Double(f64::from_bits(u64::from_be_bytes(be))))
}

fn encode_double(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Double(v) => Ok(v.to_bits().to_be_bytes().to_vec()),
        other => Err(mismatch("double", other)),
    }
}

fn decode_text(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    let s = simdutf8::basic::from_utf8(bytes).map_err(|_| Error::TypeMismatch {
        expected: "utf-8 text",
        actual: "invalid utf-8 bytes".to_string(),
    })?;
    Ok(Value::Text(s.to_string()))
}

fn encode_text(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Text(s) => Ok(s.as_bytes().to_vec()),
        other => Err(mismatch("text", other)),
    }
}

fn decode_blob(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Blob(bytes.to_vec()))
}

fn encode_blob(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Blob(bytes) => Ok(bytes.clone()),
        other => Err(mismatch("blob", other)),
    }
}

fn decode_uuid(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    let be: [u8; 16] = bytes
        .try_into()
        .map_err(|_| width_mismatch("16-byte uuid", bytes))?;
    Ok(Value::Uuid(Uuid::from_bytes(be)))
}

fn encode_uuid(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Uuid(u) => Ok(u.as_bytes().to_vec()),
        other => Err(mismatch("uuid", other)),
    }
}

fn decode_inet(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().map_err(|_| Error::InvalidFrame)?;
            Ok(Value::Inet(IpAddr::V4(Ipv4Addr::from(octets))))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().map_err(|_| Error::InvalidFrame)?;
            Ok(Value::Inet(IpAddr::V6(Ipv6Addr::from(octets))))
        }
        _ => Err(width_mismatch("4- or 16-byte inet", bytes)),
    }
}

fn encode_inet(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Inet(IpAddr::V4(v4)) => Ok(v4.octets().to_vec()),
        Value::Inet(IpAddr::V6(v6)) => Ok(v6.octets().to_vec()),
        other => Err(mismatch("inet", other)),
    }
}

fn decode_varint(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Varint(Varint::from_be_bytes(bytes)))
}

fn encode_varint(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Varint(v) => Ok(v.as_be_bytes().to_vec()),
        other => Err(mismatch("varint", other)),
    }
}

fn decode_decimal(_: &CodecRegistry, _: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    let (scale, unscaled) = read_int(bytes)?;
    Ok(Value::Decimal(Decimal {
        scale,
        unscaled: Varint::from_be_bytes(unscaled),
    }))
}

fn encode_decimal(_: &CodecRegistry, _: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Decimal(d) => {
            let mut out = Vec::with_capacity(4 + d.unscaled.as_be_bytes().len());
            write_int(&mut out, d.scale);
            out.extend_from_slice(d.unscaled.as_be_bytes());
            Ok(out)
        }
        other => Err(mismatch("decimal", other)),
    }
}

fn element_type(type_info: &TypeInfo) -> Result<&TypeInfo> {
    match type_info {
        TypeInfo::List(elem) | TypeInfo::Set(elem) => Ok(elem),
        _ => Err(Error::ProtocolViolation(format!(
            "collection codec used with non-collection type {:?}",
            type_info.code()
        ))),
    }
}

fn decode_list(registry: &CodecRegistry, type_info: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    let elem = element_type(type_info)?;
    let (count, mut rest) = read_short(bytes)?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (raw, r) = read_short_bytes(rest)?;
        values.push(registry.decode(elem, raw)?);
        rest = r;
    }
    Ok(Value::List(values))
}

fn encode_list(registry: &CodecRegistry, type_info: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    let elem = element_type(type_info)?;
    match value {
        Value::List(values) => {
            let mut out = Vec::new();
            write_short(&mut out, values.len() as u16);
            for v in values {
                let raw = registry.encode(elem, v)?;
                write_short_bytes(&mut out, &raw);
            }
            Ok(out)
        }
        other => Err(mismatch("list", other)),
    }
}

fn map_types(type_info: &TypeInfo) -> Result<(&TypeInfo, &TypeInfo)> {
    match type_info {
        TypeInfo::Map(key, value) => Ok((key, value)),
        _ => Err(Error::ProtocolViolation(format!(
            "map codec used with non-map type {:?}",
            type_info.code()
        ))),
    }
}

fn decode_map(registry: &CodecRegistry, type_info: &TypeInfo, bytes: &[u8]) -> Result<Value> {
    let (key_type, value_type) = map_types(type_info)?;
    let (count, mut rest) = read_short(bytes)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (raw_key, r) = read_short_bytes(rest)?;
        let (raw_value, r) = read_short_bytes(r)?;
        entries.push((
            registry.decode(key_type, raw_key)?,
            registry.decode(value_type, raw_value)?,
        ));
        rest = r;
    }
    Ok(Value::Map(entries))
}

fn encode_map(registry: &CodecRegistry, type_info: &TypeInfo, value: &Value) -> Result<Vec<u8>> {
    let (key_type, value_type) = map_types(type_info)?;
    match value {
        Value::Map(entries) => {
            let mut out = Vec::new();
            write_short(&mut out, entries.len() as u16);
            for (k, v) in entries {
                let raw = registry.encode(key_type, k)?;
                write_short_bytes(&mut out, &raw);
                let raw = registry.encode(value_type, v)?;
                write_short_bytes(&mut out, &raw);
            }
            Ok(out)
        }
        other => Err(mismatch("map", other)),
    }
}

/// Typed extraction from a decoded [`Value`], used by `Row::get`
pub trait FromValue<'a>: Sized {
    fn from_value(value: &'a Value) -> Result<Self>;
}

impl<'a> FromValue<'a> for bool {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(*b),
            other => Err(mismatch("boolean", other)),
        }
    }
}

impl<'a> FromValue<'a> for i32 {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(*v),
            other => Err(mismatch("int", other)),
        }
    }
}

impl<'a> FromValue<'a> for i64 {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Bigint(v) | Value::Timestamp(v) => Ok(*v),
            other => Err(mismatch("bigint", other)),
        }
    }
}

impl<'a> FromValue<'a> for f32 {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            other => Err(mismatch("float", other)),
        }
    }
}

impl<'a> FromValue<'a> for f64 {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Double(v) => Ok(*v),
            other => Err(mismatch("double", other)),
        }
    }
}

impl<'a> FromValue<'a> for &'a str {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("text", other)),
        }
    }
}

impl<'a> FromValue<'a> for String {
    fn from_value(value: &'a Value) -> Result<Self> {
        <&str>::from_value(value).map(str::to_string)
    }
}

impl<'a> FromValue<'a> for &'a [u8] {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Blob(bytes) => Ok(bytes),
            other => Err(mismatch("blob", other)),
        }
    }
}

impl<'a> FromValue<'a> for Vec<u8> {
    fn from_value(value: &'a Value) -> Result<Self> {
        <&[u8]>::from_value(value).map(<[u8]>::to_vec)
    }
}

impl<'a> FromValue<'a> for Uuid {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            other => Err(mismatch("uuid", other)),
        }
    }
}

impl<'a> FromValue<'a> for IpAddr {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Inet(addr) => Ok(*addr),
            other => Err(mismatch("inet", other)),
        }
    }
}

impl<'a> FromValue<'a> for &'a Varint {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Varint(v) => Ok(v),
            other => Err(mismatch("varint", other)),
        }
    }
}

impl<'a> FromValue<'a> for Varint {
    fn from_value(value: &'a Value) -> Result<Self> {
        <&Varint>::from_value(value).cloned()
    }
}
