//! Result-row materialization.
//!
//! A Rows result body is a column-metadata block followed by a row count and
//! `rows * columns` length-prefixed cells. Cells are decoded eagerly, one row
//! at a time, through the [`CodecRegistry`]; a negative cell length is a null
//! and consumes no value bytes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::{CodecRegistry, FromValue, TypeInfo, Value};
use crate::constant::{TypeCode, metadata_flags};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// One column of a result: where it came from and how to decode it
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub type_info: TypeInfo,
}

/// Ordered column specs plus a name-to-index map, shared read-only by every
/// row of one result.
#[derive(Debug)]
pub struct Metadata {
    columns: Vec<ColumnSpec>,
    index: HashMap<String, usize>,
}

impl Metadata {
    pub(crate) fn new(columns: Vec<ColumnSpec>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, col)| (col.name.clone(), i))
            .collect();
        Self { columns, index }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// A materialized row: one decoded value per column, null = `None`
#[derive(Debug, Clone)]
pub struct Row {
    metadata: Arc<Metadata>,
    values: Vec<Option<Value>>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn slot(&self, index: usize) -> Result<&Option<Value>> {
        self.values.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.values.len(),
        })
    }

    fn name_to_index(&self, name: &str) -> Result<usize> {
        self.metadata
            .column_index(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Nullity test by position; never decodes
    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.slot(index)?.is_none())
    }

    /// Nullity test by column name; never decodes
    pub fn is_null_by_name(&self, name: &str) -> Result<bool> {
        self.is_null(self.name_to_index(name)?)
    }

    /// The decoded value at a position. Extracting a null column is an
    /// error; test with `is_null` first.
    pub fn value(&self, index: usize) -> Result<&Value> {
        self.slot(index)?.as_ref().ok_or_else(|| {
            Error::NotFound(format!("column {index} is null"))
        })
    }

    /// The decoded value for a column name
    pub fn value_by_name(&self, name: &str) -> Result<&Value> {
        let index = self.name_to_index(name)?;
        self.slot(index)?
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("column `{name}` is null")))
    }

    /// Typed extraction by position; fails with `TypeMismatch` if the
    /// requested native type does not match the decoded value
    pub fn get<'a, T: FromValue<'a>>(&'a self, index: usize) -> Result<T> {
        T::from_value(self.value(index)?)
    }

    /// Typed extraction by column name
    pub fn get_by_name<'a, T: FromValue<'a>>(&'a self, name: &str) -> Result<T> {
        T::from_value(self.value_by_name(name)?)
    }
}

/// A fully materialized Rows result
#[derive(Debug)]
pub struct Rows {
    metadata: Arc<Metadata>,
    rows: Vec<Row>,
}

impl Rows {
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Rows {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Read an [option]: u16 type code plus code-dependent parameters
pub(crate) fn read_type_info(data: &[u8]) -> Result<(TypeInfo, &[u8])> {
    let (raw_code, rest) = read_short(data)?;
    let code = TypeCode::from_u16(raw_code)
        .ok_or_else(|| Error::ProtocolViolation(format!("unknown type code {raw_code:#06x}")))?;
    let type_info = match code {
        TypeCode::Custom => {
            let (class, rest) = read_string(rest)?;
            return Ok((TypeInfo::Custom(class.to_string()), rest));
        }
        TypeCode::List => {
            let (elem, rest) = read_type_info(rest)?;
            return Ok((TypeInfo::List(Box::new(elem)), rest));
        }
        TypeCode::Set => {
            let (elem, rest) = read_type_info(rest)?;
            return Ok((TypeInfo::Set(Box::new(elem)), rest));
        }
        TypeCode::Map => {
            let (key, rest) = read_type_info(rest)?;
            let (value, rest) = read_type_info(rest)?;
            return Ok((TypeInfo::Map(Box::new(key), Box::new(value)), rest));
        }
        TypeCode::Ascii => TypeInfo::Ascii,
        TypeCode::Bigint => TypeInfo::Bigint,
        TypeCode::Blob => TypeInfo::Blob,
        TypeCode::Boolean => TypeInfo::Boolean,
        TypeCode::Counter => TypeInfo::Counter,
        TypeCode::Decimal => TypeInfo::Decimal,
        TypeCode::Double => TypeInfo::Double,
        TypeCode::Float => TypeInfo::Float,
        TypeCode::Int => TypeInfo::Int,
        TypeCode::Text => TypeInfo::Text,
        TypeCode::Timestamp => TypeInfo::Timestamp,
        TypeCode::Uuid => TypeInfo::Uuid,
        TypeCode::Varchar => TypeInfo::Varchar,
        TypeCode::Varint => TypeInfo::Varint,
        TypeCode::Timeuuid => TypeInfo::Timeuuid,
        TypeCode::Inet => TypeInfo::Inet,
    };
    Ok((type_info, rest))
}

/// Read a result-metadata block (shared by Rows and Prepared results)
pub(crate) fn read_metadata(data: &[u8]) -> Result<(Metadata, &[u8])> {
    let (flags, rest) = read_int(data)?;
    let (column_count, mut rest) = read_int(rest)?;
    if column_count < 0 {
        return Err(Error::InvalidFrame);
    }

    let global = flags & metadata_flags::GLOBAL_TABLES_SPEC != 0;
    let (global_keyspace, global_table) = if global {
        let (keyspace, r) = read_string(rest)?;
        let (table, r) = read_string(r)?;
        rest = r;
        (keyspace.to_string(), table.to_string())
    } else {
        (String::new(), String::new())
    };

    let mut columns = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        let (keyspace, table) = if global {
            (global_keyspace.clone(), global_table.clone())
        } else {
            let (keyspace, r) = read_string(rest)?;
            let (table, r) = read_string(r)?;
            rest = r;
            (keyspace.to_string(), table.to_string())
        };
        let (name, r) = read_string(rest)?;
        let (type_info, r) = read_type_info(r)?;
        rest = r;
        columns.push(ColumnSpec {
            keyspace,
            table,
            name: name.to_string(),
            type_info,
        });
    }

    Ok((Metadata::new(columns), rest))
}

/// Materialize a Rows result body (everything after the result-kind code)
pub(crate) fn parse_rows(registry: &CodecRegistry, data: &[u8]) -> Result<Rows> {
    let (metadata, rest) = read_metadata(data)?;
    let metadata = Arc::new(metadata);
    let (row_count, mut rest) = read_int(rest)?;
    if row_count < 0 {
        return Err(Error::InvalidFrame);
    }

    let column_count = metadata.columns().len();
    let mut rows = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let mut values = Vec::with_capacity(column_count);
        // Exactly column_count cells per row, no matter what else the
        // buffer still holds.
        for col in metadata.columns() {
            let (raw, r) = read_bytes(rest)?;
            rest = r;
            values.push(match raw {
                Some(raw) => Some(registry.decode(&col.type_info, raw)?),
                None => None,
            });
        }
        rows.push(Row {
            metadata: Arc::clone(&metadata),
            values,
        });
    }

    Ok(Rows { metadata, rows })
}
