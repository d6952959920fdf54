use std::fmt;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::PageId;

/// Fixed payload length of a string field, excluding the length prefix.
pub const STRING_LEN: usize = 128;

/// Column types storable in a heap tuple. Every type has a fixed on-disk
/// width so tuples of one schema are all the same size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Str,
}

impl FieldType {
    /// On-disk width in bytes.
    pub fn len(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str => 4 + STRING_LEN,
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "int" => Ok(FieldType::Int),
            "string" => Ok(FieldType::Str),
            other => Err(Error::Schema(format!("unknown field type: {other}"))),
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    /// Serializes into `buf`, which must be exactly `field_type().len()`
    /// bytes. Integers are big-endian; strings are a big-endian length
    /// prefix followed by the bytes, zero-padded to [`STRING_LEN`].
    /// Over-long strings are truncated on a character boundary so the
    /// stored bytes stay valid UTF-8.
    fn write_to(&self, buf: &mut [u8]) {
        match self {
            Field::Int(v) => buf.copy_from_slice(&v.to_be_bytes()),
            Field::Str(s) => {
                let mut n = s.len().min(STRING_LEN);
                while !s.is_char_boundary(n) {
                    n -= 1;
                }
                buf[..4].copy_from_slice(&(n as u32).to_be_bytes());
                buf[4..4 + n].copy_from_slice(&s.as_bytes()[..n]);
                buf[4 + n..].fill(0);
            }
        }
    }

    fn read_from(ty: FieldType, buf: &[u8]) -> Result<Self> {
        match ty {
            FieldType::Int => {
                let raw: [u8; 4] = buf[..4]
                    .try_into()
                    .map_err(|_| Error::Schema("truncated int field".into()))?;
                Ok(Field::Int(i32::from_be_bytes(raw)))
            }
            FieldType::Str => {
                let raw: [u8; 4] = buf[..4]
                    .try_into()
                    .map_err(|_| Error::Schema("truncated string field".into()))?;
                let n = (u32::from_be_bytes(raw) as usize).min(STRING_LEN);
                let s = String::from_utf8_lossy(&buf[4..4 + n]).into_owned();
                Ok(Field::Str(s))
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::Str(s) => write!(f, "{s}"),
        }
    }
}

/// One column of a schema. Names are optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: Option<String>,
    pub ty: FieldType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: Some(name.into()),
            ty,
        }
    }

    pub fn unnamed(ty: FieldType) -> Self {
        Self { name: None, ty }
    }
}

/// The schema of a tuple: an ordered list of columns with a fixed total
/// byte width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Total on-disk size of one tuple of this schema, in bytes.
    pub fn tuple_size(&self) -> usize {
        self.columns.iter().map(|c| c.ty.len()).sum()
    }

    /// Index of the first column with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.as_deref() == Some(name))
    }
}

/// Names the slot a stored tuple occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub pid: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(pid: PageId, slot: usize) -> Self {
        Self { pid, slot }
    }
}

/// A tuple: fixed-size field values laid out per its schema, plus the
/// record id of the slot it lives in once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    schema: Arc<Schema>,
    fields: Vec<Field>,
    rid: Option<RecordId>,
}

impl Tuple {
    pub fn new(schema: Arc<Schema>, fields: Vec<Field>) -> Result<Self> {
        if fields.len() != schema.len() {
            return Err(Error::Schema(format!(
                "tuple has {} fields, schema has {}",
                fields.len(),
                schema.len()
            )));
        }
        for (field, column) in fields.iter().zip(schema.columns()) {
            if field.field_type() != column.ty {
                return Err(Error::Schema(format!(
                    "field {field:?} does not match column type {:?}",
                    column.ty
                )));
            }
        }
        Ok(Self {
            schema,
            fields,
            rid: None,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn set_rid(&mut self, rid: Option<RecordId>) {
        self.rid = rid;
    }

    /// Serializes into `buf`, which must be exactly
    /// `schema.tuple_size()` bytes.
    pub fn write_to(&self, buf: &mut [u8]) {
        let mut offset = 0;
        for field in &self.fields {
            let width = field.field_type().len();
            field.write_to(&mut buf[offset..offset + width]);
            offset += width;
        }
    }

    /// Reads a tuple of `schema` out of `buf`. The record id is left
    /// unset; page parsing assigns it.
    pub fn read_from(schema: Arc<Schema>, buf: &[u8]) -> Result<Self> {
        if buf.len() < schema.tuple_size() {
            return Err(Error::Schema("truncated tuple".into()));
        }
        let mut offset = 0;
        let mut fields = Vec::with_capacity(schema.len());
        for column in schema.columns() {
            let width = column.ty.len();
            fields.push(Field::read_from(column.ty, &buf[offset..offset + width])?);
            offset += width;
        }
        Ok(Self {
            schema,
            fields,
            rid: None,
        })
    }
}
