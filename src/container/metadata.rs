//! Typed metadata dictionary (spec ch. 3, 6).
//!
//! Entries are `[key: string][value_type: u32][value: type-dependent]`.
//! Unknown scalar value types are stored as `MetadataValue::Unknown` rather
//! than rejecting the whole file — array element types that are unknown
//! still abort the parse, since there is no way to compute how many bytes
//! to skip per element.

use super::cursor::Cursor;
use crate::error::LoadError;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub enum MetadataValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Array(Vec<MetadataValue>),
    /// Value type tag not recognized by this reader.
    Unknown(u32),
}

const TAG_U8: u32 = 0;
const TAG_I8: u32 = 1;
const TAG_U16: u32 = 2;
const TAG_I16: u32 = 3;
const TAG_U32: u32 = 4;
const TAG_I32: u32 = 5;
const TAG_F32: u32 = 6;
const TAG_BOOL: u32 = 7;
const TAG_STRING: u32 = 8;
const TAG_ARRAY: u32 = 9;
const TAG_U64: u32 = 10;
const TAG_I64: u32 = 11;
const TAG_F64: u32 = 12;

fn read_scalar(cur: &mut Cursor, tag: u32) -> Result<MetadataValue, LoadError> {
    Ok(match tag {
        TAG_U8 => MetadataValue::U8(cur.u8()?),
        TAG_I8 => MetadataValue::I8(cur.i8()?),
        TAG_U16 => MetadataValue::U16(cur.u16()?),
        TAG_I16 => MetadataValue::I16(cur.i16()?),
        TAG_U32 => MetadataValue::U32(cur.u32()?),
        TAG_I32 => MetadataValue::I32(cur.i32()?),
        TAG_F32 => MetadataValue::F32(cur.f32()?),
        TAG_BOOL => MetadataValue::Bool(cur.bool()?),
        TAG_STRING => MetadataValue::String(cur.string()?),
        TAG_U64 => MetadataValue::U64(cur.u64()?),
        TAG_I64 => MetadataValue::I64(cur.i64()?),
        TAG_F64 => MetadataValue::F64(cur.f64()?),
        other => MetadataValue::Unknown(other),
    })
}

fn read_value(cur: &mut Cursor, path: &Path) -> Result<MetadataValue, LoadError> {
    let tag = cur.u32()?;
    if tag == TAG_ARRAY {
        let elem_tag = cur.u32()?;
        let len = cur.u64()? as usize;
        if elem_tag == TAG_ARRAY {
            return Err(LoadError::ContainerMalformed {
                path: path.to_path_buf(),
                reason: "nested arrays of arrays are not supported".to_string(),
            });
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            let v = read_scalar(cur, elem_tag)?;
            if let MetadataValue::Unknown(t) = v {
                return Err(LoadError::ContainerMalformed {
                    path: path.to_path_buf(),
                    reason: format!("array element type {t} has no known size, cannot skip"),
                });
            }
            items.push(v);
        }
        Ok(MetadataValue::Array(items))
    } else {
        read_scalar(cur, tag)
    }
}

#[derive(Debug, Default)]
pub struct MetadataDict {
    entries: HashMap<String, MetadataValue>,
}

impl MetadataDict {
    pub fn parse(cur: &mut Cursor, count: u64, path: &Path) -> Result<Self, LoadError> {
        let mut entries = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = cur.string()?;
            let value = read_value(cur, path)?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }

    #[cfg(test)]
    pub(crate) fn from_entries(entries: &[(&str, MetadataValue)]) -> Self {
        Self {
            entries: entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    pub fn get_u32(&self, key: &str, default: Option<u32>) -> Option<u32> {
        match self.entries.get(key) {
            Some(MetadataValue::U32(v)) => Some(*v),
            Some(MetadataValue::U64(v)) => Some(*v as u32),
            Some(MetadataValue::I32(v)) => Some(*v as u32),
            Some(MetadataValue::U16(v)) => Some(*v as u32),
            Some(MetadataValue::U8(v)) => Some(*v as u32),
            _ => default,
        }
    }

    pub fn get_u64(&self, key: &str, default: Option<u64>) -> Option<u64> {
        match self.entries.get(key) {
            Some(MetadataValue::U64(v)) => Some(*v),
            Some(MetadataValue::U32(v)) => Some(*v as u64),
            Some(MetadataValue::I64(v)) => Some(*v as u64),
            _ => default,
        }
    }

    pub fn get_f32(&self, key: &str, default: Option<f32>) -> Option<f32> {
        match self.entries.get(key) {
            Some(MetadataValue::F32(v)) => Some(*v),
            Some(MetadataValue::F64(v)) => Some(*v as f32),
            _ => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: Option<bool>) -> Option<bool> {
        match self.entries.get(key) {
            Some(MetadataValue::Bool(v)) => Some(*v),
            _ => default,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(MetadataValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_string_array(&self, key: &str) -> Option<Vec<&str>> {
        match self.entries.get(key) {
            Some(MetadataValue::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| match v {
                        MetadataValue::String(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn get_i32_array(&self, key: &str) -> Option<Vec<i32>> {
        match self.entries.get(key) {
            Some(MetadataValue::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| match v {
                        MetadataValue::I32(n) => Some(*n),
                        MetadataValue::U32(n) => Some(*n as i32),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn get_f32_array(&self, key: &str) -> Option<Vec<f32>> {
        match self.entries.get(key) {
            Some(MetadataValue::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| match v {
                        MetadataValue::F32(n) => Some(*n),
                        MetadataValue::F64(n) => Some(*n as f32),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}
