//! Small forward-only byte cursor shared by metadata and tensor-directory parsing.

use crate::error::LoadError;
use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8], pos: usize, path: &'a Path) -> Self {
        Self { buf, pos, path }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn need(&self, n: usize) -> Result<(), LoadError> {
        if self.pos + n > self.buf.len() {
            return Err(LoadError::ContainerMalformed {
                path: self.path.to_path_buf(),
                reason: format!(
                    "truncated at offset {}: need {n} more bytes, {} available",
                    self.pos,
                    self.buf.len().saturating_sub(self.pos)
                ),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
        self.need(n)?;
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, LoadError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn u16(&mut self) -> Result<u16, LoadError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn i16(&mut self) -> Result<i16, LoadError> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, LoadError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn i32(&mut self) -> Result<i32, LoadError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, LoadError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn i64(&mut self) -> Result<i64, LoadError> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    pub fn f32(&mut self) -> Result<f32, LoadError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    pub fn f64(&mut self) -> Result<f64, LoadError> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    pub fn bool(&mut self) -> Result<bool, LoadError> {
        Ok(self.u8()? != 0)
    }

    /// GGUF strings are `[len: u64][bytes: len]`, not NUL-terminated.
    pub fn string(&mut self) -> Result<String, LoadError> {
        let len = self.u64()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| LoadError::ContainerMalformed {
            path: self.path.to_path_buf(),
            reason: format!("invalid utf-8 string at offset {}: {e}", self.pos - len),
        })
    }

    pub fn align_to(&mut self, alignment: usize) {
        let rem = self.pos % alignment;
        if rem != 0 {
            self.pos += alignment - rem;
        }
    }
}
