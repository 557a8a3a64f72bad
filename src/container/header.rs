//! Container header (spec ch. 3, 6).

use crate::error::LoadError;
use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

/// Magic bytes at the start of every container: ASCII `GGUF`, read as a
/// little-endian u32.
pub const MAGIC: u32 = 0x4655_4747;

/// The two on-disk versions actually observed; any other value is rejected
/// rather than guessed at.
pub const SUPPORTED_VERSIONS: [u32; 2] = [2, 3];

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

impl Header {
    pub const SIZE: usize = 4 + 4 + 8 + 8;

    pub fn parse(buf: &[u8], path: &Path) -> Result<Self, LoadError> {
        if buf.len() < Self::SIZE {
            return Err(LoadError::ContainerMalformed {
                path: path.to_path_buf(),
                reason: format!("file truncated: {} bytes, header needs {}", buf.len(), Self::SIZE),
            });
        }
        let magic = LittleEndian::read_u32(&buf[0..4]);
        if magic != MAGIC {
            return Err(LoadError::ContainerMalformed {
                path: path.to_path_buf(),
                reason: format!("bad magic 0x{magic:08x}, expected 0x{MAGIC:08x}"),
            });
        }
        let version = LittleEndian::read_u32(&buf[4..8]);
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(LoadError::ContainerMalformed {
                path: path.to_path_buf(),
                reason: format!("unsupported container version {version}"),
            });
        }
        let tensor_count = LittleEndian::read_u64(&buf[8..16]);
        let metadata_kv_count = LittleEndian::read_u64(&buf[16..24]);
        Ok(Self {
            version,
            tensor_count,
            metadata_kv_count,
        })
    }
}
