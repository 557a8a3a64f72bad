//! Memory-mapped container reader (spec ch. 3, 4.1): header, metadata
//! dictionary, and tensor directory over a single `mmap`ed file.

mod cursor;
mod directory;
mod header;
mod metadata;

pub use directory::TensorEntry;
pub use header::{Header, MAGIC, SUPPORTED_VERSIONS};
pub use metadata::{MetadataDict, MetadataValue};

use crate::error::LoadError;
use cursor::Cursor;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Default byte alignment of the tensor data region when the container does
/// not carry a `general.alignment` metadata key.
const DEFAULT_ALIGNMENT: u64 = 32;

pub struct Container {
    mmap: Mmap,
    path: PathBuf,
    header: Header,
    metadata: MetadataDict,
    tensors: Vec<TensorEntry>,
    by_name: HashMap<String, usize>,
    data_offset: usize,
}

impl Container {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: the file is not truncated or mutated for the lifetime of
        // this mapping; the engine owns the handle and the caller is
        // expected to hold the model file read-only for the process lifetime.
        let mmap = unsafe { Mmap::map(&file)? };

        let header = Header::parse(&mmap, &path)?;
        let mut cur = Cursor::new(&mmap, Header::SIZE, &path);

        let metadata = MetadataDict::parse(&mut cur, header.metadata_kv_count, &path)?;

        let mut tensors = Vec::with_capacity(header.tensor_count as usize);
        let mut by_name = HashMap::with_capacity(header.tensor_count as usize);
        for _ in 0..header.tensor_count {
            let entry = TensorEntry::parse(&mut cur, &path)?;
            by_name.insert(entry.name.clone(), tensors.len());
            tensors.push(entry);
        }

        let alignment = metadata.get_u32("general.alignment", None).map(|v| v as u64).unwrap_or(DEFAULT_ALIGNMENT);
        if alignment == 0 || (alignment & (alignment - 1)) != 0 {
            return Err(LoadError::ContainerMalformed {
                path: path.clone(),
                reason: format!("general.alignment {alignment} is not a power of two"),
            });
        }
        cur.align_to(alignment as usize);
        let data_offset = cur.pos();

        tracing::info!(
            path = %path.display(),
            version = header.version,
            tensors = tensors.len(),
            data_offset,
            "opened container"
        );

        Ok(Self {
            mmap,
            path,
            header,
            metadata,
            tensors,
            by_name,
            data_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn metadata(&self) -> &MetadataDict {
        &self.metadata
    }

    pub fn tensors(&self) -> &[TensorEntry] {
        &self.tensors
    }

    /// Size in bytes of the mapped file, used for `model_info`'s RAM estimate.
    pub fn byte_len(&self) -> usize {
        self.mmap.len()
    }

    pub fn find_tensor(&self, name: &str) -> Option<&TensorEntry> {
        self.by_name.get(name).map(|&i| &self.tensors[i])
    }

    pub fn require_tensor(&self, name: &str) -> Result<&TensorEntry, LoadError> {
        self.find_tensor(name)
            .ok_or_else(|| LoadError::MissingRequiredTensor(name.to_string()))
    }

    /// Raw byte slice for `entry`'s data, located at `data_offset + entry.offset`.
    pub fn tensor_bytes(&self, entry: &TensorEntry) -> Result<&[u8], LoadError> {
        let element_count = entry.element_count();
        let block_size = entry.element_type.block_size() as u64;
        let block_bytes = entry.element_type.block_bytes() as u64;
        let n_blocks = element_count / block_size;
        let byte_len = n_blocks * block_bytes;

        let start = self.data_offset as u64 + entry.offset;
        let end = start + byte_len;
        if end > self.mmap.len() as u64 {
            return Err(LoadError::ContainerMalformed {
                path: self.path.clone(),
                reason: format!(
                    "tensor {:?} data [{start}, {end}) exceeds file length {}",
                    entry.name,
                    self.mmap.len()
                ),
            });
        }
        Ok(&self.mmap[start as usize..end as usize])
    }

    /// Sequentially touch every tensor's backing pages once, so the first
    /// forward pass does not stall on page faults (spec ch. 4.1 preload).
    pub fn preload(&self) -> Result<(), LoadError> {
        let mut checksum: u64 = 0;
        for entry in &self.tensors {
            let bytes = self.tensor_bytes(entry)?;
            for chunk in bytes.chunks(4096) {
                checksum ^= chunk[0] as u64;
            }
        }
        tracing::debug!(checksum, "preload touched all tensor pages");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn write_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn write_string(buf: &mut Vec<u8>, s: &str) {
        write_u64(buf, s.len() as u64);
        buf.extend_from_slice(s.as_bytes());
    }

    fn minimal_container_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        write_u32(&mut buf, MAGIC);
        write_u32(&mut buf, 3);
        write_u64(&mut buf, 1); // tensor_count
        write_u64(&mut buf, 1); // metadata_kv_count

        // metadata: general.alignment = 32 (u32)
        write_string(&mut buf, "general.alignment");
        write_u32(&mut buf, 4); // TAG_U32
        write_u32(&mut buf, 32);

        // tensor directory: one F32 tensor, 4 elements
        write_string(&mut buf, "weight");
        write_u32(&mut buf, 1); // n_dims
        write_u64(&mut buf, 4); // dims[0]
        write_u32(&mut buf, 0); // TAG_F32
        write_u64(&mut buf, 0); // offset

        while buf.len() % 32 != 0 {
            buf.push(0);
        }
        buf.extend_from_slice(&[0u8; 16]); // 4 f32 elements
        buf
    }

    #[test]
    fn opens_minimal_container_and_finds_tensor() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&minimal_container_bytes()).unwrap();
        let container = Container::open(f.path()).unwrap();
        let entry = container.require_tensor("weight").unwrap();
        assert_eq!(entry.shape, vec![4]);
        let bytes = container.tensor_bytes(entry).unwrap();
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn missing_tensor_is_reported() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&minimal_container_bytes()).unwrap();
        let container = Container::open(f.path()).unwrap();
        assert!(matches!(
            container.require_tensor("missing"),
            Err(LoadError::MissingRequiredTensor(_))
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = minimal_container_bytes();
        buf[0] = 0;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&buf).unwrap();
        assert!(matches!(
            Container::open(f.path()),
            Err(LoadError::ContainerMalformed { .. })
        ));
    }
}
