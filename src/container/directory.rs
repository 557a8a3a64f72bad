//! Tensor directory entries (spec ch. 3, 6):
//! `[name][n_dims: u32][dims...][type_tag: u32][offset: u64]`.

use super::cursor::Cursor;
use crate::error::LoadError;
use crate::quant::ElementType;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct TensorEntry {
    pub name: String,
    pub shape: Vec<u64>,
    pub element_type: ElementType,
    /// Absolute byte offset into the data region (added to the region's
    /// base address once alignment is resolved in `Container::open`).
    pub offset: u64,
}

impl TensorEntry {
    pub fn element_count(&self) -> u64 {
        self.shape.iter().product()
    }

    pub fn parse(cur: &mut Cursor, path: &Path) -> Result<Self, LoadError> {
        let name = cur.string()?;
        let n_dims = cur.u32()? as usize;
        let mut shape = Vec::with_capacity(n_dims);
        for _ in 0..n_dims {
            shape.push(cur.u64()?);
        }
        let type_tag = cur.u32()?;
        let element_type = ElementType::from_tag(type_tag)?;
        let offset = cur.u64()?;

        let element_count: u64 = shape.iter().product();
        let block_size = element_type.block_size() as u64;
        if element_count % block_size != 0 {
            return Err(LoadError::ContainerMalformed {
                path: path.to_path_buf(),
                reason: format!(
                    "tensor {name:?} has {element_count} elements, not a multiple of block size {block_size}"
                ),
            });
        }

        Ok(Self {
            name,
            shape,
            element_type,
            offset,
        })
    }
}
