//! Element types and block decoders (spec ch. 3).
//!
//! Each format is a zero-sized dispatch tag implementing [`QuantFormat`].
//! `ElementType` is the tagged union used everywhere else in the crate —
//! mirrors the `TensorType`-tag dispatch pattern used across the retrieved
//! corpus's from-scratch tensor stores (unpacked-u8 + per-block scale/min).

mod f16;
mod f32;
mod q3_k;
mod q4_0;
mod q4_k;
mod q5_k;
mod q6_k;
mod q8_0;

use crate::error::LoadError;

/// Maximum `block_size` across all supported formats (Q4_K/Q5_K/Q6_K/Q3_K = 256).
pub const MAX_BLOCK_SIZE: usize = 256;

/// A quantization format: fixed-size block layout, decodes to `f32`.
pub trait QuantFormat {
    const BLOCK_SIZE: usize;
    const BLOCK_BYTES: usize;

    /// Decode one block into `out[..BLOCK_SIZE]`.
    fn decode_block(block: &[u8], out: &mut [f32]);
}

/// GGML type tag as it appears in the tensor directory (spec ch. 6).
/// Values match the tags used by the GGUF ecosystem so a real container's
/// tensor directory round-trips without remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F16,
    Q4_0,
    Q8_0,
    Q3_K,
    Q4_K,
    Q5_K,
    Q6_K,
}

const TAG_F32: u32 = 0;
const TAG_F16: u32 = 1;
const TAG_Q4_0: u32 = 2;
const TAG_Q8_0: u32 = 8;
const TAG_Q3_K: u32 = 11;
const TAG_Q4_K: u32 = 12;
const TAG_Q5_K: u32 = 13;
const TAG_Q6_K: u32 = 14;

impl ElementType {
    pub fn from_tag(tag: u32) -> Result<Self, LoadError> {
        Ok(match tag {
            TAG_F32 => Self::F32,
            TAG_F16 => Self::F16,
            TAG_Q4_0 => Self::Q4_0,
            TAG_Q8_0 => Self::Q8_0,
            TAG_Q3_K => Self::Q3_K,
            TAG_Q4_K => Self::Q4_K,
            TAG_Q5_K => Self::Q5_K,
            TAG_Q6_K => Self::Q6_K,
            other => return Err(LoadError::UnsupportedElementType(other)),
        })
    }

    pub fn block_size(self) -> usize {
        match self {
            Self::F32 => f32::F32Format::BLOCK_SIZE,
            Self::F16 => f16::F16Format::BLOCK_SIZE,
            Self::Q4_0 => q4_0::Q4_0Format::BLOCK_SIZE,
            Self::Q8_0 => q8_0::Q8_0Format::BLOCK_SIZE,
            Self::Q3_K => q3_k::Q3_KFormat::BLOCK_SIZE,
            Self::Q4_K => q4_k::Q4_KFormat::BLOCK_SIZE,
            Self::Q5_K => q5_k::Q5_KFormat::BLOCK_SIZE,
            Self::Q6_K => q6_k::Q6_KFormat::BLOCK_SIZE,
        }
    }

    pub fn block_bytes(self) -> usize {
        match self {
            Self::F32 => f32::F32Format::BLOCK_BYTES,
            Self::F16 => f16::F16Format::BLOCK_BYTES,
            Self::Q4_0 => q4_0::Q4_0Format::BLOCK_BYTES,
            Self::Q8_0 => q8_0::Q8_0Format::BLOCK_BYTES,
            Self::Q3_K => q3_k::Q3_KFormat::BLOCK_BYTES,
            Self::Q4_K => q4_k::Q4_KFormat::BLOCK_BYTES,
            Self::Q5_K => q5_k::Q5_KFormat::BLOCK_BYTES,
            Self::Q6_K => q6_k::Q6_KFormat::BLOCK_BYTES,
        }
    }

    pub fn decode_block(self, block: &[u8], out: &mut [f32]) {
        match self {
            Self::F32 => f32::F32Format::decode_block(block, out),
            Self::F16 => f16::F16Format::decode_block(block, out),
            Self::Q4_0 => q4_0::Q4_0Format::decode_block(block, out),
            Self::Q8_0 => q8_0::Q8_0Format::decode_block(block, out),
            Self::Q3_K => q3_k::Q3_KFormat::decode_block(block, out),
            Self::Q4_K => q4_k::Q4_KFormat::decode_block(block, out),
            Self::Q5_K => q5_k::Q5_KFormat::decode_block(block, out),
            Self::Q6_K => q6_k::Q6_KFormat::decode_block(block, out),
        }
    }
}

pub(crate) use q4_0::dot_q4_0_q8_0;
pub(crate) use q8_0::{dot_q8_0_q8_0, quantize_block as quantize_q8_0_block};

/// Splits the 12 packed scale/min bytes of a K-quant super-block into six
/// 6-bit scale and six 6-bit min values (shared by Q4_K and Q5_K). Ported
/// from the reference `get_scale_min_k4` bit layout: the first four
/// sub-blocks store their scale/min directly in the low 6 bits of
/// `scales[0..4]`/`scales[4..8]`; the last four reuse the high 2 bits of
/// those same bytes as the top bits of their own 6-bit fields, packed into
/// `scales[8..12]`.
pub(crate) fn get_scale_min_k4(j: usize, scales: &[u8]) -> (u8, u8) {
    if j < 4 {
        let d = scales[j] & 63;
        let m = scales[j + 4] & 63;
        (d, m)
    } else {
        let d = (scales[j + 4] & 0x0F) | ((scales[j - 4] >> 6) << 4);
        let m = (scales[j + 4] >> 4) | ((scales[j] >> 6) << 4);
        (d, m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_tag_rejects_unknown() {
        assert!(matches!(
            ElementType::from_tag(99),
            Err(LoadError::UnsupportedElementType(99))
        ));
    }

    #[test]
    fn block_sizes_match_table() {
        assert_eq!(ElementType::F32.block_size(), 1);
        assert_eq!(ElementType::F32.block_bytes(), 4);
        assert_eq!(ElementType::F16.block_size(), 1);
        assert_eq!(ElementType::F16.block_bytes(), 2);
        assert_eq!(ElementType::Q4_0.block_size(), 32);
        assert_eq!(ElementType::Q4_0.block_bytes(), 18);
        assert_eq!(ElementType::Q8_0.block_size(), 32);
        assert_eq!(ElementType::Q8_0.block_bytes(), 34);
        assert_eq!(ElementType::Q4_K.block_size(), 256);
        assert_eq!(ElementType::Q4_K.block_bytes(), 144);
        assert_eq!(ElementType::Q5_K.block_size(), 256);
        assert_eq!(ElementType::Q5_K.block_bytes(), 176);
        assert_eq!(ElementType::Q6_K.block_size(), 256);
        assert_eq!(ElementType::Q6_K.block_bytes(), 210);
        assert_eq!(ElementType::Q3_K.block_size(), 256);
        assert_eq!(ElementType::Q3_K.block_bytes(), 110);
    }
}
