//! Tensor view: the capability set bound once per element type (spec ch. 4.2, 9).
//!
//! `get_float`, `dot`, and `matmul` are the only operations the rest of the
//! engine needs from a quantized weight tensor; which block format backs a
//! given view is invisible past this module.

use super::kernels;
use crate::quant::{ElementType, MAX_BLOCK_SIZE};
use rayon::prelude::*;

pub struct TensorView<'a> {
    bytes: &'a [u8],
    element_type: ElementType,
    total_elements: usize,
}

impl<'a> TensorView<'a> {
    pub fn new(bytes: &'a [u8], element_type: ElementType, total_elements: usize) -> Self {
        debug_assert_eq!(
            total_elements % element_type.block_size(),
            0,
            "element count must be a multiple of block_size"
        );
        Self {
            bytes,
            element_type,
            total_elements,
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn total_elements(&self) -> usize {
        self.total_elements
    }

    /// Decodes the block containing index `i` and returns its slot `i`.
    pub fn get_float(&self, i: usize) -> f32 {
        let block_size = self.element_type.block_size();
        let block_bytes = self.element_type.block_bytes();
        let block_idx = i / block_size;
        let within = i % block_size;
        let start = block_idx * block_bytes;
        let block = &self.bytes[start..start + block_bytes];
        let mut scratch = [0.0f32; MAX_BLOCK_SIZE];
        self.element_type.decode_block(block, &mut scratch[..block_size]);
        scratch[within]
    }

    /// `Σ get_float(offset + i) * dense[i]` for `i in 0..n`. `offset` must be
    /// a block boundary and `n` a multiple of `block_size`.
    ///
    /// For Q4_0/Q8_0 weights, `dense` is quantized to Q8_0 per block and the
    /// integer-dot fast path runs instead of decoding the weight block to
    /// `f32` (spec ch. 4.2).
    pub fn dot(&self, offset: usize, dense: &[f32], n: usize) -> f32 {
        let block_size = self.element_type.block_size();
        let block_bytes = self.element_type.block_bytes();
        debug_assert_eq!(offset % block_size, 0, "dot offset must be a block boundary");
        debug_assert_eq!(n % block_size, 0, "dot length must be a multiple of block_size");
        debug_assert_eq!(dense.len(), n);

        let first_block = offset / block_size;
        let n_blocks = n / block_size;
        let mut acc = 0.0f32;

        match self.element_type {
            ElementType::Q8_0 => {
                for b in 0..n_blocks {
                    let start = (first_block + b) * block_bytes;
                    let block = &self.bytes[start..start + block_bytes];
                    let dense_chunk = &dense[b * block_size..(b + 1) * block_size];
                    let act_block = crate::quant::quantize_q8_0_block(dense_chunk);
                    acc += crate::quant::dot_q8_0_q8_0(block, &act_block);
                }
            }
            ElementType::Q4_0 => {
                for b in 0..n_blocks {
                    let start = (first_block + b) * block_bytes;
                    let block = &self.bytes[start..start + block_bytes];
                    let dense_chunk = &dense[b * block_size..(b + 1) * block_size];
                    let act_block = crate::quant::quantize_q8_0_block(dense_chunk);
                    acc += crate::quant::dot_q4_0_q8_0(block, &act_block);
                }
            }
            _ => {
                let mut scratch = [0.0f32; MAX_BLOCK_SIZE];
                for b in 0..n_blocks {
                    let start = (first_block + b) * block_bytes;
                    let block = &self.bytes[start..start + block_bytes];
                    self.element_type.decode_block(block, &mut scratch[..block_size]);
                    let dense_chunk = &dense[b * block_size..(b + 1) * block_size];
                    acc += kernels::dot(&scratch[..block_size], dense_chunk);
                }
            }
        }
        acc
    }

    /// `out[r] = Σ_c W[r*cols + c] * input[c]`, parallel across rows.
    pub fn matmul(&self, input: &[f32], out: &mut [f32], rows: usize, cols: usize) {
        debug_assert_eq!(input.len(), cols);
        debug_assert_eq!(out.len(), rows);
        debug_assert_eq!(rows * cols, self.total_elements);
        self.matmul_at(0, input, out, rows, cols);
    }

    /// Like [`matmul`](Self::matmul) but reads `rows * cols` elements
    /// starting at `elem_offset` instead of the whole view — used to slice
    /// one expert's `[ffn, dim]` block out of a stacked `[experts, ffn, dim]`
    /// tensor (spec ch. 4.5 "MoE FFN").
    pub fn matmul_at(&self, elem_offset: usize, input: &[f32], out: &mut [f32], rows: usize, cols: usize) {
        debug_assert_eq!(input.len(), cols);
        debug_assert_eq!(out.len(), rows);
        let block_size = self.element_type.block_size();
        debug_assert_eq!(cols % block_size, 0, "row width must be a multiple of block_size");
        debug_assert_eq!(elem_offset % block_size, 0, "expert slice offset must be a block boundary");

        out.par_iter_mut().enumerate().for_each(|(r, o)| {
            let row_offset = elem_offset + r * cols;
            *o = self.dot(row_offset, input, cols);
        });
    }
}
