use super::{get_scale_min_k4, QuantFormat};
use half::f16;

/// `[d:f16][dmin:f16][scales:12B][qs:128B]`, value = `d*sc*q - dmin*m`.
/// 256-element super-block split into eight 32-element sub-blocks; scales
/// and mins are packed 6 bits each via [`get_scale_min_k4`].
pub struct Q4_KFormat;

impl QuantFormat for Q4_KFormat {
    const BLOCK_SIZE: usize = 256;
    const BLOCK_BYTES: usize = 144;

    fn decode_block(block: &[u8], out: &mut [f32]) {
        let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
        let dmin = f16::from_le_bytes([block[2], block[3]]).to_f32();
        let scales = &block[4..16];
        let qs = &block[16..144];

        let mut y = 0usize;
        let mut q = 0usize;
        let mut is = 0usize;
        while y < 256 {
            let (sc1, m1) = get_scale_min_k4(is, scales);
            let d1 = d * sc1 as f32;
            let m1 = dmin * m1 as f32;
            let (sc2, m2) = get_scale_min_k4(is + 1, scales);
            let d2 = d * sc2 as f32;
            let m2 = dmin * m2 as f32;

            for l in 0..32 {
                out[y + l] = d1 * (qs[q + l] & 0x0F) as f32 - m1;
            }
            for l in 0..32 {
                out[y + 32 + l] = d2 * (qs[q + l] >> 4) as f32 - m2;
            }
            y += 64;
            q += 32;
            is += 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_is_finite_and_uses_all_bytes() {
        let mut block = vec![0u8; Q4_KFormat::BLOCK_BYTES];
        block[0..2].copy_from_slice(&f16::from_f32(1.0).to_le_bytes());
        block[2..4].copy_from_slice(&f16::from_f32(0.5).to_le_bytes());
        for (i, b) in block[4..16].iter_mut().enumerate() {
            *b = (i * 3 + 1) as u8 & 0x3F;
        }
        for (i, b) in block[16..144].iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        let mut out = [0.0f32; 256];
        Q4_KFormat::decode_block(&block, &mut out);
        assert!(out.iter().all(|v| v.is_finite()));
    }
}
