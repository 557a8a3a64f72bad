use super::QuantFormat;
use half::f16;

/// `[ql:128B][qh:64B][scales:16B i8][d:f16]`; 6-bit quant, signed scales,
/// value = `d * sc * (q - 32)`.
pub struct Q6_KFormat;

impl QuantFormat for Q6_KFormat {
    const BLOCK_SIZE: usize = 256;
    const BLOCK_BYTES: usize = 210;

    fn decode_block(block: &[u8], out: &mut [f32]) {
        let ql_all = &block[0..128];
        let qh_all = &block[128..192];
        let scales = &block[192..208];
        let d = f16::from_le_bytes([block[208], block[209]]).to_f32();

        for half in 0..2 {
            let ql = &ql_all[half * 64..half * 64 + 64];
            let qh = &qh_all[half * 32..half * 32 + 32];
            let sc = &scales[half * 8..half * 8 + 8];
            let y = &mut out[half * 128..half * 128 + 128];

            for l in 0..32 {
                let is = l / 16;
                let q1 = ((ql[l] & 0x0F) | (((qh[l] >> 0) & 3) << 4)) as i32 - 32;
                let q2 = ((ql[l + 32] & 0x0F) | (((qh[l] >> 2) & 3) << 4)) as i32 - 32;
                let q3 = ((ql[l] >> 4) | (((qh[l] >> 4) & 3) << 4)) as i32 - 32;
                let q4 = ((ql[l + 32] >> 4) | (((qh[l] >> 6) & 3) << 4)) as i32 - 32;

                y[l] = d * (sc[is] as i8) as f32 * q1 as f32;
                y[l + 32] = d * (sc[is + 2] as i8) as f32 * q2 as f32;
                y[l + 64] = d * (sc[is + 4] as i8) as f32 * q3 as f32;
                y[l + 96] = d * (sc[is + 6] as i8) as f32 * q4 as f32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_is_finite_and_uses_all_bytes() {
        let mut block = vec![0u8; Q6_KFormat::BLOCK_BYTES];
        for (i, b) in block[0..128].iter_mut().enumerate() {
            *b = (i * 3) as u8;
        }
        for (i, b) in block[128..192].iter_mut().enumerate() {
            *b = (i * 5) as u8;
        }
        for (i, b) in block[192..208].iter_mut().enumerate() {
            *b = (i as i32 * 7 - 50) as i8 as u8;
        }
        block[208..210].copy_from_slice(&f16::from_f32(1.0).to_le_bytes());
        let mut out = [0.0f32; 256];
        Q6_KFormat::decode_block(&block, &mut out);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn negative_scale_byte_sign_extends_instead_of_widening() {
        // All quant codes zero -> q - 32 == -32 for every lane. scales[0] is
        // the raw byte 255, i.e. -1 as i8: the decoded value must flip sign
        // relative to the all-zero-scale case, not blow up to a huge positive
        // magnitude from treating 255 as an unsigned scale.
        let mut block = vec![0u8; Q6_KFormat::BLOCK_BYTES];
        block[192] = 255; // scales[0] == -1i8
        block[208..210].copy_from_slice(&f16::from_f32(1.0).to_le_bytes());
        let mut out = [0.0f32; 256];
        Q6_KFormat::decode_block(&block, &mut out);
        assert_eq!(out[0], 32.0, "expected d(1) * sc(-1) * (q-32)(-32) == 32, got {}", out[0]);
    }

    #[test]
    fn all_zero_quants_decode_to_zero() {
        // ql/qh all zero -> every 6-bit code is 0, q - 32 == -32, but d == 0
        // so the whole block must decode to exactly zero regardless of scale.
        let block = vec![0u8; Q6_KFormat::BLOCK_BYTES];
        let mut out = [1.0f32; 256];
        Q6_KFormat::decode_block(&block, &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
