use super::QuantFormat;
use half::f16;

/// `[hmask:32B][qs:64B][scales:12B packed 6-bit][d:f16]`;
/// value = `d * (sc - 32) * ((lo | hbit<<2) - 4)`.
///
/// The 12-byte scale block packs sixteen signed 6-bit scales two different
/// ways depending on index; ported from the reference unpacking (flagged in
/// the design notes as needing bit-for-bit verification against a real
/// container — see DESIGN.md).
pub struct Q3_KFormat;

const KMASK1: u32 = 0x0303_0303;
const KMASK2: u32 = 0x0f0f_0f0f;

fn unpack_scales(raw: &[u8]) -> [i8; 16] {
    let mut aux = [0u32; 4];
    for i in 0..4 {
        aux[i] = u32::from_le_bytes([raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]]);
    }
    let tmp = aux[2];
    let a2 = ((aux[0] >> 4) & KMASK2) | (((tmp >> 4) & KMASK1) << 4);
    let a3 = ((aux[1] >> 4) & KMASK2) | (((tmp >> 6) & KMASK1) << 4);
    let a0 = (aux[0] & KMASK2) | (((tmp) & KMASK1) << 4);
    let a1 = (aux[1] & KMASK2) | (((tmp >> 2) & KMASK1) << 4);
    let words = [a0, a1, a2, a3];
    let mut scales = [0i8; 16];
    for (w, word) in words.iter().enumerate() {
        let bytes = word.to_le_bytes();
        for (b, byte) in bytes.iter().enumerate() {
            scales[w * 4 + b] = *byte as i8;
        }
    }
    scales
}

impl QuantFormat for Q3_KFormat {
    const BLOCK_SIZE: usize = 256;
    const BLOCK_BYTES: usize = 110;

    fn decode_block(block: &[u8], out: &mut [f32]) {
        let hmask = &block[0..32];
        let qs = &block[32..96];
        let raw_scales = &block[96..108];
        let d_all = f16::from_le_bytes([block[108], block[109]]).to_f32();

        let scales = unpack_scales(raw_scales);

        let mut m: u8 = 1;
        let mut is = 0usize;
        let mut q_off = 0usize;
        let mut y_off = 0usize;
        for _n in 0..2 {
            let mut shift = 0u32;
            for _j in 0..4 {
                let dl1 = d_all * (scales[is] as f32 - 32.0);
                is += 1;
                for l in 0..16 {
                    let lo = (qs[q_off + l] >> shift) & 3;
                    let hbit = if hmask[q_off + l] & m != 0 { 0 } else { 4 };
                    out[y_off + l] = dl1 * (lo as i32 - hbit) as f32;
                }
                let dl2 = d_all * (scales[is] as f32 - 32.0);
                is += 1;
                for l in 0..16 {
                    let lo = (qs[q_off + l + 16] >> shift) & 3;
                    let hbit = if hmask[q_off + l + 16] & m != 0 { 0 } else { 4 };
                    out[y_off + l + 16] = dl2 * (lo as i32 - hbit) as f32;
                }
                y_off += 32;
                shift += 2;
                m <<= 1;
            }
            q_off += 32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_is_finite_and_uses_all_bytes() {
        let mut block = vec![0u8; Q3_KFormat::BLOCK_BYTES];
        for (i, b) in block[0..32].iter_mut().enumerate() {
            *b = (i * 11) as u8;
        }
        for (i, b) in block[32..96].iter_mut().enumerate() {
            *b = (i * 13) as u8;
        }
        for (i, b) in block[96..108].iter_mut().enumerate() {
            *b = (i * 17) as u8;
        }
        block[108..110].copy_from_slice(&f16::from_f32(1.0).to_le_bytes());
        let mut out = [0.0f32; 256];
        Q3_KFormat::decode_block(&block, &mut out);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn all_zero_block_decodes_to_zero() {
        let block = vec![0u8; Q3_KFormat::BLOCK_BYTES];
        let mut out = [1.0f32; 256];
        Q3_KFormat::decode_block(&block, &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
