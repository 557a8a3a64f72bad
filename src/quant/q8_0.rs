use super::QuantFormat;
use half::f16;

/// `[scale:f16][32 x i8]`, value = `scale * q`.
pub struct Q8_0Format;

impl QuantFormat for Q8_0Format {
    const BLOCK_SIZE: usize = 32;
    const BLOCK_BYTES: usize = 34;

    fn decode_block(block: &[u8], out: &mut [f32]) {
        let scale = f16::from_le_bytes([block[0], block[1]]).to_f32();
        for (i, &b) in block[2..34].iter().enumerate() {
            out[i] = (b as i8) as f32 * scale;
        }
    }
}

/// Integer fast path for a Q8_0 x Q8_0 block dot product: multiply the two
/// scales once, multiply the quants as integers and accumulate in `i32`,
/// then scale the sum a single time at the end (spec ch. 4.2).
pub fn dot_q8_0_q8_0(a: &[u8], b: &[u8]) -> f32 {
    debug_assert_eq!(a.len(), Q8_0Format::BLOCK_BYTES);
    debug_assert_eq!(b.len(), Q8_0Format::BLOCK_BYTES);
    let scale_a = f16::from_le_bytes([a[0], a[1]]).to_f32();
    let scale_b = f16::from_le_bytes([b[0], b[1]]).to_f32();
    let mut acc: i32 = 0;
    for i in 0..32 {
        acc += (a[2 + i] as i8) as i32 * (b[2 + i] as i8) as i32;
    }
    scale_a * scale_b * acc as f32
}

/// Quantizes one block of 32 activations into Q8_0 so the integer dot fast
/// path can run against them at matmul time (spec ch. 4.2).
pub fn quantize_block(x: &[f32]) -> [u8; Q8_0Format::BLOCK_BYTES] {
    debug_assert_eq!(x.len(), Q8_0Format::BLOCK_SIZE);
    let amax = x.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
    let scale = amax / 127.0;
    let inv_scale = if scale > 0.0 { 1.0 / scale } else { 0.0 };
    let mut block = [0u8; Q8_0Format::BLOCK_BYTES];
    block[0..2].copy_from_slice(&f16::from_f32(scale).to_le_bytes());
    for (i, &v) in x.iter().enumerate() {
        let q = (v * inv_scale).round().clamp(-127.0, 127.0) as i8;
        block[2 + i] = q as u8;
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_path_matches_scenario_s3() {
        let mut a = vec![0u8; 34];
        a[0..2].copy_from_slice(&f16::from_f32(0.5).to_le_bytes());
        for i in 0..32u8 {
            a[2 + i as usize] = i;
        }
        let mut b = vec![0u8; 34];
        b[0..2].copy_from_slice(&f16::from_f32(0.25).to_le_bytes());
        for i in 0..32u8 {
            b[2 + i as usize] = i;
        }
        let got = dot_q8_0_q8_0(&a, &b);
        assert!((got - 1302.0).abs() < 1e-2, "got {got}");
    }

    #[test]
    fn quantize_block_round_trips_through_dot() {
        let act = [0.5f32; 32];
        let act_block = quantize_block(&act);
        let mut w = vec![0u8; 34];
        w[0..2].copy_from_slice(&f16::from_f32(1.0).to_le_bytes());
        for i in 0..32u8 {
            w[2 + i as usize] = 1; // every weight quant == 1
        }
        let got = dot_q8_0_q8_0(&w, &act_block);
        let expected: f32 = act.iter().sum();
        assert!((got - expected).abs() < 0.05, "got {got}, expected {expected}");
    }

    #[test]
    fn decode_round_trips_scale() {
        let mut block = vec![0u8; 34];
        block[0..2].copy_from_slice(&f16::from_f32(2.0).to_le_bytes());
        block[2] = 5u8;
        block[3] = (-3i8) as u8;
        let mut out = [0.0f32; 32];
        Q8_0Format::decode_block(&block, &mut out);
        assert_eq!(out[0], 10.0);
        assert_eq!(out[1], -6.0);
    }
}
