use super::QuantFormat;
use half::f16;

pub struct F16Format;

impl QuantFormat for F16Format {
    const BLOCK_SIZE: usize = 1;
    const BLOCK_BYTES: usize = 2;

    fn decode_block(block: &[u8], out: &mut [f32]) {
        out[0] = f16::from_le_bytes([block[0], block[1]]).to_f32();
    }
}
