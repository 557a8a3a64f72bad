use super::QuantFormat;
use byteorder::{ByteOrder, LittleEndian};

pub struct F32Format;

impl QuantFormat for F32Format {
    const BLOCK_SIZE: usize = 1;
    const BLOCK_BYTES: usize = 4;

    fn decode_block(block: &[u8], out: &mut [f32]) {
        out[0] = LittleEndian::read_f32(block);
    }
}
