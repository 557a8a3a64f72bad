//! Shared GGUF-byte-buffer builder for the end-to-end scenario tests
//! (spec ch. 8, scenarios S1/S5/S6). Writes a minimal but well-formed
//! container: magic/version/counts, a metadata dictionary, a tensor
//! directory, then an aligned all-zero data region.

use ferroflow::container::MAGIC;

/// Installs a `tracing` subscriber once per test binary so `cargo test --
/// --nocapture` shows the engine's load/generate spans. Safe to call from
/// every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const TAG_U32: u32 = 4;
const TAG_F32_META: u32 = 6;
const TAG_STRING: u32 = 8;
const TAG_F32_TENSOR: u32 = 0;

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn write_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u64(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

pub enum MetaVal {
    U32(u32),
    F32(f32),
    String(&'static str),
}

/// A tiny dense (llama-shaped) model: `block_count` layers, every weight an
/// all-zero F32 tensor. Shapes follow the dense forward pass in
/// `engine::forward` exactly, so the resulting file loads through the real
/// `Engine::load` path rather than a hand-rolled stand-in.
pub fn build_zero_model_bytes(
    block_count: u64,
    head_count: u64,
    head_count_kv: u64,
    head_size: u64,
    embedding_length: u64,
    intermediate_size: u64,
    vocab_size: u64,
) -> Vec<u8> {
    let q_dim = head_count * head_size;
    let kv_dim = head_count_kv * head_size;

    let metadata: Vec<(&str, MetaVal)> = vec![
        ("general.architecture", MetaVal::String("llama")),
        ("general.alignment", MetaVal::U32(32)),
        ("llama.embedding_length", MetaVal::U32(embedding_length as u32)),
        ("llama.block_count", MetaVal::U32(block_count as u32)),
        ("llama.attention.head_count", MetaVal::U32(head_count as u32)),
        ("llama.attention.head_count_kv", MetaVal::U32(head_count_kv as u32)),
        ("llama.context_length", MetaVal::U32(128)),
        ("llama.vocab_size", MetaVal::U32(vocab_size as u32)),
        ("llama.feed_forward_length", MetaVal::U32(intermediate_size as u32)),
        ("llama.attention.key_length", MetaVal::U32(head_size as u32)),
        ("llama.attention.value_length", MetaVal::U32(head_size as u32)),
        ("llama.attention.layer_norm_rms_epsilon", MetaVal::F32(1e-5)),
        ("llama.rope.freq_base", MetaVal::F32(10000.0)),
        ("tokenizer.ggml.eos_token_id", MetaVal::U32(0)),
    ];

    let mut tensors: Vec<(String, u64)> = vec![("token_embd.weight".to_string(), vocab_size * embedding_length)];
    for i in 0..block_count {
        tensors.push((format!("blk.{i}.attn_norm.weight"), embedding_length));
        tensors.push((format!("blk.{i}.ffn_norm.weight"), embedding_length));
        tensors.push((format!("blk.{i}.attn_q.weight"), q_dim * embedding_length));
        tensors.push((format!("blk.{i}.attn_k.weight"), kv_dim * embedding_length));
        tensors.push((format!("blk.{i}.attn_v.weight"), kv_dim * embedding_length));
        tensors.push((format!("blk.{i}.attn_output.weight"), embedding_length * q_dim));
        tensors.push((format!("blk.{i}.ffn_gate.weight"), intermediate_size * embedding_length));
        tensors.push((format!("blk.{i}.ffn_up.weight"), intermediate_size * embedding_length));
        tensors.push((format!("blk.{i}.ffn_down.weight"), embedding_length * intermediate_size));
    }
    tensors.push(("output_norm.weight".to_string(), embedding_length));
    tensors.push(("output.weight".to_string(), vocab_size * embedding_length));

    let mut buf = Vec::new();
    write_u32(&mut buf, MAGIC);
    write_u32(&mut buf, 3);
    write_u64(&mut buf, tensors.len() as u64);
    write_u64(&mut buf, metadata.len() as u64);

    for (key, val) in &metadata {
        write_string(&mut buf, key);
        match val {
            MetaVal::U32(v) => {
                write_u32(&mut buf, TAG_U32);
                write_u32(&mut buf, *v);
            }
            MetaVal::F32(v) => {
                write_u32(&mut buf, TAG_F32_META);
                write_f32(&mut buf, *v);
            }
            MetaVal::String(v) => {
                write_u32(&mut buf, TAG_STRING);
                write_string(&mut buf, v);
            }
        }
    }

    let mut offset = 0u64;
    for (name, element_count) in &tensors {
        write_string(&mut buf, name);
        write_u32(&mut buf, 1); // n_dims
        write_u64(&mut buf, *element_count);
        write_u32(&mut buf, TAG_F32_TENSOR);
        write_u64(&mut buf, offset);
        offset += element_count * 4;
    }

    while buf.len() % 32 != 0 {
        buf.push(0);
    }
    buf.extend(std::iter::repeat(0u8).take(offset as usize));
    buf
}
