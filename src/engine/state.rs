//! Per-request state and the KV cache (spec ch. 3 "Per-request state", "KV cache").
//!
//! Allocated once per request and reused for every token: no per-token
//! allocation on the hot path (spec ch. 5 "Memory").

use crate::config::ModelConfig;

pub struct KvCache {
    block_count: usize,
    max_seq_len: usize,
    kv_dim: usize,
    k: Vec<f32>,
    v: Vec<f32>,
}

impl KvCache {
    pub fn new(block_count: usize, max_seq_len: usize, kv_dim: usize) -> Self {
        let len = block_count * max_seq_len * kv_dim;
        Self {
            block_count,
            max_seq_len,
            kv_dim,
            k: vec![0.0; len],
            v: vec![0.0; len],
        }
    }

    fn offset(&self, layer: usize, position: usize) -> usize {
        debug_assert!(layer < self.block_count);
        debug_assert!(position < self.max_seq_len);
        (layer * self.max_seq_len + position) * self.kv_dim
    }

    pub fn write(&mut self, layer: usize, position: usize, k: &[f32], v: &[f32]) {
        let off = self.offset(layer, position);
        self.k[off..off + self.kv_dim].copy_from_slice(k);
        self.v[off..off + self.kv_dim].copy_from_slice(v);
    }

    pub fn key(&self, layer: usize, position: usize) -> &[f32] {
        let off = self.offset(layer, position);
        &self.k[off..off + self.kv_dim]
    }

    pub fn value(&self, layer: usize, position: usize) -> &[f32] {
        let off = self.offset(layer, position);
        &self.v[off..off + self.kv_dim]
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }
}

/// Scratch buffers for a single in-flight request. Mutated only by the
/// request that owns it; never aliases the engine's read-only weights.
pub struct RequestState {
    pub x: Vec<f32>,
    pub xb: Vec<f32>,
    pub xb2: Vec<f32>,
    pub hb: Vec<f32>,
    pub hb2: Vec<f32>,
    pub q: Vec<f32>,
    pub k: Vec<f32>,
    pub v: Vec<f32>,
    pub att: Vec<f32>,
    pub logits: Vec<f32>,

    // MoE-only scratch.
    pub router_logits: Vec<f32>,
    pub selected_experts: Vec<usize>,
    pub selected_weights: Vec<f32>,
    pub expert_scratch_gate: Vec<f32>,
    pub expert_scratch_up: Vec<f32>,
    pub expert_scratch_out: Vec<f32>,

    pub kv_cache: KvCache,
    pub recent_tokens: Vec<u32>,
}

impl RequestState {
    pub fn new(config: &ModelConfig, max_seq_len: usize) -> Self {
        let dim = config.embedding_length;
        let ffn = config.intermediate_size;
        let q_dim = config.head_count * config.head_size;
        let kv_dim = config.kv_dim;
        let xb2_len = dim.max(config.head_count * config.head_size);

        Self {
            x: vec![0.0; dim],
            xb: vec![0.0; dim],
            xb2: vec![0.0; xb2_len],
            hb: vec![0.0; ffn],
            hb2: vec![0.0; ffn],
            q: vec![0.0; q_dim],
            k: vec![0.0; kv_dim],
            v: vec![0.0; kv_dim],
            // One extra slot per head row: models with attention sinks append
            // a learned bias past the last valid position before softmax-ing.
            att: vec![0.0; config.head_count * (max_seq_len + 1)],
            logits: vec![0.0; config.vocab_size],

            router_logits: vec![0.0; config.expert_count],
            selected_experts: vec![0; config.expert_used_count],
            selected_weights: vec![0.0; config.expert_used_count],
            expert_scratch_gate: vec![0.0; config.expert_ffn_length],
            expert_scratch_up: vec![0.0; config.expert_ffn_length],
            expert_scratch_out: vec![0.0; dim],

            kv_cache: KvCache::new(config.block_count, max_seq_len, kv_dim.max(1)),
            recent_tokens: Vec::with_capacity(64),
        }
    }

    /// Pushes a token onto the bounded repetition-penalty window (spec ch. 4.6).
    pub fn push_recent(&mut self, token: u32) {
        const WINDOW: usize = 64;
        self.recent_tokens.push(token);
        if self.recent_tokens.len() > WINDOW {
            self.recent_tokens.remove(0);
        }
    }
}
