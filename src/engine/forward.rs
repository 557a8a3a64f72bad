//! Per-layer forward pass shared by the dense/GQA, MLA, and MoE engine
//! shapes (spec ch. 4.5). The outer driver is shape-agnostic (spec ch. 9);
//! this module is where the three shapes actually differ.

use crate::config::ModelConfig;
use crate::engine::rope;
use crate::engine::state::RequestState;
use crate::tensor::kernels;
use crate::tensor::TensorView;
use crate::weights::{DenseLayerWeights, LayerWeights, MlaLayerWeights, MlaMoeLayerWeights, MoeLayerWeights};
use rayon::prelude::*;

/// Normalizer weight vectors and (for architectures with QKV biases) bias
/// vectors, dequantized once at load time (spec ch. 4.5 "Normalizer
/// pre-caching") rather than on every token's forward pass.
pub struct CachedNorms {
    pub attn_norm: Vec<Vec<f32>>,
    pub ffn_norm: Vec<Vec<f32>>,
    pub output_norm: Vec<f32>,
    qkv_bias: Vec<Option<QkvBias>>,
}

struct QkvBias {
    q: Option<Vec<f32>>,
    k: Option<Vec<f32>>,
    v: Option<Vec<f32>>,
}

fn dequant_all(view: &crate::tensor::TensorView) -> Vec<f32> {
    (0..view.total_elements()).map(|i| view.get_float(i)).collect()
}

impl CachedNorms {
    pub fn build(container: &crate::container::Container, config: &ModelConfig) -> Result<Self, crate::error::LoadError> {
        let mut attn_norm = Vec::with_capacity(config.block_count);
        let mut ffn_norm = Vec::with_capacity(config.block_count);
        let mut qkv_bias = Vec::with_capacity(config.block_count);
        for i in 0..config.block_count {
            let weights = crate::weights::bind_layer(container, config, i)?;
            let (a, f) = match &weights {
                LayerWeights::Dense(w) => (&w.attn_norm, &w.ffn_norm),
                LayerWeights::Mla(w) => (&w.attn_norm, &w.ffn_norm),
                LayerWeights::Moe(w) => (&w.attn_norm, &w.ffn_norm),
                LayerWeights::MlaMoe(w) => (&w.attn_norm, &w.ffn_norm),
            };
            attn_norm.push(dequant_all(a));
            ffn_norm.push(dequant_all(f));

            qkv_bias.push(match &weights {
                LayerWeights::Dense(w) if w.bq.is_some() || w.bk.is_some() || w.bv.is_some() => Some(QkvBias {
                    q: w.bq.as_ref().map(dequant_all),
                    k: w.bk.as_ref().map(dequant_all),
                    v: w.bv.as_ref().map(dequant_all),
                }),
                _ => None,
            });
        }
        let output_norm = dequant_all(&crate::tensor::require_view(container, "output_norm.weight")?);
        Ok(Self {
            attn_norm,
            ffn_norm,
            output_norm,
            qkv_bias,
        })
    }
}

fn project_qkv_dense(state: &mut RequestState, w: &DenseLayerWeights, config: &ModelConfig, bias: Option<&QkvBias>) {
    let dim = config.embedding_length;
    let q_dim = config.head_count * config.head_size;
    let kv_dim = config.kv_dim;

    if let Some(wqkv) = &w.wqkv {
        let mut merged = vec![0.0f32; q_dim + 2 * kv_dim];
        wqkv.matmul(&state.xb, &mut merged, q_dim + 2 * kv_dim, dim);
        state.q.copy_from_slice(&merged[0..q_dim]);
        state.k.copy_from_slice(&merged[q_dim..q_dim + kv_dim]);
        state.v.copy_from_slice(&merged[q_dim + kv_dim..]);
    } else {
        w.wq.as_ref().expect("wq required without merged wqkv").matmul(&state.xb, &mut state.q, q_dim, dim);
        w.wk.as_ref().expect("wk required without merged wqkv").matmul(&state.xb, &mut state.k, kv_dim, dim);
        w.wv.as_ref().expect("wv required without merged wqkv").matmul(&state.xb, &mut state.v, kv_dim, dim);
    }
    let Some(bias) = bias else { return };
    if let Some(bq) = &bias.q {
        kernels::accumulate(&mut state.q, bq);
    }
    if let Some(bk) = &bias.k {
        kernels::accumulate(&mut state.k, bk);
    }
    if let Some(bv) = &bias.v {
        kernels::accumulate(&mut state.v, bv);
    }
}

fn project_qkv_moe(state: &mut RequestState, w: &MoeLayerWeights, config: &ModelConfig) {
    let dim = config.embedding_length;
    let q_dim = config.head_count * config.head_size;
    let kv_dim = config.kv_dim;
    if let Some(wqkv) = &w.wqkv {
        let mut merged = vec![0.0f32; q_dim + 2 * kv_dim];
        wqkv.matmul(&state.xb, &mut merged, q_dim + 2 * kv_dim, dim);
        state.q.copy_from_slice(&merged[0..q_dim]);
        state.k.copy_from_slice(&merged[q_dim..q_dim + kv_dim]);
        state.v.copy_from_slice(&merged[q_dim + kv_dim..]);
    } else {
        w.wq.as_ref().expect("wq required without merged wqkv").matmul(&state.xb, &mut state.q, q_dim, dim);
        w.wk.as_ref().expect("wk required without merged wqkv").matmul(&state.xb, &mut state.k, kv_dim, dim);
        w.wv.as_ref().expect("wv required without merged wqkv").matmul(&state.xb, &mut state.v, kv_dim, dim);
    }
}

/// Optional per-head RMS-norm applied to Q (over `head_count` heads) or K
/// (over `head_count_kv` heads), each of size `head_size` (spec ch. 4.5 step 3).
fn apply_head_norm(buf: &mut [f32], norm_weight: &crate::tensor::TensorView, n_heads: usize, head_size: usize, eps: f32) {
    let w = dequant_all(norm_weight);
    let mut scratch = vec![0.0f32; head_size];
    for h in 0..n_heads {
        let slice = &mut buf[h * head_size..(h + 1) * head_size];
        kernels::rms_norm(&mut scratch, slice, &w, eps);
        slice.copy_from_slice(&scratch);
    }
}

fn apply_rope_heads(buf: &mut [f32], n_heads: usize, head_size: usize, position: usize, config: &ModelConfig, freqs: Option<&[f32]>) {
    for h in 0..n_heads {
        let slice = &mut buf[h * head_size..(h + 1) * head_size];
        rope::apply(slice, position, config, freqs);
    }
}

/// First position this layer attends to at `position`, per spec ch. 4.5 step
/// 6: `t < position - window + 1` is masked out. `sliding_window_pattern`
/// follows the Gemma2/Gemma3 convention — every `pattern`-th layer (1-indexed)
/// is a full-attention layer, the rest use the sliding window. A pattern of
/// `0` means every layer uses the window.
fn sliding_window_start(layer: usize, position: usize, config: &ModelConfig) -> usize {
    if config.sliding_window == 0 {
        return 0;
    }
    let layer_is_windowed = config.sliding_window_pattern == 0 || (layer + 1) % config.sliding_window_pattern != 0;
    if layer_is_windowed {
        position.saturating_sub(config.sliding_window - 1)
    } else {
        0
    }
}

/// Multi-head attention given Q/K/V already projected, rotated, and written
/// into the KV cache (spec ch. 4.5 step 6). `window_start` masks out any
/// position before it (0 for full attention).
fn attention(state: &mut RequestState, config: &ModelConfig, layer: usize, position: usize, window_start: usize, attn_sinks: Option<&[f32]>, logit_softcap: f32) {
    let head_count = config.head_count;
    let head_size = config.head_size;
    let group = head_count / config.head_count_kv;
    let max_seq_len = state.kv_cache.max_seq_len();

    let q = state.q.clone();
    let kv_cache = &state.kv_cache;
    let mut xb2 = vec![0.0f32; head_count * head_size];
    // +1: the attention-sinks bias occupies one slot past the last valid
    // position (see `RequestState::new`).
    let att_stride = max_seq_len + 1;
    let mut att = std::mem::take(&mut state.att);

    xb2
        .par_chunks_mut(head_size)
        .enumerate()
        .for_each(|(h, out_head)| {
            let kv_head = h / group;
            let q_head = &q[h * head_size..(h + 1) * head_size];
            let att_row = &mut att[h * att_stride..h * att_stride + att_stride];

            for t in window_start..=position {
                let k_t = kv_cache.key(layer, t);
                let kv_slice = &k_t[kv_head * head_size..(kv_head + 1) * head_size];
                let mut score = kernels::dot(q_head, kv_slice) / (head_size as f32).sqrt();
                if logit_softcap != 0.0 {
                    score = logit_softcap * (score / logit_softcap).tanh();
                }
                att_row[t] = score;
            }

            let n = position + 1;
            if let Some(sinks) = attn_sinks {
                // Append the learned per-head bias to the denominator only:
                // run softmax over the window's slots plus this one, then
                // drop the extra slot.
                att_row[n] = sinks[h];
                kernels::softmax(att_row, window_start, n + 1 - window_start);
            } else {
                kernels::softmax(att_row, window_start, n - window_start);
            }

            for v in out_head.iter_mut() {
                *v = 0.0;
            }
            for t in window_start..n {
                let v_t = kv_cache.value(layer, t);
                let kv_slice = &v_t[kv_head * head_size..(kv_head + 1) * head_size];
                kernels::saxpy(out_head, att_row[t], kv_slice);
            }
        });

    state.att = att;
    state.xb2[..xb2.len()].copy_from_slice(&xb2);
}

fn ffn_dense(state: &mut RequestState, w_gate: &crate::tensor::TensorView, w_up: &crate::tensor::TensorView, w_down: &crate::tensor::TensorView, dim: usize, ffn: usize) {
    w_gate.matmul(&state.xb, &mut state.hb, ffn, dim);
    w_up.matmul(&state.xb, &mut state.hb2, ffn, dim);
    kernels::silu(&mut state.hb);
    let mut gated = vec![0.0f32; ffn];
    kernels::elementwise_mul(&mut gated, &state.hb, &state.hb2);
    w_down.matmul(&gated, &mut state.xb, dim, ffn);
}

/// MoE FFN (spec ch. 4.5 "MoE FFN"): router top-K selection, per-expert
/// SwiGLU on sliced expert stacks, weighted accumulation, optional shared
/// expert. Takes raw tensor views rather than a `MoeLayerWeights` so both the
/// plain MoE and MLA+MoE layer shapes can share it.
#[allow(clippy::too_many_arguments)]
fn ffn_moe(
    state: &mut RequestState,
    router: &TensorView,
    experts_gate: &TensorView,
    experts_up: &TensorView,
    experts_down: &TensorView,
    shared: Option<(&TensorView, &TensorView, &TensorView)>,
    config: &ModelConfig,
) {
    let dim = config.embedding_length;
    let ffn = config.expert_ffn_length;
    let e = config.expert_count;
    let k = config.expert_used_count;

    router.matmul(&state.xb, &mut state.router_logits, e, dim);
    kernels::softmax(&mut state.router_logits, 0, e);

    let mut ranked: Vec<usize> = (0..e).collect();
    ranked.sort_unstable_by(|&a, &b| state.router_logits[b].partial_cmp(&state.router_logits[a]).unwrap());
    let top = &ranked[0..k];
    let sum: f32 = top.iter().map(|&idx| state.router_logits[idx]).sum();
    let mut accum = vec![0.0f32; dim];

    for (slot, &expert) in top.iter().enumerate() {
        let weight = if sum > 0.0 { state.router_logits[expert] / sum } else { 1.0 / k as f32 };
        let row_offset = expert * ffn * dim;
        experts_gate.matmul_at(row_offset, &state.xb, &mut state.expert_scratch_gate, ffn, dim);
        experts_up.matmul_at(row_offset, &state.xb, &mut state.expert_scratch_up, ffn, dim);
        kernels::silu(&mut state.expert_scratch_gate);
        let mut gated = vec![0.0f32; ffn];
        kernels::elementwise_mul(&mut gated, &state.expert_scratch_gate, &state.expert_scratch_up);
        let down_offset = expert * dim * ffn;
        experts_down.matmul_at(down_offset, &gated, &mut state.expert_scratch_out, dim, ffn);
        kernels::saxpy(&mut accum, weight, &state.expert_scratch_out);
        state.selected_experts[slot] = expert;
        state.selected_weights[slot] = weight;
    }

    if let Some((sg, su, sd)) = shared {
        let shared_ffn = config.expert_shared_count * ffn;
        let mut hb = vec![0.0f32; shared_ffn];
        let mut hb2 = vec![0.0f32; shared_ffn];
        sg.matmul(&state.xb, &mut hb, shared_ffn, dim);
        su.matmul(&state.xb, &mut hb2, shared_ffn, dim);
        kernels::silu(&mut hb);
        let mut gated = vec![0.0f32; shared_ffn];
        kernels::elementwise_mul(&mut gated, &hb, &hb2);
        let mut shared_out = vec![0.0f32; dim];
        sd.matmul(&gated, &mut shared_out, dim, shared_ffn);
        kernels::accumulate(&mut accum, &shared_out);
    }

    state.xb.copy_from_slice(&accum);
}

pub fn forward_layer(state: &mut RequestState, norms: &CachedNorms, weights: &LayerWeights, config: &ModelConfig, layer: usize, position: usize) {
    let dim = config.embedding_length;
    kernels::rms_norm(&mut state.xb, &state.x, &norms.attn_norm[layer], config.norm_eps);

    match weights {
        LayerWeights::Dense(w) => {
            project_qkv_dense(state, w, config, norms.qkv_bias[layer].as_ref());
            if let Some(qn) = &w.q_norm {
                apply_head_norm(&mut state.q, qn, config.head_count, config.head_size, config.norm_eps);
            }
            if let Some(kn) = &w.k_norm {
                apply_head_norm(&mut state.k, kn, config.head_count_kv, config.head_size, config.norm_eps);
            }
            apply_rope_heads(&mut state.q, config.head_count, config.head_size, position, config, None);
            apply_rope_heads(&mut state.k, config.head_count_kv, config.head_size, position, config, None);

            let (k, v) = (state.k.clone(), state.v.clone());
            state.kv_cache.write(layer, position, &k, &v);

            let window_start = sliding_window_start(layer, position, config);
            attention(state, config, layer, position, window_start, None, config.attn_logit_softcapping);
            w.wo.matmul(&state.xb2[..config.head_count * config.head_size], &mut state.xb, dim, config.head_count * config.head_size);
            if let Some(pn) = &w.post_attn_norm {
                // Applied to the attention branch before the residual add
                // (Gemma2-style), not to the accumulated stream.
                let xb_clone = state.xb.clone();
                kernels::rms_norm(&mut state.xb, &xb_clone, &dequant_all(pn), config.norm_eps);
            }
            kernels::accumulate(&mut state.x, &state.xb);

            kernels::rms_norm(&mut state.xb, &state.x, &norms.ffn_norm[layer], config.norm_eps);
            ffn_dense(state, &w.w_gate, &w.w_up, &w.w_down, dim, config.intermediate_size);
            kernels::accumulate(&mut state.x, &state.xb);
        }

        LayerWeights::Mla(w) => {
            forward_mla_attention(state, config, layer, position, w.wq.as_ref(), &w.kv_a_mqa, &w.kv_a_norm, &w.kv_b, &w.wo);
            kernels::rms_norm(&mut state.xb, &state.x, &norms.ffn_norm[layer], config.norm_eps);
            ffn_dense(state, &w.w_gate, &w.w_up, &w.w_down, dim, config.intermediate_size);
            kernels::accumulate(&mut state.x, &state.xb);
        }

        LayerWeights::Moe(w) => {
            project_qkv_moe(state, w, config);
            if let Some(qn) = &w.q_norm {
                apply_head_norm(&mut state.q, qn, config.head_count, config.head_size, config.norm_eps);
            }
            if let Some(kn) = &w.k_norm {
                apply_head_norm(&mut state.k, kn, config.head_count_kv, config.head_size, config.norm_eps);
            }
            apply_rope_heads(&mut state.q, config.head_count, config.head_size, position, config, None);
            apply_rope_heads(&mut state.k, config.head_count_kv, config.head_size, position, config, None);

            let (k, v) = (state.k.clone(), state.v.clone());
            state.kv_cache.write(layer, position, &k, &v);

            let sinks = w.attn_sinks.as_ref().map(dequant_all);
            let window_start = sliding_window_start(layer, position, config);
            attention(state, config, layer, position, window_start, sinks.as_deref(), config.attn_logit_softcapping);
            w.wo.matmul(&state.xb2[..config.head_count * config.head_size], &mut state.xb, dim, config.head_count * config.head_size);
            kernels::accumulate(&mut state.x, &state.xb);

            kernels::rms_norm(&mut state.xb, &state.x, &norms.ffn_norm[layer], config.norm_eps);
            if layer < config.leading_dense_block_count {
                ffn_dense(state, &w.experts_gate, &w.experts_up, &w.experts_down, dim, config.intermediate_size);
            } else {
                let router = w.router.as_ref().expect("router required for a routed MoE layer");
                let shared = w.shared_gate.as_ref().zip(w.shared_up.as_ref()).zip(w.shared_down.as_ref()).map(|((g, u), d)| (g, u, d));
                ffn_moe(state, router, &w.experts_gate, &w.experts_up, &w.experts_down, shared, config);
            }
            kernels::accumulate(&mut state.x, &state.xb);
        }

        LayerWeights::MlaMoe(w) => {
            forward_mla_attention(state, config, layer, position, w.wq.as_ref(), &w.kv_a_mqa, &w.kv_a_norm, &w.kv_b, &w.wo);

            kernels::rms_norm(&mut state.xb, &state.x, &norms.ffn_norm[layer], config.norm_eps);
            if layer < config.leading_dense_block_count {
                ffn_dense(state, &w.experts_gate, &w.experts_up, &w.experts_down, dim, config.intermediate_size);
            } else {
                let router = w.router.as_ref().expect("router required for a routed MoE layer");
                let shared = w.shared_gate.as_ref().zip(w.shared_up.as_ref()).zip(w.shared_down.as_ref()).map(|((g, u), d)| (g, u, d));
                ffn_moe(state, router, &w.experts_gate, &w.experts_up, &w.experts_down, shared, config);
            }
            kernels::accumulate(&mut state.x, &state.xb);
        }
    }
}

/// MLA attention (spec ch. 4.5 "MLA forward"): Q is projected normally if
/// `wq` exists, K/V come from the shared low-rank latent instead of
/// independent projections. Shared by the pure-MLA and MLA+MoE layer shapes,
/// which differ only in their FFN.
#[allow(clippy::too_many_arguments)]
fn forward_mla_attention(
    state: &mut RequestState,
    config: &ModelConfig,
    layer: usize,
    position: usize,
    wq: Option<&TensorView>,
    kv_a_mqa: &TensorView,
    kv_a_norm: &TensorView,
    kv_b: &TensorView,
    wo: &TensorView,
) {
    let dim = config.embedding_length;
    let q_dim = config.head_count * config.head_size;

    if let Some(wq) = wq {
        wq.matmul(&state.xb, &mut state.q, q_dim, dim);
    }

    let lora_rank = config.kv_lora_rank;
    let mut latent = vec![0.0f32; lora_rank];
    kv_a_mqa.matmul(&state.xb, &mut latent, lora_rank, dim);
    let mut latent_normed = vec![0.0f32; lora_rank];
    kernels::rms_norm(&mut latent_normed, &latent, &dequant_all(kv_a_norm), config.norm_eps);

    let kv_out = config.head_count_kv * (config.key_length + config.value_length);
    let mut expanded = vec![0.0f32; kv_out];
    kv_b.matmul(&latent_normed, &mut expanded, kv_out, lora_rank);

    let per_head = config.key_length + config.value_length;
    for h in 0..config.head_count_kv {
        let src = &expanded[h * per_head..(h + 1) * per_head];
        state.k[h * config.key_length..(h + 1) * config.key_length].copy_from_slice(&src[..config.key_length]);
        state.v[h * config.value_length..(h + 1) * config.value_length].copy_from_slice(&src[config.key_length..]);
    }

    apply_rope_heads(&mut state.q, config.head_count, config.head_size, position, config, None);
    apply_rope_heads(&mut state.k, config.head_count_kv, config.key_length, position, config, None);

    let (k, v) = (state.k.clone(), state.v.clone());
    state.kv_cache.write(layer, position, &k, &v);

    let window_start = sliding_window_start(layer, position, config);
    attention(state, config, layer, position, window_start, None, config.attn_logit_softcapping);
    wo.matmul(&state.xb2[..config.head_count * config.head_size], &mut state.xb, dim, config.head_count * config.head_size);
    kernels::accumulate(&mut state.x, &state.xb);
}

pub fn final_norm_and_logits(state: &mut RequestState, norms: &CachedNorms, output: &crate::tensor::TensorView, config: &ModelConfig) {
    let dim = config.embedding_length;
    kernels::rms_norm(&mut state.xb, &state.x, &norms.output_norm, config.norm_eps);
    output.matmul(&state.xb, &mut state.logits, config.vocab_size, dim);
    if config.logit_scale != 0.0 {
        kernels::scale(&mut state.logits, config.logit_scale);
    }
    if config.final_logit_softcapping != 0.0 {
        let cap = config.final_logit_softcapping;
        for l in state.logits.iter_mut() {
            *l = cap * (*l / cap).tanh();
        }
    }
}
