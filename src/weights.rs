//! Per-layer weight binding: tensor directory entries named per the model's
//! naming convention, resolved once at load time into typed view handles
//! (spec ch. 3 "Layer weights", ch. 9 "Ownership shape").

use crate::config::{Architecture, ModelConfig};
use crate::container::Container;
use crate::error::LoadError;
use crate::tensor::{self, TensorView};

pub struct DenseLayerWeights<'a> {
    pub attn_norm: TensorView<'a>,
    pub ffn_norm: TensorView<'a>,
    pub wq: Option<TensorView<'a>>,
    pub wk: Option<TensorView<'a>>,
    pub wv: Option<TensorView<'a>>,
    pub wqkv: Option<TensorView<'a>>,
    pub wo: TensorView<'a>,
    pub bq: Option<TensorView<'a>>,
    pub bk: Option<TensorView<'a>>,
    pub bv: Option<TensorView<'a>>,
    pub q_norm: Option<TensorView<'a>>,
    pub k_norm: Option<TensorView<'a>>,
    pub post_attn_norm: Option<TensorView<'a>>,
    pub w_gate: TensorView<'a>,
    pub w_up: TensorView<'a>,
    pub w_down: TensorView<'a>,
}

pub struct MlaLayerWeights<'a> {
    pub attn_norm: TensorView<'a>,
    pub ffn_norm: TensorView<'a>,
    pub kv_a_mqa: TensorView<'a>,
    pub kv_a_norm: TensorView<'a>,
    pub kv_b: TensorView<'a>,
    pub wq: Option<TensorView<'a>>,
    pub wo: TensorView<'a>,
    pub w_gate: TensorView<'a>,
    pub w_up: TensorView<'a>,
    pub w_down: TensorView<'a>,
}

pub struct MoeLayerWeights<'a> {
    pub attn_norm: TensorView<'a>,
    pub ffn_norm: TensorView<'a>,
    pub wq: Option<TensorView<'a>>,
    pub wk: Option<TensorView<'a>>,
    pub wv: Option<TensorView<'a>>,
    pub wqkv: Option<TensorView<'a>>,
    pub wo: TensorView<'a>,
    pub q_norm: Option<TensorView<'a>>,
    pub k_norm: Option<TensorView<'a>>,
    pub attn_sinks: Option<TensorView<'a>>,
    /// `None` for leading dense layers (`layer < leading_dense_block_count`),
    /// which real MoE containers never write a router tensor for.
    pub router: Option<TensorView<'a>>,
    pub experts_gate: TensorView<'a>,
    pub experts_up: TensorView<'a>,
    pub experts_down: TensorView<'a>,
    pub shared_gate: Option<TensorView<'a>>,
    pub shared_up: Option<TensorView<'a>>,
    pub shared_down: Option<TensorView<'a>>,
}

/// MLA attention feeding a routed (+ optional shared-expert) MoE FFN, e.g.
/// deepseek2's actual layer shape.
pub struct MlaMoeLayerWeights<'a> {
    pub attn_norm: TensorView<'a>,
    pub ffn_norm: TensorView<'a>,
    pub kv_a_mqa: TensorView<'a>,
    pub kv_a_norm: TensorView<'a>,
    pub kv_b: TensorView<'a>,
    pub wq: Option<TensorView<'a>>,
    pub wo: TensorView<'a>,
    /// `None` for leading dense layers, same as `MoeLayerWeights::router`.
    pub router: Option<TensorView<'a>>,
    pub experts_gate: TensorView<'a>,
    pub experts_up: TensorView<'a>,
    pub experts_down: TensorView<'a>,
    pub shared_gate: Option<TensorView<'a>>,
    pub shared_up: Option<TensorView<'a>>,
    pub shared_down: Option<TensorView<'a>>,
}

pub enum LayerWeights<'a> {
    Dense(DenseLayerWeights<'a>),
    Mla(MlaLayerWeights<'a>),
    Moe(MoeLayerWeights<'a>),
    MlaMoe(MlaMoeLayerWeights<'a>),
}

fn opt(container: &Container, name: &str) -> Result<Option<TensorView<'_>>, LoadError> {
    match container.find_tensor(name) {
        Some(_) => Ok(Some(tensor::require_view(container, name)?)),
        None => Ok(None),
    }
}

fn req<'a>(container: &'a Container, name: &str) -> Result<TensorView<'a>, LoadError> {
    tensor::require_view(container, name)
}

/// Binds the directory entries for layer `i`, dispatching on `config.architecture`.
pub fn bind_layer<'a>(container: &'a Container, config: &ModelConfig, i: usize) -> Result<LayerWeights<'a>, LoadError> {
    let p = |suffix: &str| format!("blk.{i}.{suffix}");

    match config.architecture {
        Architecture::Dense => Ok(LayerWeights::Dense(DenseLayerWeights {
            attn_norm: req(container, &p("attn_norm.weight"))?,
            ffn_norm: req(container, &p("ffn_norm.weight"))?,
            wq: opt(container, &p("attn_q.weight"))?,
            wk: opt(container, &p("attn_k.weight"))?,
            wv: opt(container, &p("attn_v.weight"))?,
            wqkv: opt(container, &p("attn_qkv.weight"))?,
            wo: req(container, &p("attn_output.weight"))?,
            bq: opt(container, &p("attn_q.bias"))?,
            bk: opt(container, &p("attn_k.bias"))?,
            bv: opt(container, &p("attn_v.bias"))?,
            q_norm: opt(container, &p("attn_q_norm.weight"))?,
            k_norm: opt(container, &p("attn_k_norm.weight"))?,
            post_attn_norm: opt(container, &p("post_attention_norm.weight"))?,
            w_gate: req(container, &p("ffn_gate.weight"))?,
            w_up: req(container, &p("ffn_up.weight"))?,
            w_down: req(container, &p("ffn_down.weight"))?,
        })),

        Architecture::Mla => Ok(LayerWeights::Mla(MlaLayerWeights {
            attn_norm: req(container, &p("attn_norm.weight"))?,
            ffn_norm: req(container, &p("ffn_norm.weight"))?,
            kv_a_mqa: req(container, &p("attn_kv_a_mqa.weight"))?,
            kv_a_norm: req(container, &p("attn_kv_a_norm.weight"))?,
            kv_b: req(container, &p("attn_kv_b.weight"))?,
            wq: opt(container, &p("attn_q.weight"))?,
            wo: req(container, &p("attn_output.weight"))?,
            w_gate: req(container, &p("ffn_gate.weight"))?,
            w_up: req(container, &p("ffn_up.weight"))?,
            w_down: req(container, &p("ffn_down.weight"))?,
        })),

        Architecture::Moe => {
            let is_dense_layer = i < config.leading_dense_block_count;
            if is_dense_layer {
                // Leading dense layers in a MoE model use the regular FFN
                // tensor names but still go through the MoE record shape so
                // the forward dispatch stays uniform; experts_* are unused.
                // No router tensor exists for these layers in real containers.
                return Ok(LayerWeights::Moe(MoeLayerWeights {
                    attn_norm: req(container, &p("attn_norm.weight"))?,
                    ffn_norm: req(container, &p("ffn_norm.weight"))?,
                    wq: opt(container, &p("attn_q.weight"))?,
                    wk: opt(container, &p("attn_k.weight"))?,
                    wv: opt(container, &p("attn_v.weight"))?,
                    wqkv: opt(container, &p("attn_qkv.weight"))?,
                    wo: req(container, &p("attn_output.weight"))?,
                    q_norm: opt(container, &p("attn_q_norm.weight"))?,
                    k_norm: opt(container, &p("attn_k_norm.weight"))?,
                    attn_sinks: opt(container, &p("attn_sinks.weight"))?,
                    router: opt(container, &p("ffn_gate_inp.weight"))?,
                    experts_gate: req(container, &p("ffn_gate.weight"))?,
                    experts_up: req(container, &p("ffn_up.weight"))?,
                    experts_down: req(container, &p("ffn_down.weight"))?,
                    shared_gate: None,
                    shared_up: None,
                    shared_down: None,
                }));
            }
            Ok(LayerWeights::Moe(MoeLayerWeights {
                attn_norm: req(container, &p("attn_norm.weight"))?,
                ffn_norm: req(container, &p("ffn_norm.weight"))?,
                wq: opt(container, &p("attn_q.weight"))?,
                wk: opt(container, &p("attn_k.weight"))?,
                wv: opt(container, &p("attn_v.weight"))?,
                wqkv: opt(container, &p("attn_qkv.weight"))?,
                wo: req(container, &p("attn_output.weight"))?,
                q_norm: opt(container, &p("attn_q_norm.weight"))?,
                k_norm: opt(container, &p("attn_k_norm.weight"))?,
                attn_sinks: opt(container, &p("attn_sinks.weight"))?,
                router: Some(req(container, &p("ffn_gate_inp.weight"))?),
                experts_gate: req(container, &p("ffn_gate_exps.weight"))?,
                experts_up: req(container, &p("ffn_up_exps.weight"))?,
                experts_down: req(container, &p("ffn_down_exps.weight"))?,
                shared_gate: opt(container, &p("ffn_gate_shexp.weight"))?,
                shared_up: opt(container, &p("ffn_up_shexp.weight"))?,
                shared_down: opt(container, &p("ffn_down_shexp.weight"))?,
            }))
        }

        Architecture::MlaMoe => {
            let is_dense_layer = i < config.leading_dense_block_count;
            let mla_fields = (
                req(container, &p("attn_kv_a_mqa.weight"))?,
                req(container, &p("attn_kv_a_norm.weight"))?,
                req(container, &p("attn_kv_b.weight"))?,
            );
            if is_dense_layer {
                return Ok(LayerWeights::MlaMoe(MlaMoeLayerWeights {
                    attn_norm: req(container, &p("attn_norm.weight"))?,
                    ffn_norm: req(container, &p("ffn_norm.weight"))?,
                    kv_a_mqa: mla_fields.0,
                    kv_a_norm: mla_fields.1,
                    kv_b: mla_fields.2,
                    wq: opt(container, &p("attn_q.weight"))?,
                    wo: req(container, &p("attn_output.weight"))?,
                    router: opt(container, &p("ffn_gate_inp.weight"))?,
                    experts_gate: req(container, &p("ffn_gate.weight"))?,
                    experts_up: req(container, &p("ffn_up.weight"))?,
                    experts_down: req(container, &p("ffn_down.weight"))?,
                    shared_gate: None,
                    shared_up: None,
                    shared_down: None,
                }));
            }
            Ok(LayerWeights::MlaMoe(MlaMoeLayerWeights {
                attn_norm: req(container, &p("attn_norm.weight"))?,
                ffn_norm: req(container, &p("ffn_norm.weight"))?,
                kv_a_mqa: mla_fields.0,
                kv_a_norm: mla_fields.1,
                kv_b: mla_fields.2,
                wq: opt(container, &p("attn_q.weight"))?,
                wo: req(container, &p("attn_output.weight"))?,
                router: Some(req(container, &p("ffn_gate_inp.weight"))?),
                experts_gate: req(container, &p("ffn_gate_exps.weight"))?,
                experts_up: req(container, &p("ffn_up_exps.weight"))?,
                experts_down: req(container, &p("ffn_down_exps.weight"))?,
                shared_gate: opt(container, &p("ffn_gate_shexp.weight"))?,
                shared_up: opt(container, &p("ffn_up_shexp.weight"))?,
                shared_down: opt(container, &p("ffn_down_shexp.weight"))?,
            }))
        }
    }
}
