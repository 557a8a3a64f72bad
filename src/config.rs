//! Model configuration parsed from container metadata (spec ch. 3).

use crate::container::MetadataDict;
use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Dense,
    Mla,
    Moe,
    /// MLA attention with a routed (+ optional shared-expert) MoE FFN, e.g.
    /// deepseek2 — attention-style and FFN-style are independent in real
    /// models, but this is the only combination the retrieved corpus uses,
    /// so it gets its own variant rather than a full two-axis split.
    MlaMoe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RopeType {
    Normal,
    Neox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RopeScalingType {
    None,
    Linear,
    Yarn,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub architecture: Architecture,
    pub embedding_length: usize,
    pub block_count: usize,
    pub head_count: usize,
    pub head_count_kv: usize,
    pub context_length: usize,
    pub vocab_size: usize,
    pub intermediate_size: usize,
    pub rope_freq_base: f32,
    pub norm_eps: f32,
    pub head_size: usize,
    pub kv_dim: usize,
    pub rope_type: RopeType,
    pub rope_dimension_count: usize,
    pub key_length: usize,
    pub value_length: usize,

    // MLA
    pub kv_lora_rank: usize,

    // MoE
    pub leading_dense_block_count: usize,
    pub expert_count: usize,
    pub expert_used_count: usize,
    pub expert_shared_count: usize,
    pub expert_ffn_length: usize,
    pub expert_group_count: usize,
    pub expert_group_used_count: usize,

    // YaRN
    pub rope_scaling_type: RopeScalingType,
    pub rope_scale_linear: f32,
    pub yarn_orig_context_length: usize,
    pub yarn_log_multiplier: f32,

    // soft-caps / logit scale
    pub attn_logit_softcapping: f32,
    pub final_logit_softcapping: f32,
    pub logit_scale: f32,

    // sliding window
    pub sliding_window: usize,
    pub sliding_window_pattern: usize,

    pub attention_layer_norm_rms_epsilon: f32,
}

fn arch_tag(metadata: &MetadataDict) -> Result<String, LoadError> {
    metadata
        .get_string("general.architecture")
        .map(str::to_string)
        .ok_or_else(|| LoadError::UnsupportedArchitecture("<missing general.architecture>".to_string()))
}

/// Architectures recognized by this reader; anything else is rejected at
/// load time rather than guessed at.
const DENSE_ARCHS: &[&str] = &["llama", "qwen2", "gemma", "gemma2", "glm4"];
const MLA_ARCHS: &[&str] = &[];
const MLA_MOE_ARCHS: &[&str] = &["deepseek2"];
const MOE_ARCHS: &[&str] = &["mixtral", "qwen2moe", "gptoss"];

impl ModelConfig {
    pub fn from_metadata(metadata: &MetadataDict) -> Result<Self, LoadError> {
        let arch_name = arch_tag(metadata)?;
        let architecture = if MLA_MOE_ARCHS.contains(&arch_name.as_str()) {
            Architecture::MlaMoe
        } else if MLA_ARCHS.contains(&arch_name.as_str()) {
            Architecture::Mla
        } else if MOE_ARCHS.contains(&arch_name.as_str()) {
            Architecture::Moe
        } else if DENSE_ARCHS.contains(&arch_name.as_str()) {
            Architecture::Dense
        } else {
            return Err(LoadError::UnsupportedArchitecture(arch_name));
        };

        let key = |suffix: &str| format!("{arch_name}.{suffix}");
        let u = |suffix: &str, default: u64| metadata.get_u64(&key(suffix), Some(default)).unwrap() as usize;
        let f = |suffix: &str, default: f32| metadata.get_f32(&key(suffix), Some(default)).unwrap();

        let embedding_length = u("embedding_length", 0);
        let block_count = u("block_count", 0);
        let head_count = u("attention.head_count", 0);
        let head_count_kv = u("attention.head_count_kv", head_count as u64);
        let context_length = u("context_length", 2048);
        let vocab_size = u("vocab_size", 0);
        let intermediate_size = u("feed_forward_length", 0);
        let rope_freq_base = f("rope.freq_base", 10000.0);
        let norm_eps = f("attention.layer_norm_rms_epsilon", 1e-5);
        let key_length = u("attention.key_length", (embedding_length / head_count.max(1)) as u64);
        let value_length = u("attention.value_length", key_length as u64);
        let head_size = if key_length > 0 { key_length } else { embedding_length / head_count.max(1) };
        let rope_dimension_count = u("rope.dimension_count", head_size as u64);

        let kv_lora_rank = u("attention.kv_lora_rank", 0);
        let kv_dim = if matches!(architecture, Architecture::Mla | Architecture::MlaMoe) {
            head_count_kv * value_length
        } else {
            head_count_kv * head_size
        };

        let rope_type = match metadata.get_string(&key("rope.type")) {
            Some("neox") => RopeType::Neox,
            _ => RopeType::Normal,
        };

        let rope_scaling_type = match metadata.get_string(&key("rope.scaling.type")) {
            Some("linear") => RopeScalingType::Linear,
            Some("yarn") => RopeScalingType::Yarn,
            _ => RopeScalingType::None,
        };

        let config = ModelConfig {
            architecture,
            embedding_length,
            block_count,
            head_count,
            head_count_kv,
            context_length,
            vocab_size,
            intermediate_size,
            rope_freq_base,
            norm_eps,
            head_size,
            kv_dim,
            rope_type,
            rope_dimension_count,
            key_length,
            value_length,
            kv_lora_rank,
            leading_dense_block_count: u("leading_dense_block_count", 0),
            expert_count: u("expert_count", 0),
            expert_used_count: u("expert_used_count", 0),
            expert_shared_count: u("expert_shared_count", 0),
            expert_ffn_length: u("expert_feed_forward_length", 0),
            expert_group_count: u("expert_group_count", 0),
            expert_group_used_count: u("expert_group_used_count", 0),
            rope_scaling_type,
            rope_scale_linear: f("rope.scaling.factor", 1.0),
            yarn_orig_context_length: u("rope.scaling.original_context_length", context_length as u64),
            yarn_log_multiplier: f("rope.scaling.attn_factor", 1.0),
            attn_logit_softcapping: f("attn_logit_softcapping", 0.0),
            final_logit_softcapping: f("final_logit_softcapping", 0.0),
            logit_scale: f("logit_scale", 0.0),
            sliding_window: u("attention.sliding_window", 0),
            sliding_window_pattern: u("attention.sliding_window_pattern", 0),
            attention_layer_norm_rms_epsilon: norm_eps,
        };

        if config.head_count_kv == 0 || config.head_count % config.head_count_kv != 0 {
            return Err(LoadError::ContainerMalformed {
                path: std::path::PathBuf::new(),
                reason: format!(
                    "head_count {} is not divisible by head_count_kv {}",
                    config.head_count, config.head_count_kv
                ),
            });
        }

        Ok(config)
    }

    pub fn is_moe(&self) -> bool {
        self.expert_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MetadataValue;

    #[test]
    fn rejects_unregistered_architecture() {
        let dict = MetadataDict::from_entries(&[(
            "general.architecture",
            MetadataValue::String("not-a-real-arch".to_string()),
        )]);
        assert!(matches!(
            ModelConfig::from_metadata(&dict),
            Err(LoadError::UnsupportedArchitecture(_))
        ));
    }
}
