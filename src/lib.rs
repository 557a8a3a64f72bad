//! Core of a local, single-process inference engine for quantized
//! transformer models stored in a GGUF-style container: mmap'd tensor
//! store, CPU vector kernels with an optional GPU fallback path, the
//! dense/GQA, MLA, and MoE forward-pass variants, and the sampler and
//! request-driver pipeline that turns a prompt into streamed tokens.

pub mod config;
pub mod container;
pub mod driver;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod quant;
pub mod sampler;
pub mod tensor;
pub mod tokenizer;
pub mod weights;

pub use config::{Architecture, ModelConfig};
pub use driver::{GenerationRequest, GenerationResponse};
pub use engine::{Engine, EngineOptions, ModelInfo};
pub use error::{GenerationError, GpuError, LoadError, SamplerInvalidDistribution};
pub use gpu::GpuConfig;
pub use sampler::{Sampler, SamplerConfig};
pub use tokenizer::{IdentityTokenizer, Tokenizer};

#[cfg(feature = "hf-tokenizer")]
pub use tokenizer::HfTokenizer;
