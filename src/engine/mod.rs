//! The transformer execution engine: ties the container, tensor store, and
//! per-layer forward pass into a loadable, generate-able model (spec ch. 4,
//! 6 "Engine public surface").

pub mod forward;
pub mod rope;
pub mod state;

use crate::config::{Architecture, ModelConfig};
use crate::container::Container;
use crate::error::LoadError;
use crate::gpu::{GpuBackend, GpuConfig};
use crate::tokenizer::{IdentityTokenizer, Tokenizer};
use crate::weights;
use forward::CachedNorms;
use state::RequestState;
use std::path::Path;

/// Construction-time configuration, mirroring the teacher's
/// deserializable model config so embedding applications can load it from
/// TOML/JSON (spec ch. 2 item 13).
#[derive(Debug, Default, serde::Deserialize)]
pub struct EngineOptions {
    pub max_context_length: Option<usize>,
    #[serde(default)]
    pub gpu: GpuConfig,
    pub threads: Option<usize>,
}

/// Snapshot returned by `Engine::model_info` (spec ch. 6).
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub architecture: Architecture,
    pub block_count: usize,
    pub head_count: usize,
    pub head_count_kv: usize,
    pub embedding_length: usize,
    pub context_length: usize,
    pub vocab_size: usize,
    pub model_file_size: u64,
    pub kv_cache_estimate_bytes: u64,
    pub total_ram_estimate_bytes: u64,
}

pub struct Engine {
    container: Container,
    config: ModelConfig,
    norms: CachedNorms,
    gpu: Option<GpuBackend>,
    thread_pool: rayon::ThreadPool,
    tokenizer: Box<dyn Tokenizer>,
    max_context_length: usize,
}

impl Engine {
    /// Opens `path`, parses its metadata into a `ModelConfig`, validates that
    /// every layer's required tensors are present, and dequantizes the norm
    /// vectors once. Fails fatally (spec ch. 7 "Propagation policy") rather
    /// than returning a partially usable engine.
    pub fn load(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self, LoadError> {
        let container = Container::open(path)?;
        let config = ModelConfig::from_metadata(container.metadata())?;

        for layer in 0..config.block_count {
            weights::bind_layer(&container, &config, layer)?;
        }
        let norms = CachedNorms::build(&container, &config)?;

        let gpu = GpuBackend::probe(&options.gpu);

        let threads = options.threads.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        });
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .expect("failed to build worker pool");

        let eos_token_id = container
            .metadata()
            .get_u32("tokenizer.ggml.eos_token_id", None)
            .unwrap_or(0);
        let tokenizer: Box<dyn Tokenizer> = Box::new(IdentityTokenizer {
            vocab_size: config.vocab_size,
            eos_token_id,
        });

        let max_context_length = options.max_context_length.unwrap_or(config.context_length);

        tracing::info!(
            architecture = ?config.architecture,
            block_count = config.block_count,
            max_context_length,
            threads,
            "engine loaded"
        );

        Ok(Self {
            container,
            config,
            norms,
            gpu,
            thread_pool,
            tokenizer,
            max_context_length,
        })
    }

    /// Replaces the default pass-through tokenizer with a real one (e.g.
    /// `HfTokenizer`), since tokenization is an external collaborator
    /// (spec ch. 6 "Tokenizer contract").
    pub fn set_tokenizer(&mut self, tokenizer: Box<dyn Tokenizer>) {
        self.tokenizer = tokenizer;
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn gpu(&self) -> Option<&GpuBackend> {
        self.gpu.as_ref()
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn max_context_length(&self) -> usize {
        self.max_context_length
    }

    pub fn new_request_state(&self) -> RequestState {
        RequestState::new(&self.config, self.max_context_length)
    }

    fn output_view(&self) -> crate::tensor::TensorView<'_> {
        match self.container.find_tensor("output.weight") {
            Some(_) => crate::tensor::require_view(&self.container, "output.weight").expect("validated at load"),
            None => crate::tensor::require_view(&self.container, "token_embd.weight").expect("validated at load"),
        }
    }

    fn embed_token(&self, state: &mut RequestState, token: u32) {
        let dim = self.config.embedding_length;
        let embed = crate::tensor::require_view(&self.container, "token_embd.weight").expect("validated at load");
        let row = token as usize * dim;
        for i in 0..dim {
            state.x[i] = embed.get_float(row + i);
        }
    }

    /// Runs one layer stack over `state.x` for `token` at sequence `position`,
    /// leaving sampling-ready logits in `state.logits` (spec ch. 4.5, 4.7).
    pub fn forward(&self, state: &mut RequestState, token: u32, position: usize) {
        self.thread_pool.install(|| {
            self.embed_token(state, token);
            for layer in 0..self.config.block_count {
                let layer_weights = weights::bind_layer(&self.container, &self.config, layer).expect("validated at load");
                forward::forward_layer(state, &self.norms, &layer_weights, &self.config, layer, position);
            }
            let output = self.output_view();
            forward::final_norm_and_logits(state, &self.norms, &output, &self.config);
        });
    }

    pub fn model_info(&self) -> ModelInfo {
        let name = self
            .container
            .metadata()
            .get_string("general.name")
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.container
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            });

        let model_file_size = self.container.byte_len() as u64;
        let kv_cache_estimate_bytes = (self.config.block_count
            * self.max_context_length
            * self.config.kv_dim.max(1)
            * 2
            * std::mem::size_of::<f32>()) as u64;

        ModelInfo {
            name,
            architecture: self.config.architecture,
            block_count: self.config.block_count,
            head_count: self.config.head_count,
            head_count_kv: self.config.head_count_kv,
            embedding_length: self.config.embedding_length,
            context_length: self.config.context_length,
            vocab_size: self.config.vocab_size,
            model_file_size,
            kv_cache_estimate_bytes,
            total_ram_estimate_bytes: model_file_size + kv_cache_estimate_bytes,
        }
    }

    /// Releases every resource the engine holds. With no real GPU device
    /// resident, this is equivalent to dropping the engine, but it gives
    /// callers an explicit, logged shutdown point (spec ch. 5 "every device
    /// resource is released on engine shutdown").
    pub fn close(self) {
        tracing::info!(path = %self.container.path().display(), "engine closed");
    }
}
