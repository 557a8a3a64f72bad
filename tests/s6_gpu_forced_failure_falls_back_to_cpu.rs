//! S6 (spec ch. 8): with the GPU backend requested but unavailable (the
//! null device always reports `DeviceUnavailable`), a forward pass produces
//! the same logits as one run with the GPU backend disabled outright —
//! the engine's hot path is unaffected by GPU availability either way.

mod common;

use ferroflow::{Engine, EngineOptions, GpuConfig, IdentityTokenizer};
use std::io::Write;

fn forward_once(file_path: &std::path::Path, gpu: GpuConfig) -> Vec<f32> {
    let mut engine = Engine::load(file_path, EngineOptions { gpu, ..Default::default() }).unwrap();
    engine.set_tokenizer(Box::new(IdentityTokenizer {
        vocab_size: 32,
        eos_token_id: 0,
    }));
    let mut state = engine.new_request_state();
    engine.forward(&mut state, 1, 0);
    state.logits
}

#[test]
fn gpu_unavailable_matches_gpu_disabled_logits() {
    common::init_tracing();
    let bytes = common::build_zero_model_bytes(2, 2, 2, 4, 8, 16, 32);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();

    let disabled = forward_once(file.path(), GpuConfig::default());
    let requested = forward_once(
        file.path(),
        GpuConfig {
            enabled: true,
            ..Default::default()
        },
    );

    assert_eq!(disabled, requested);
}

#[cfg(feature = "gpu")]
#[test]
fn null_device_matmul_always_reports_unavailable_and_is_never_silently_used() {
    use ferroflow::GpuConfig;

    let backend = ferroflow::gpu::GpuBackend::probe(&GpuConfig {
        enabled: true,
        ..Default::default()
    })
    .expect("gpu feature compiles in a null device");
    assert!(backend.matmul("blk.0.attn_q.weight", &[0.0; 8], 8).is_err());
}
