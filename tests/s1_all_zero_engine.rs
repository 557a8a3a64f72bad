//! S1 (spec ch. 8): an all-zero-weight F32 engine produces all-zero logits
//! and greedy-samples token 0.

mod common;

use ferroflow::{Engine, EngineOptions, IdentityTokenizer};
use std::io::Write;

#[test]
fn all_zero_engine_produces_zero_logits_and_greedy_token_zero() {
    common::init_tracing();
    let bytes = common::build_zero_model_bytes(2, 2, 2, 4, 8, 16, 32);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();

    let mut engine = Engine::load(file.path(), EngineOptions::default()).expect("zero model loads");
    engine.set_tokenizer(Box::new(IdentityTokenizer {
        vocab_size: 32,
        eos_token_id: 0,
    }));

    let prompt_ids = engine.tokenizer().encode("1 2 3");
    assert_eq!(prompt_ids, vec![1, 2, 3]);

    let mut state = engine.new_request_state();
    for (pos, &token) in prompt_ids.iter().enumerate() {
        engine.forward(&mut state, token, pos);
    }

    for &logit in &state.logits {
        assert!(logit.abs() < 1e-4, "expected near-zero logit, got {logit}");
    }

    let mut sampler = ferroflow::Sampler::new(ferroflow::SamplerConfig {
        temperature: 0.0,
        ..Default::default()
    });
    let token = sampler.sample(&state.logits, &[]);
    assert_eq!(token, 0);
}
