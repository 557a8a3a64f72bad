//! Request driver: prefill + autoregressive decode loop (spec ch. 4.7).

use crate::engine::Engine;
use crate::error::GenerationError;
use crate::sampler::{Sampler, SamplerConfig};

pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub max_tokens: usize,
    pub sampler_config: SamplerConfig,
}

pub struct GenerationResponse {
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub wall_time_ms: u128,
    pub tokens_per_sec: f64,
}

impl Engine {
    /// Runs prefill then decodes until EOS, `max_tokens`, or the callback
    /// returns `false`. `callback(text_delta, token_id) -> keep_going` fires
    /// once per generated token.
    pub fn generate(
        &mut self,
        request: GenerationRequest,
        mut callback: impl FnMut(&str, u32) -> bool,
    ) -> Result<GenerationResponse, GenerationError> {
        let start = std::time::Instant::now();
        let prompt_ids = self.tokenizer().encode(request.prompt);
        let prompt_tokens = prompt_ids.len();

        let max_context = self.max_context_length();
        if prompt_tokens >= max_context {
            return Err(GenerationError::ContextOverflow {
                position: prompt_tokens,
                generated: 0,
                max: max_context,
            });
        }

        let mut sampler = Sampler::new(request.sampler_config);
        let span = tracing::info_span!("generate", prompt_tokens);
        let _enter = span.enter();

        let mut state = self.new_request_state();
        for (pos, &token) in prompt_ids.iter().enumerate() {
            self.forward(&mut state, token, pos);
        }

        let mut generated = 0usize;
        let mut position = prompt_tokens;
        loop {
            if position >= max_context {
                return Err(GenerationError::ContextOverflow {
                    position,
                    generated,
                    max: max_context,
                });
            }

            let token = sampler.sample(&state.logits, &state.recent_tokens);
            state.push_recent(token);
            let text = self.tokenizer().decode(token);

            let keep_going = callback(&text, token);
            generated += 1;

            if !keep_going || token == self.tokenizer().eos_token_id() || generated >= request.max_tokens {
                break;
            }

            self.forward(&mut state, token, position);
            position += 1;
        }

        let wall_time_ms = start.elapsed().as_millis();
        let tokens_per_sec = if wall_time_ms > 0 {
            generated as f64 / (wall_time_ms as f64 / 1000.0)
        } else {
            0.0
        };

        tracing::info!(generated, tokens_per_sec, "generation complete");
        Ok(GenerationResponse {
            prompt_tokens,
            generated_tokens: generated,
            wall_time_ms,
            tokens_per_sec,
        })
    }
}
