//! Sampler pipeline over a logits vector (spec ch. 4.6).

use crate::error::SamplerInvalidDistribution;
use crate::tensor::kernels;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 40,
            top_p: 1.0,
            repetition_penalty: 1.0,
            seed: 0,
        }
    }
}

pub struct Sampler {
    config: SamplerConfig,
    rng: StdRng,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Samples one token id from `logits`, given the trailing-window
    /// `recent_tokens` used for the repetition penalty.
    pub fn sample(&mut self, logits: &[f32], recent_tokens: &[u32]) -> u32 {
        let mut work = logits.to_vec();

        if self.config.repetition_penalty != 1.0 {
            for &token in recent_tokens {
                let idx = token as usize;
                if idx >= work.len() {
                    continue;
                }
                work[idx] = if work[idx] > 0.0 {
                    work[idx] / self.config.repetition_penalty
                } else {
                    work[idx] * self.config.repetition_penalty
                };
            }
        }

        if self.config.temperature == 0.0 {
            return argmax(&work);
        }

        kernels::scale(&mut work, 1.0 / self.config.temperature);
        kernels::softmax(&mut work, 0, work.len());

        if self.config.top_k > 0 && self.config.top_k < work.len() {
            top_k_filter(&mut work, self.config.top_k);
        }
        if self.config.top_p < 1.0 {
            top_p_filter(&mut work, self.config.top_p);
        }

        match renormalize_and_sample(&mut work, &mut self.rng) {
            Ok(id) => id,
            Err(SamplerInvalidDistribution) => argmax(logits),
        }
    }
}

fn argmax(v: &[f32]) -> u32 {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

/// Zeroes any probability below the K-th largest value.
fn top_k_filter(probs: &mut [f32], k: usize) {
    let mut sorted: Vec<f32> = probs.to_vec();
    sorted.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap());
    let threshold = sorted[k - 1];
    for p in probs.iter_mut() {
        if *p < threshold {
            *p = 0.0;
        }
    }
}

/// Keeps the smallest prefix of descending-sorted probabilities whose
/// cumulative sum exceeds `top_p`, zeroing the rest.
fn top_p_filter(probs: &mut [f32], top_p: f32) {
    let mut indices: Vec<usize> = (0..probs.len()).collect();
    indices.sort_unstable_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap());

    let mut cumulative = 0.0f32;
    let mut cutoff = indices.len();
    for (rank, &idx) in indices.iter().enumerate() {
        cumulative += probs[idx];
        if cumulative > top_p {
            cutoff = rank + 1;
            break;
        }
    }
    for &idx in &indices[cutoff..] {
        probs[idx] = 0.0;
    }
}

fn renormalize_and_sample(probs: &mut [f32], rng: &mut StdRng) -> Result<u32, SamplerInvalidDistribution> {
    let sum: f32 = probs.iter().sum();
    if sum <= 0.0 {
        return Err(SamplerInvalidDistribution);
    }
    for p in probs.iter_mut() {
        *p /= sum;
    }

    let target: f32 = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if target <= cumulative {
            return Ok(i as u32);
        }
    }
    Ok(probs.len() as u32 - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_picks_argmax() {
        let config = SamplerConfig {
            temperature: 0.0,
            ..Default::default()
        };
        let mut sampler = Sampler::new(config);
        let logits = [1.0, 5.0, 2.0];
        assert_eq!(sampler.sample(&logits, &[]), 1);
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let config = SamplerConfig {
            temperature: 1.0,
            top_k: 3,
            top_p: 1.0,
            repetition_penalty: 1.0,
            seed: 42,
        };
        let logits = [1.0, 2.0, 3.0];
        let mut a = Sampler::new(config);
        let mut b = Sampler::new(config);
        assert_eq!(a.sample(&logits, &[]), b.sample(&logits, &[]));
    }

    #[test]
    fn top_p_keeps_smallest_sufficient_prefix() {
        let mut probs = vec![0.5, 0.3, 0.15, 0.05];
        top_p_filter(&mut probs, 0.8);
        assert!(probs[0] > 0.0);
        assert!(probs[1] > 0.0);
        assert_eq!(probs[3], 0.0);
    }

    #[test]
    fn renormalize_rejects_all_zero_distribution() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut probs = vec![0.0, 0.0, 0.0];
        assert!(matches!(renormalize_and_sample(&mut probs, &mut rng), Err(SamplerInvalidDistribution)));
    }
}
