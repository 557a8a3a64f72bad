//! Tokenizer contract (spec ch. 6): a black-box collaborator. This crate
//! only defines the trait boundary plus one concrete adapter around the
//! `tokenizers` crate, not a hand-rolled BPE implementation.

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, id: u32) -> String;
    fn vocab_size(&self) -> usize;
    fn eos_token_id(&self) -> u32;
    fn apply_chat_template(&self, system_message: Option<&str>, user_message: &str) -> Option<String> {
        let _ = (system_message, user_message);
        None
    }
}

#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    eos_token_id: u32,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenizer {
    pub fn from_bytes(json: &[u8], eos_token_id: u32) -> Result<Self, crate::error::LoadError> {
        let inner = tokenizers::Tokenizer::from_bytes(json).map_err(|e| crate::error::LoadError::ContainerMalformed {
            path: std::path::PathBuf::new(),
            reason: format!("tokenizer.json could not be parsed: {e}"),
        })?;
        Ok(Self { inner, eos_token_id })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.inner
            .encode(text, false)
            .map(|enc| enc.get_ids().to_vec())
            .unwrap_or_default()
    }

    fn decode(&self, id: u32) -> String {
        self.inner.decode(&[id], false).unwrap_or_default()
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}

/// A tokenizer whose ids pass through unchanged, used by tests and by S1's
/// all-zero engine so the core can be exercised without a real vocabulary.
pub struct IdentityTokenizer {
    pub vocab_size: usize,
    pub eos_token_id: u32,
}

impl Tokenizer for IdentityTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.split_whitespace()
            .filter_map(|tok| tok.parse::<u32>().ok())
            .collect()
    }

    fn decode(&self, id: u32) -> String {
        format!("{id}")
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_tokenizer_round_trips_numeric_tokens() {
        let tok = IdentityTokenizer {
            vocab_size: 32,
            eos_token_id: 0,
        };
        assert_eq!(tok.encode("1 2 3"), vec![1, 2, 3]);
        assert_eq!(tok.decode(7), "7");
    }
}
