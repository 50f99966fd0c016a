//! The inference adapter.
//!
//! Owns the loaded model, tokenizer, and fixed sampling policy, and exposes
//! one operation: [`InferenceAdapter::generate_response`], mapping a text
//! prompt to a text completion. Construction failures are fatal (inference
//! is meaningless without a loaded model); generation failures are not — any
//! error after load degrades to a fixed fallback reply so the calling
//! process always receives usable text.

use candle_core::{DType, Device, Tensor};
use candle_transformers::models::llama::{Cache, Config, Llama};
use thiserror::Error;
use tracing::{error, info};

use crate::config::{ModelConfig, SamplingConfig};
use crate::inference::loader::{self, LoaderError, ModelMode, TokenizerBundle};
use crate::inference::sampling;
use crate::inference::{ASSISTANT_MARKER, FALLBACK_RESPONSE};

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Tokenization failed: {0}")]
    Tokenize(String),

    #[error("Forward pass failed: {0}")]
    Forward(#[from] candle_core::Error),

    #[error("Decoding failed: {0}")]
    Decode(String),
}

pub struct InferenceAdapter {
    model: Llama,
    config: Config,
    tokenizer: TokenizerBundle,
    sampling: SamplingConfig,
    device: Device,
    mode: ModelMode,
}

impl InferenceAdapter {
    /// Load the base model and tokenizer, overlaying the fine-tuned adapter
    /// when its directory exists on disk.
    pub fn new(model: &ModelConfig, sampling: SamplingConfig) -> Result<Self, LoaderError> {
        let mode = ModelMode::detect(&model.adapter_dir);
        Self::with_mode(model, sampling, mode)
    }

    /// Like [`InferenceAdapter::new`] but with an injected run mode, so both
    /// modes can be exercised without touching the adapter directory.
    pub fn with_mode(
        model: &ModelConfig,
        sampling: SamplingConfig,
        mode: ModelMode,
    ) -> Result<Self, LoaderError> {
        let device = Device::Cpu;
        let files = loader::fetch_base(model)?;
        let config = loader::load_llama_config(&files.config)?;
        let tokenizer = loader::load_tokenizer(&files.tokenizer, &config)?;
        let llama = loader::load_model(&files, &config, &mode, &device)?;

        info!(
            pad_token_id = tokenizer.pad_token_id,
            "Inference adapter ready"
        );
        Ok(Self {
            model: llama,
            config,
            tokenizer,
            sampling,
            device,
            mode,
        })
    }

    pub fn mode(&self) -> &ModelMode {
        &self.mode
    }

    /// Generate a completion for `prompt`, producing at most `max_tokens`
    /// new tokens. Never fails: any internal error is logged to stderr and
    /// replaced by the fixed fallback reply.
    pub fn generate_response(&self, prompt: &str, max_tokens: usize) -> String {
        match self.complete(prompt, max_tokens) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Generation failed, returning fallback response");
                FALLBACK_RESPONSE.to_string()
            }
        }
    }

    /// One full decode pass: prefill the prompt, then sample token by token
    /// until `max_tokens` new tokens or an end-of-sequence token.
    fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, GenerateError> {
        let encoding = self
            .tokenizer
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| GenerateError::Tokenize(e.to_string()))?;
        let mut tokens = encoding.get_ids().to_vec();
        truncate_prompt(&mut tokens, self.sampling.max_prompt_tokens);

        // Fresh KV cache per call; the process is stateless across prompts.
        let mut cache = Cache::new(true, DType::F32, &self.config, &self.device)?;
        let mut processor = sampling::logits_processor(&self.sampling);
        let mut index_pos = 0;

        for index in 0..max_tokens {
            // Prefill the whole prompt on the first step, then feed only the
            // latest token against the KV cache.
            let (context_size, context_index) = if index > 0 {
                (1, index_pos)
            } else {
                (tokens.len(), 0)
            };
            let ctxt = &tokens[tokens.len().saturating_sub(context_size)..];
            let input = Tensor::new(ctxt, &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, context_index, &mut cache)?;
            let logits = logits.squeeze(0)?;
            index_pos += ctxt.len();

            let logits = sampling::shape_logits(&logits, &tokens, &self.sampling)?;
            let next_token = processor.sample(&logits)?;
            if self.tokenizer.is_eos(next_token) {
                break;
            }
            tokens.push(next_token);
        }

        // Decode prompt and continuation together, dropping control tokens,
        // then segment out the reply.
        let decoded = self
            .tokenizer
            .tokenizer
            .decode(&tokens, true)
            .map_err(|e| GenerateError::Decode(e.to_string()))?;
        Ok(extract_completion(&decoded, prompt))
    }
}

/// Silently clamp the tokenized prompt to the configured maximum.
fn truncate_prompt(tokens: &mut Vec<u32>, max: usize) {
    if tokens.len() > max {
        tokens.truncate(max);
    }
}

/// Segment the decoded transcript into the assistant's reply.
///
/// When the assistant-role marker is present, only the text after its last
/// occurrence is returned. Otherwise the literal prompt prefix is stripped
/// from the decoded text. The result is always trimmed.
pub fn extract_completion(decoded: &str, prompt: &str) -> String {
    if let Some((_, tail)) = decoded.rsplit_once(ASSISTANT_MARKER) {
        return tail.trim().to_string();
    }
    let decoded = decoded.trim();
    match decoded.strip_prefix(prompt.trim()) {
        Some(rest) => rest.trim().to_string(),
        None => decoded.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_takes_text_after_last_occurrence() {
        let decoded = "<|assistant|> first reply <|user|> more <|assistant|> second reply ";
        assert_eq!(extract_completion(decoded, "ignored"), "second reply");
    }

    #[test]
    fn test_prompt_prefix_is_stripped_without_marker() {
        let decoded = "Tell me about yourself I have five years of experience.";
        assert_eq!(
            extract_completion(decoded, "Tell me about yourself"),
            "I have five years of experience."
        );
    }

    #[test]
    fn test_non_prefix_prompt_leaves_decoded_text() {
        let decoded = "Something else entirely.";
        assert_eq!(
            extract_completion(decoded, "Tell me about yourself"),
            "Something else entirely."
        );
    }

    #[test]
    fn test_completion_is_trimmed() {
        let decoded = "  <|assistant|>\n  an answer\n";
        assert_eq!(extract_completion(decoded, ""), "an answer");
    }

    #[test]
    fn test_truncate_prompt_clamps_long_inputs() {
        let mut tokens: Vec<u32> = (0..2000).collect();
        truncate_prompt(&mut tokens, 1024);
        assert_eq!(tokens.len(), 1024);
        assert_eq!(tokens[1023], 1023);
    }

    #[test]
    fn test_truncate_prompt_keeps_short_inputs() {
        let mut tokens: Vec<u32> = vec![1, 2, 3];
        truncate_prompt(&mut tokens, 1024);
        assert_eq!(tokens, vec![1, 2, 3]);
    }

    #[test]
    fn test_fallback_response_is_nonempty() {
        assert!(!FALLBACK_RESPONSE.is_empty());
    }
}
