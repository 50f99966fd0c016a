//! Runtime configuration for interview-infer.
//!
//! The generation policy is fixed by design (the calling process never tunes
//! it per request), so it lives here as a named structure with documented
//! defaults rather than as literals inside the decode loop.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Base model identifier on the HuggingFace hub.
pub const BASE_MODEL_ID: &str = "TinyLlama/TinyLlama-1.1B-Chat-v1.0";

/// Conventional relative path of the fine-tuned adapter directory.
pub const DEFAULT_ADAPTER_DIR: &str = "./final_interviewer_model";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "interview-infer",
    about = "Generate one completion for a prompt file and print it to stdout"
)]
pub struct Cli {
    /// Path to a UTF-8 text file containing the prompt.
    pub prompt_file: PathBuf,

    /// Directory holding the fine-tuned LoRA adapter.
    #[arg(long, default_value = DEFAULT_ADAPTER_DIR)]
    pub adapter_dir: PathBuf,

    /// Maximum number of newly generated tokens.
    #[arg(long, default_value_t = 100)]
    pub max_tokens: usize,

    /// Seed for the sampling RNG.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Enable verbose logging (stderr).
    #[arg(short, long)]
    pub verbose: bool,
}

/// Which checkpoint to load and where to look for the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hub identifier of the pretrained base model.
    pub base_model_id: String,

    /// Hub revision to resolve files against.
    pub revision: String,

    /// Directory holding the fine-tuned adapter, if any.
    pub adapter_dir: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_model_id: BASE_MODEL_ID.to_string(),
            revision: "main".to_string(),
            adapter_dir: PathBuf::from(DEFAULT_ADAPTER_DIR),
        }
    }
}

/// The fixed sampling policy applied to every generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Softmax temperature; sampling is always stochastic, never greedy.
    pub temperature: f64,

    /// Penalty applied to tokens already present in the context (1.0 = off).
    pub repeat_penalty: f32,

    /// How many trailing context tokens the repeat penalty considers.
    /// `None` penalizes over the entire context.
    pub repeat_last_n: Option<usize>,

    /// Forbid generating any token that would complete an n-gram already
    /// present in the context (0 = off).
    pub no_repeat_ngram: usize,

    /// Prompts longer than this many tokens are silently truncated.
    pub max_prompt_tokens: usize,

    /// Default upper bound on newly generated tokens.
    pub max_new_tokens: usize,

    /// Seed for the sampling RNG.
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            repeat_penalty: 1.2,
            repeat_last_n: None,
            no_repeat_ngram: 3,
            max_prompt_tokens: 1024,
            max_new_tokens: 100,
            seed: 299792458,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sampling_policy() {
        let cfg = SamplingConfig::default();
        assert_eq!(cfg.temperature, 0.8);
        assert_eq!(cfg.repeat_penalty, 1.2);
        assert_eq!(cfg.repeat_last_n, None);
        assert_eq!(cfg.no_repeat_ngram, 3);
        assert_eq!(cfg.max_prompt_tokens, 1024);
        assert_eq!(cfg.max_new_tokens, 100);
    }

    #[test]
    fn test_default_model_config() {
        let cfg = ModelConfig::default();
        assert_eq!(cfg.base_model_id, "TinyLlama/TinyLlama-1.1B-Chat-v1.0");
        assert_eq!(cfg.adapter_dir, PathBuf::from("./final_interviewer_model"));
    }
}
