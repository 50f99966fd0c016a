//! Checkpoint loading.
//!
//! Resolves the base model's tokenizer, architecture config, and safetensors
//! weights through the HuggingFace hub cache, then builds the Llama model on
//! CPU in F32. When a fine-tuned adapter directory exists its low-rank
//! deltas are merged into the base weights before the model is built;
//! otherwise the unmodified base model is used and a warning goes to stderr.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Config, Llama, LlamaConfig, LlamaEosToks};
use hf_hub::{api::sync::Api, Repo, RepoType};
use thiserror::Error;
use tokenizers::Tokenizer;
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::inference::lora::{self, AdapterError};

/// End-of-sequence vocabulary entry, used when the model config does not
/// name an EOS id.
const EOS_TOKEN: &str = "</s>";

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Hub fetch failed: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("Tokenizer load failed: {0}")]
    Tokenizer(String),

    #[error("Invalid model config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Weight load failed: {0}")]
    Weights(#[from] candle_core::Error),

    #[error("Incompatible adapter: {0}")]
    Adapter(#[from] AdapterError),

    #[error("No end-of-sequence token in model config or tokenizer")]
    MissingEos,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The two run modes of the adapter: fine-tuned when the adapter directory
/// exists, base-only otherwise. Explicit so both modes can be exercised in
/// tests by injecting a variant instead of manipulating the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelMode {
    /// Overlay the low-rank adapter at this directory onto the base weights.
    FineTuned(PathBuf),

    /// Run the unmodified base model.
    BaseOnly,
}

impl ModelMode {
    /// Map adapter-directory existence to a run mode. Absence is not an
    /// error, only a degraded-quality warning on stderr.
    pub fn detect(adapter_dir: &Path) -> Self {
        if adapter_dir.is_dir() {
            Self::FineTuned(adapter_dir.to_path_buf())
        } else {
            warn!(
                dir = %adapter_dir.display(),
                "Fine-tuned adapter not found, falling back to the base model"
            );
            Self::BaseOnly
        }
    }
}

/// Local paths of the three base-model files resolved from the hub cache.
#[derive(Debug, Clone)]
pub struct BaseFiles {
    pub tokenizer: PathBuf,
    pub config: PathBuf,
    pub weights: PathBuf,
}

/// Resolve tokenizer, config, and weights for the configured base model.
/// Files already in the local cache are not re-downloaded.
pub fn fetch_base(model: &ModelConfig) -> Result<BaseFiles, LoaderError> {
    let api = Api::new()?;
    let repo = api.repo(Repo::with_revision(
        model.base_model_id.clone(),
        RepoType::Model,
        model.revision.clone(),
    ));

    let files = BaseFiles {
        tokenizer: repo.get("tokenizer.json")?,
        config: repo.get("config.json")?,
        weights: repo.get("model.safetensors")?,
    };
    info!(model_id = %model.base_model_id, "Resolved base model files");
    Ok(files)
}

/// Parse the architecture config and lower it to the runtime form.
pub fn load_llama_config(path: &Path) -> Result<Config, LoaderError> {
    let raw: LlamaConfig = serde_json::from_slice(&std::fs::read(path)?)?;
    Ok(raw.into_config(false))
}

/// Tokenizer plus the resolved special-token ids generation depends on.
pub struct TokenizerBundle {
    pub tokenizer: Tokenizer,
    /// Ids that terminate generation.
    pub eos_token_ids: Vec<u32>,
    /// Pad id; aliased to EOS when the tokenizer defines no padding token.
    pub pad_token_id: u32,
}

impl TokenizerBundle {
    pub fn is_eos(&self, id: u32) -> bool {
        self.eos_token_ids.contains(&id)
    }
}

/// Resolve EOS ids (model config first, `</s>` vocabulary entry as fallback)
/// and the pad id (EOS alias when the tokenizer has no padding configured).
pub fn resolve_special_tokens(
    tokenizer: &Tokenizer,
    config_eos: Option<&LlamaEosToks>,
) -> Result<(Vec<u32>, u32), LoaderError> {
    let eos_token_ids = match config_eos {
        Some(LlamaEosToks::Single(id)) => vec![*id],
        Some(LlamaEosToks::Multiple(ids)) => ids.clone(),
        None => tokenizer
            .token_to_id(EOS_TOKEN)
            .map(|id| vec![id])
            .unwrap_or_default(),
    };
    let eos = *eos_token_ids.first().ok_or(LoaderError::MissingEos)?;

    // Generation requires a defined pad id even though a batch of one is
    // never padded.
    let pad_token_id = tokenizer.get_padding().map(|p| p.pad_id).unwrap_or(eos);

    Ok((eos_token_ids, pad_token_id))
}

/// Load the tokenizer and resolve its special tokens.
pub fn load_tokenizer(path: &Path, config: &Config) -> Result<TokenizerBundle, LoaderError> {
    let tokenizer =
        Tokenizer::from_file(path).map_err(|e| LoaderError::Tokenizer(e.to_string()))?;
    let (eos_token_ids, pad_token_id) =
        resolve_special_tokens(&tokenizer, config.eos_token_id.as_ref())?;

    Ok(TokenizerBundle {
        tokenizer,
        eos_token_ids,
        pad_token_id,
    })
}

/// Build the Llama model for the given run mode, on CPU in F32.
///
/// Base-only keeps the weights memory-mapped; the fine-tuned path has to
/// materialize them so the adapter deltas can be added in place.
pub fn load_model(
    files: &BaseFiles,
    config: &Config,
    mode: &ModelMode,
    device: &Device,
) -> Result<Llama, LoaderError> {
    match mode {
        ModelMode::BaseOnly => {
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[files.weights.clone()], DType::F32, device)?
            };
            let model = Llama::load(vb, config)?;
            info!("Base model loaded");
            Ok(model)
        }
        ModelMode::FineTuned(dir) => {
            let mut tensors = load_f32_tensors(&files.weights, device)?;
            let adapter = lora::LoraAdapter::open(dir, device)?;
            let merged = adapter.merge_into(&mut tensors)?;
            info!(merged_tensors = merged, "Fine-tuned model loaded");
            let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
            Ok(Llama::load(vb, config)?)
        }
    }
}

/// Load a safetensors file into a name→tensor map, converted to F32.
fn load_f32_tensors(path: &Path, device: &Device) -> Result<HashMap<String, Tensor>, LoaderError> {
    let raw = candle_core::safetensors::load(path, device)?;
    raw.into_iter()
        .map(|(name, t)| Ok((name, t.to_dtype(DType::F32)?)))
        .collect()
}
