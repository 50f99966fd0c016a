//! Low-rank adapter overlay.
//!
//! Reads a PEFT-style adapter directory (`adapter_config.json` plus
//! `adapter_model.safetensors`) and merges its deltas into the base weight
//! map before the model is built: `W' = W + (alpha / r) * B @ A`. Merging at
//! load time keeps the forward pass identical between the fine-tuned and
//! base-only run modes.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";
const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";

/// PEFT prefixes every adapter tensor with the wrapped model path.
const ADAPTER_KEY_PREFIX: &str = "base_model.model.";

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Missing adapter file: {0}")]
    MissingFile(String),

    #[error("Invalid adapter config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Adapter tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Unpaired low-rank tensor for {0}")]
    UnpairedHalf(String),

    #[error("Adapter targets unknown base tensor {0}")]
    UnknownTarget(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The adapter hyperparameters that matter for merging.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Rank of the low-rank decomposition.
    pub r: usize,

    /// Scaling numerator; the merged delta is scaled by `lora_alpha / r`.
    pub lora_alpha: f64,
}

impl AdapterConfig {
    pub fn scale(&self) -> f64 {
        self.lora_alpha / self.r as f64
    }
}

/// Which half of a low-rank pair an adapter tensor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoraHalf {
    /// `[r, in]` projection.
    A,
    /// `[out, r]` projection.
    B,
}

/// Map an adapter tensor key to the base tensor it targets.
///
/// `base_model.model.<stem>.lora_A.weight` → (`<stem>.weight`, A).
/// Returns `None` for tensors that are not low-rank halves.
pub fn base_key(adapter_key: &str) -> Option<(String, LoraHalf)> {
    let key = adapter_key
        .strip_prefix(ADAPTER_KEY_PREFIX)
        .unwrap_or(adapter_key);
    if let Some(stem) = key.strip_suffix(".lora_A.weight") {
        Some((format!("{stem}.weight"), LoraHalf::A))
    } else if let Some(stem) = key.strip_suffix(".lora_B.weight") {
        Some((format!("{stem}.weight"), LoraHalf::B))
    } else {
        None
    }
}

#[derive(Default)]
struct LoraPair {
    a: Option<Tensor>,
    b: Option<Tensor>,
}

/// A loaded fine-tuned adapter, ready to merge into a base weight map.
#[derive(Debug)]
pub struct LoraAdapter {
    config: AdapterConfig,
    weights: HashMap<String, Tensor>,
}

impl LoraAdapter {
    /// Open an adapter directory. Both the config and the safetensors weight
    /// file must be present; anything else is an incompatible adapter.
    pub fn open(dir: &Path, device: &Device) -> Result<Self, AdapterError> {
        let config_path = dir.join(ADAPTER_CONFIG_FILE);
        if !config_path.exists() {
            return Err(AdapterError::MissingFile(config_path.display().to_string()));
        }
        let config: AdapterConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;

        let weights_path = dir.join(ADAPTER_WEIGHTS_FILE);
        if !weights_path.exists() {
            return Err(AdapterError::MissingFile(weights_path.display().to_string()));
        }
        let weights = candle_core::safetensors::load(&weights_path, device)?;

        debug!(
            tensors = weights.len(),
            r = config.r,
            alpha = config.lora_alpha,
            "Opened fine-tuned adapter"
        );
        Ok(Self { config, weights })
    }

    /// Build an adapter from already-loaded parts.
    pub fn from_parts(config: AdapterConfig, weights: HashMap<String, Tensor>) -> Self {
        Self { config, weights }
    }

    /// Merge every low-rank pair into `tensors`, returning how many base
    /// tensors were rewritten. An unpaired half or a target with no matching
    /// base tensor fails the whole merge.
    pub fn merge_into(&self, tensors: &mut HashMap<String, Tensor>) -> Result<usize, AdapterError> {
        let mut pairs: HashMap<String, LoraPair> = HashMap::new();
        for (key, tensor) in &self.weights {
            let Some((target, half)) = base_key(key) else {
                continue;
            };
            let entry = pairs.entry(target).or_default();
            match half {
                LoraHalf::A => entry.a = Some(tensor.clone()),
                LoraHalf::B => entry.b = Some(tensor.clone()),
            }
        }

        let scale = self.config.scale();
        let mut merged = 0;
        for (target, pair) in pairs {
            let (Some(a), Some(b)) = (&pair.a, &pair.b) else {
                return Err(AdapterError::UnpairedHalf(target));
            };
            let base = tensors
                .get(&target)
                .ok_or_else(|| AdapterError::UnknownTarget(target.clone()))?;

            let a = a.to_dtype(DType::F32)?;
            let b = b.to_dtype(DType::F32)?;
            let delta = b.matmul(&a)?.affine(scale, 0.0)?;
            let updated = base.add(&delta)?;

            tensors.insert(target, updated);
            merged += 1;
        }
        Ok(merged)
    }
}
