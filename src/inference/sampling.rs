//! Logit shaping for the decode loop.
//!
//! Two constraints are applied to the raw logits before sampling: a
//! repetition penalty over the context window, and a hard no-repeat n-gram
//! guard that masks any token which would complete an n-gram already present
//! in the context. Token choice itself is delegated to candle's
//! [`LogitsProcessor`].

use candle_core::Tensor;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::utils::apply_repeat_penalty;

use crate::config::SamplingConfig;

/// Token ids that would complete an `n`-gram already present in `tokens`.
///
/// A token is banned when the last `n - 1` context tokens followed by that
/// token form a sequence that already occurs in the context.
pub fn banned_ngram_tokens(tokens: &[u32], n: usize) -> Vec<u32> {
    if n == 0 || tokens.len() < n {
        return Vec::new();
    }
    let prefix = &tokens[tokens.len() - (n - 1)..];
    let mut banned = Vec::new();
    for window in tokens.windows(n) {
        if &window[..n - 1] == prefix {
            let candidate = window[n - 1];
            if !banned.contains(&candidate) {
                banned.push(candidate);
            }
        }
    }
    banned
}

/// Mask every banned n-gram completion to negative infinity.
pub fn apply_ngram_guard(
    logits: &Tensor,
    tokens: &[u32],
    n: usize,
) -> candle_core::Result<Tensor> {
    let banned = banned_ngram_tokens(tokens, n);
    if banned.is_empty() {
        return Ok(logits.clone());
    }
    let mut values = logits.to_vec1::<f32>()?;
    for id in banned {
        if let Some(v) = values.get_mut(id as usize) {
            *v = f32::NEG_INFINITY;
        }
    }
    let len = values.len();
    Tensor::from_vec(values, len, logits.device())
}

/// Apply the fixed policy's repetition penalty followed by the n-gram guard.
pub fn shape_logits(
    logits: &Tensor,
    context: &[u32],
    cfg: &SamplingConfig,
) -> candle_core::Result<Tensor> {
    let logits = if cfg.repeat_penalty == 1.0 {
        logits.clone()
    } else {
        let start = cfg
            .repeat_last_n
            .map(|n| context.len().saturating_sub(n))
            .unwrap_or(0);
        apply_repeat_penalty(logits, cfg.repeat_penalty, &context[start..])?
    };
    apply_ngram_guard(&logits, context, cfg.no_repeat_ngram)
}

/// Build the token sampler for the fixed policy. Sampling stays stochastic
/// over the full distribution; a non-positive temperature degenerates to
/// argmax.
pub fn logits_processor(cfg: &SamplingConfig) -> LogitsProcessor {
    let sampling = if cfg.temperature <= 0.0 {
        Sampling::ArgMax
    } else {
        Sampling::All {
            temperature: cfg.temperature,
        }
    };
    LogitsProcessor::from_sampling(cfg.seed, sampling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_bans_previously_seen_trigram_completion() {
        // Context ends in [1, 2]; [1, 2, 3] already occurred, so 3 is banned.
        let tokens = [1, 2, 3, 1, 2];
        assert_eq!(banned_ngram_tokens(&tokens, 3), vec![3]);
    }

    #[test]
    fn test_multiple_completions_banned() {
        let tokens = [1, 2, 3, 1, 2, 4, 1, 2];
        assert_eq!(banned_ngram_tokens(&tokens, 3), vec![3, 4]);
    }

    #[test]
    fn test_no_ban_for_short_context() {
        assert!(banned_ngram_tokens(&[1, 2], 3).is_empty());
        assert!(banned_ngram_tokens(&[], 3).is_empty());
    }

    #[test]
    fn test_guard_disabled_at_zero() {
        assert!(banned_ngram_tokens(&[1, 1, 1, 1], 0).is_empty());
    }

    #[test]
    fn test_guard_masks_logits_to_neg_infinity() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[0.5f32, 0.5, 0.5, 0.5, 0.5], &device).unwrap();
        let tokens = [1, 2, 3, 1, 2];

        let shaped = apply_ngram_guard(&logits, &tokens, 3).unwrap();
        let values = shaped.to_vec1::<f32>().unwrap();
        assert_eq!(values[3], f32::NEG_INFINITY);
        assert_eq!(values[0], 0.5);
        assert_eq!(values[4], 0.5);
    }

    #[test]
    fn test_shape_logits_penalizes_repeats() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[2.0f32, 2.0], &device).unwrap();
        let cfg = SamplingConfig {
            repeat_penalty: 2.0,
            no_repeat_ngram: 3,
            ..SamplingConfig::default()
        };

        // Token 0 appears in the context, so its positive logit is divided
        // by the penalty; token 1 is untouched.
        let shaped = shape_logits(&logits, &[0], &cfg).unwrap();
        let values = shaped.to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![1.0, 2.0]);
    }
}
