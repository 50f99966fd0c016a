//! Integration tests for the generation policy and output segmentation.

use candle_core::{Device, Tensor};
use interview_infer::config::SamplingConfig;
use interview_infer::inference::engine::extract_completion;
use interview_infer::inference::sampling::{banned_ngram_tokens, shape_logits};
use interview_infer::inference::FALLBACK_RESPONSE;

#[test]
fn test_fixed_policy_defaults() {
    let cfg = SamplingConfig::default();
    assert_eq!(cfg.temperature, 0.8);
    assert_eq!(cfg.repeat_penalty, 1.2);
    assert_eq!(cfg.no_repeat_ngram, 3);
    assert_eq!(cfg.max_prompt_tokens, 1024);
    assert_eq!(cfg.max_new_tokens, 100);
}

#[test]
fn test_shaped_logits_forbid_repeated_trigram() {
    let device = Device::Cpu;
    // Vocabulary of 5; the context [1,2,3,1,2] means token 3 would complete
    // the trigram [1,2,3] a second time.
    let logits = Tensor::new(&[1.0f32, 1.0, 1.0, 1.0, 1.0], &device).unwrap();
    let cfg = SamplingConfig::default();

    let shaped = shape_logits(&logits, &[1, 2, 3, 1, 2], &cfg).unwrap();
    let values = shaped.to_vec1::<f32>().unwrap();
    assert_eq!(values[3], f32::NEG_INFINITY);
    assert!(values[0].is_finite());
    assert!(values[4].is_finite());
}

#[test]
fn test_ngram_guard_is_quiet_on_fresh_context() {
    assert!(banned_ngram_tokens(&[7, 8, 9, 10], 3).is_empty());
}

#[test]
fn test_reply_after_second_marker_is_returned() {
    let decoded = "<|user|> hi <|assistant|> hello <|user|> go on <|assistant|> of course ";
    assert_eq!(extract_completion(decoded, "hi"), "of course");
}

#[test]
fn test_prompt_prefix_removal() {
    let decoded = "Tell me about yourself I have five years of experience.";
    assert_eq!(
        extract_completion(decoded, "Tell me about yourself"),
        "I have five years of experience."
    );
}

#[test]
fn test_fallback_reply_is_fixed_text() {
    assert!(FALLBACK_RESPONSE.starts_with("I apologize"));
}
