//! LLM inference.
//!
//! - [`engine`]: High-level adapter mapping a prompt to a completion
//! - [`loader`]: Hub resolution, tokenizer and weight loading, run modes
//! - [`lora`]: Low-rank adapter parsing and weight merging
//! - [`sampling`]: Repeat-penalty and no-repeat-ngram logit shaping

pub mod engine;
pub mod loader;
pub mod lora;
pub mod sampling;

/// Literal marker delimiting assistant turns in the chat transcript.
pub const ASSISTANT_MARKER: &str = "<|assistant|>";

/// Canned reply returned whenever generation itself fails. Callers always
/// get usable text; generation errors never abort the process.
pub const FALLBACK_RESPONSE: &str = "I apologize, but I'm having trouble \
generating a response. Could you please rephrase your answer?";
