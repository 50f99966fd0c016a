//! interview-infer: one-shot LLM inference for an interviewer bot.
//!
//! Loads the TinyLlama-1.1B-Chat base model, overlays a fine-tuned LoRA
//! adapter when one is present on disk, and maps a single text prompt to a
//! single text completion. The binary wires a prompt file into this library
//! and prints the completion on stdout so a host process can capture it
//! verbatim.

pub mod config;
pub mod inference;
