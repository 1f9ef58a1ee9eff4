//! ds-providers: LLM provider implementations for deepsearch
//!
//! This crate provides implementations of the Provider trait. One provider
//! speaks the OpenAI chat completions protocol, which also covers Gemini,
//! Groq, Ollama and vLLM through their OpenAI-compatible endpoints.

pub mod openai;

pub use openai::OpenAIProvider;
