//! ds-core: Core types and traits for deepsearch
//!
//! This crate provides the model-facing foundation used throughout the
//! research agent: the `Provider` trait, messages, errors, and the three
//! generation capabilities (text, structured, streaming).

pub mod blocking;
pub mod error;
pub mod generate;
pub mod message;
pub mod provider;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use blocking::run_blocking;
pub use error::Error;
pub use generate::{
    collect_text, generate_structured, generate_text, parse_structured, stream_text,
    StructuredOutput, TextStream,
};
pub use message::{Message, Role, StreamChunk, Usage};
pub use provider::{
    CompletionRequest, CompletionResponse, FinishReason, Provider, ResponseFormat, StreamResult,
};

pub type Result<T> = std::result::Result<T, Error>;
