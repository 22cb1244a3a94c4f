//! LLM provider implementations for Parley.
//!
//! All chat providers implement `parley_core::Provider`; the embeddings
//! client implements `parley_core::Embedder`.

pub mod base_url;
pub mod embedder;
pub mod openai_compat;
pub mod sse_filter;

pub use base_url::resolve_base_url;
pub use embedder::HttpEmbedder;
pub use openai_compat::{OpenAiCompatFactory, OpenAiCompatProvider};
pub use sse_filter::ReasoningFilter;
