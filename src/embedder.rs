//! Embedding provider clients.

pub mod openai;
