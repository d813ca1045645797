//! Oracle implementations for Stepwise.
//!
//! All oracles implement the `stepwise_core::Oracle` trait. Today that is
//! a single HTTP client for OpenAI-compatible chat completions endpoints.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatOracle;
