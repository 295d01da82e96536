//! API translation between the unified (Anthropic Messages) format and
//! OpenAI-compatible chat completions.
//!
//! Converts requests, responses, and streaming events between the two API
//! formats, and rebuilds complete responses from unified streams. Everything
//! here is free of network I/O.

pub mod anthropic_types;
pub mod openai_types;
pub mod reassemble;
pub mod request;
pub mod response;
pub mod streaming;
