//! Language model endpoints for KeilPilot.
//!
//! All endpoints implement the `keilpilot_core::ModelEndpoint` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatEndpoint;
