//! Model runtime access: the HTTP client and the single-slot loader.
//!
//! The [`ModelRuntime`] trait is the capability boundary to the external
//! local model runtime; [`OllamaClient`] is the bundled implementation.
//! [`ModelSlot`] sits above it and enforces that at most one model is
//! resident in accelerator memory at any instant.

pub mod client;
pub mod slot;

pub use client::{GenerateRequest, ModelRuntime, OllamaClient};
pub use slot::ModelSlot;
