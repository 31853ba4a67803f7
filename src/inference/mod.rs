//! LLM inference engine
//!
//! This module handles all interaction with the prebuilt llama.cpp binary
//! for model loading and inference.

pub mod backend;
pub mod engine;
pub mod model;
pub mod streaming;

#[cfg(feature = "prebuilt")]
pub mod ffi;
#[cfg(feature = "prebuilt")]
pub mod native;

// Re-export main types for convenience
pub use backend::{BackendSession, BackendStop, InferenceBackend, TokenId};
pub use engine::{
    EngineError, Generation, GenerationParams, LlamaEngine, LoadedModelInfo, ModelHandle,
    ModelParams,
};
pub use model::{validate_gguf, GgufMetadata, ModelError, GGUF_MAGIC};
pub use streaming::{CancelHandle, StopReason, StreamToken, TokenStream};
