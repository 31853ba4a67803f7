//! llama-link
//!
//! Safe facade over a prebuilt llama.cpp engine binary. The build script
//! fetches the pinned release archive for the target, verifies its SHA-256
//! digest, and links it; the library exposes the narrow surface downstream
//! applications need: load a model into an opaque handle, tokenize, stream a
//! generation, release the handle.
//!
//! All numeric semantics (quantization, sampling, tokenization) live in the
//! engine binary and are only surfaced here, never reimplemented.
//!
//! ```no_run
//! use llama_link::{GenerationParams, LlamaEngine, ModelParams};
//!
//! # async fn run() -> Result<(), llama_link::EngineError> {
//! # #[cfg(feature = "prebuilt")]
//! # {
//! let engine = LlamaEngine::new();
//! let model = engine
//!     .load_model("llama-3.2-1b.Q4_K_M.gguf", &ModelParams::default())
//!     .await?;
//! let generation = engine.generate(model, "The capital of France is", GenerationParams::default())?;
//! let (text, _reason) = generation.stream.collect_text().await?;
//! println!("{text}");
//! engine.release(model)?;
//! # }
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod inference;
pub mod platform;

pub use artifact::ArtifactError;
pub use inference::{
    CancelHandle, EngineError, Generation, GenerationParams, LlamaEngine, LoadedModelInfo,
    ModelHandle, ModelParams, StopReason, StreamToken, TokenStream,
};
pub use platform::{PlatformError, PlatformFamily};
