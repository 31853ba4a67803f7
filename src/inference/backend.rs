//! Backend seam
//!
//! `InferenceBackend` separates the engine facade from the native FFI. The
//! facade drives any implementation the same way, which also makes it the
//! injection point for tests.

use super::engine::{EngineError, GenerationParams, LoadedModelInfo, ModelParams};
use std::path::Path;

/// Engine token id.
pub type TokenId = i32;

/// How a backend generation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStop {
    /// The engine produced an end-of-generation token.
    Eos,
    /// The max-token bound was reached.
    MaxTokens,
    /// The sink refused further output (cancellation, stop sequence, or a
    /// dropped consumer). The facade knows which.
    SinkClosed,
}

/// Loads model files into live sessions.
pub trait InferenceBackend: Send + Sync + 'static {
    /// Load the model at `path`. Blocking; the facade calls this from a
    /// blocking task.
    fn load(
        &self,
        path: &Path,
        params: &ModelParams,
    ) -> Result<Box<dyn BackendSession>, EngineError>;
}

/// A loaded model together with its inference context.
///
/// Sessions are only ever driven behind the facade's per-handle lock, so
/// implementations need `Send` but not `Sync`. Dropping a session releases
/// every resource it holds.
pub trait BackendSession: Send {
    /// Metadata captured at load time.
    fn info(&self) -> LoadedModelInfo;

    /// Tokenize with the engine's own tokenizer.
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>, EngineError>;

    /// Run one generation, feeding decoded fragments to `sink`. A `false`
    /// return from `sink` stops the loop with [`BackendStop::SinkClosed`].
    fn run_generation(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        sink: &mut dyn FnMut(&str) -> bool,
    ) -> Result<BackendStop, EngineError>;
}
