//! Inference engine facade
//!
//! Caller-owned wrapper around the native engine: models load into opaque
//! handles, generations stream lazily, and release is deterministic. One
//! generation per handle at a time, enforced with a per-handle lock.

use super::backend::{BackendSession, BackendStop, InferenceBackend, TokenId};
use super::model::{self, ModelError};
use super::streaming::{CancelHandle, StopMatcher, StopReason, StreamToken, TokenStream};
use crate::artifact::digest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Token channel depth; the producer blocks when the consumer lags this far.
const STREAM_BUFFER: usize = 32;

/// Errors from the engine facade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model file not found: {}", path.display())]
    ModelNotFound { path: PathBuf },

    #[error("invalid model file: {0}")]
    InvalidModel(#[from] ModelError),

    #[error("model checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The native engine rejected the model (format details it alone
    /// understands, or insufficient memory).
    #[error("engine failed to load model: {0}")]
    LoadFailed(String),

    #[error("invalid model handle")]
    InvalidHandle,

    #[error("a generation is already running on this model handle")]
    Busy,

    #[error(
        "prompt ({prompt_tokens} tokens) plus max_tokens ({max_tokens}) exceeds the context window ({context_size})"
    )]
    ContextOverflow {
        prompt_tokens: usize,
        max_tokens: u32,
        context_size: u32,
    },

    #[error("invalid generation parameters: {0}")]
    InvalidParams(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque reference to a loaded model, owned by the caller until released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelHandle(u64);

/// Model load configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Context window size in tokens.
    pub context_size: u32,
    /// Number of layers to offload to the GPU (0 = CPU only).
    pub gpu_layers: u32,
    /// Worker threads for token generation; engine default when `None`.
    pub threads: Option<u16>,
    /// Memory-map the model file instead of reading it up front.
    pub use_mmap: bool,
    /// Expected SHA-256 of the model file; verified before load when set.
    #[serde(default)]
    pub expected_sha256: Option<String>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            context_size: 4096,
            gpu_layers: 0,
            threads: None,
            use_mmap: true,
            expected_sha256: None,
        }
    }
}

/// Sampling parameters and bounds for one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Hard bound on generated tokens; keeps every stream finite.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0); 0.0 selects greedy decoding.
    pub temperature: f32,
    /// Top-k sampling cutoff (0 disables).
    pub top_k: u32,
    /// Top-p (nucleus sampling) cutoff (0.0 - 1.0].
    pub top_p: f32,
    /// Sampling seed; engine default when `None`.
    pub seed: Option<u32>,
    /// Sequences that terminate the generation when they appear.
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            seed: None,
            stop_sequences: Vec::new(),
        }
    }
}

impl GenerationParams {
    fn validate(&self) -> Result<(), EngineError> {
        if self.max_tokens == 0 {
            return Err(EngineError::InvalidParams(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(EngineError::InvalidParams(format!(
                "temperature {} outside 0.0..=2.0",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(EngineError::InvalidParams(format!(
                "top_p {} outside (0.0, 1.0]",
                self.top_p
            )));
        }
        Ok(())
    }
}

/// Information about a loaded model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedModelInfo {
    /// Display name of the model.
    pub name: String,
    /// Path the model was loaded from.
    pub path: PathBuf,
    /// Model file size in bytes.
    pub size_bytes: u64,
    /// Number of parameters (if the engine reports it).
    pub parameters: Option<u64>,
    /// Context window the session was created with.
    pub context_size: u32,
}

type SharedSession = Arc<tokio::sync::Mutex<Box<dyn BackendSession>>>;

struct ModelSlot {
    session: SharedSession,
    info: LoadedModelInfo,
}

/// The binding facade.
///
/// Each engine instance owns its loaded models; independent engines and
/// models coexist without shared state.
pub struct LlamaEngine {
    backend: Arc<dyn InferenceBackend>,
    models: Mutex<HashMap<u64, ModelSlot>>,
    next_id: AtomicU64,
}

/// A generation in progress: the token stream plus its cancel handle.
#[derive(Debug)]
pub struct Generation {
    /// Lazy stream of output fragments, terminated by a stop reason.
    pub stream: TokenStream,
    cancel: CancelHandle,
}

impl Generation {
    /// Handle for best-effort early termination of this generation.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl LlamaEngine {
    /// Engine backed by the linked prebuilt binary.
    #[cfg(feature = "prebuilt")]
    pub fn new() -> Self {
        Self::with_backend(Arc::new(super::native::NativeBackend::init()))
    }

    /// Engine over an explicit backend implementation.
    pub fn with_backend(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            backend,
            models: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Load a model file into a fresh handle.
    ///
    /// Validates existence, the GGUF header, and (when requested) the file
    /// digest before handing the path to the native loader. Loading the same
    /// path twice yields two independent handles.
    pub async fn load_model(
        &self,
        path: impl AsRef<Path>,
        params: &ModelParams,
    ) -> Result<ModelHandle, EngineError> {
        let path = path.as_ref().to_path_buf();
        let params = params.clone();
        let backend = Arc::clone(&self.backend);
        let (session, info) =
            tokio::task::spawn_blocking(move || load_blocking(backend.as_ref(), &path, &params))
                .await
                .map_err(|e| EngineError::Inference(format!("load task failed: {e}")))??;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(model = %info.name, handle = id, "model loaded");
        self.lock_models().insert(
            id,
            ModelSlot {
                session: Arc::new(tokio::sync::Mutex::new(session)),
                info,
            },
        );
        Ok(ModelHandle(id))
    }

    /// Metadata for a loaded model.
    pub fn model_info(&self, handle: ModelHandle) -> Result<LoadedModelInfo, EngineError> {
        self.lock_models()
            .get(&handle.0)
            .map(|slot| slot.info.clone())
            .ok_or(EngineError::InvalidHandle)
    }

    /// Handles and metadata of every loaded model.
    pub fn loaded_models(&self) -> Vec<(ModelHandle, LoadedModelInfo)> {
        self.lock_models()
            .iter()
            .map(|(id, slot)| (ModelHandle(*id), slot.info.clone()))
            .collect()
    }

    /// Tokenize text with the model's own tokenizer.
    pub fn tokenize(&self, handle: ModelHandle, text: &str) -> Result<Vec<TokenId>, EngineError> {
        let session = self.session(handle)?;
        let guard = session.try_lock().map_err(|_| EngineError::Busy)?;
        guard.tokenize(text)
    }

    /// Start a generation on `handle`.
    ///
    /// Returns a lazy, finite token stream. At most one generation runs per
    /// handle; a second attempt while one is in flight fails with
    /// [`EngineError::Busy`]. A prompt that cannot fit in the context window
    /// together with `max_tokens` fails with [`EngineError::ContextOverflow`]
    /// before any work starts. The stream ends with a stop reason: max-token
    /// bound, end-of-sequence, stop sequence, or cancellation.
    pub fn generate(
        &self,
        handle: ModelHandle,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<Generation, EngineError> {
        params.validate()?;
        let context_size = self.model_info(handle)?.context_size;
        let session = self.session(handle)?;
        let guard = session.try_lock_owned().map_err(|_| EngineError::Busy)?;

        let prompt_tokens = guard.tokenize(prompt)?.len();
        if prompt_tokens as u64 + u64::from(params.max_tokens) > u64::from(context_size) {
            return Err(EngineError::ContextOverflow {
                prompt_tokens,
                max_tokens: params.max_tokens,
                context_size,
            });
        }

        let (tx, stream) = TokenStream::channel(STREAM_BUFFER);
        let cancel = CancelHandle::new();
        let worker_cancel = cancel.clone();
        let prompt = prompt.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            run_generation_task(&mut **guard, &prompt, &params, &worker_cancel, &tx);
        });
        tracing::debug!(handle = handle.0, "generation started");
        Ok(Generation { stream, cancel })
    }

    /// Release a model handle, freeing every native resource it holds.
    ///
    /// If a generation is in flight the resources are freed as soon as it
    /// observes cancellation or finishes. All subsequent operations on the
    /// handle fail with [`EngineError::InvalidHandle`].
    pub fn release(&self, handle: ModelHandle) -> Result<(), EngineError> {
        let slot = self
            .lock_models()
            .remove(&handle.0)
            .ok_or(EngineError::InvalidHandle)?;
        tracing::info!(model = %slot.info.name, handle = handle.0, "model released");
        Ok(())
    }

    fn session(&self, handle: ModelHandle) -> Result<SharedSession, EngineError> {
        self.lock_models()
            .get(&handle.0)
            .map(|slot| Arc::clone(&slot.session))
            .ok_or(EngineError::InvalidHandle)
    }

    fn lock_models(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ModelSlot>> {
        self.models.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_blocking(
    backend: &dyn InferenceBackend,
    path: &Path,
    params: &ModelParams,
) -> Result<(Box<dyn BackendSession>, LoadedModelInfo), EngineError> {
    if !path.exists() {
        return Err(EngineError::ModelNotFound {
            path: path.to_path_buf(),
        });
    }

    let header = model::validate_gguf(path)?;
    tracing::debug!(
        version = header.version,
        tensors = header.tensor_count,
        "GGUF header validated"
    );

    if let Some(expected) = &params.expected_sha256 {
        let expected = expected.to_ascii_lowercase();
        let actual = digest::sha256_hex_file(path)?;
        if actual != expected {
            return Err(EngineError::ChecksumMismatch { expected, actual });
        }
    }

    let session = backend.load(path, params)?;
    let info = session.info();
    Ok((session, info))
}

/// Blocking producer: drives the backend, applies cancellation and
/// stop-sequence matching, and feeds the stream channel.
fn run_generation_task(
    session: &mut dyn BackendSession,
    prompt: &str,
    params: &GenerationParams,
    cancel: &CancelHandle,
    tx: &mpsc::Sender<StreamToken>,
) {
    let mut matcher = StopMatcher::new(&params.stop_sequences);
    let mut stop_hit = false;

    let result = {
        let matcher = &mut matcher;
        let stop_hit = &mut stop_hit;
        let mut sink = |piece: &str| -> bool {
            if cancel.is_cancelled() {
                return false;
            }
            let (emit, hit) = matcher.push(piece);
            if !emit.is_empty() && tx.blocking_send(StreamToken::Token(emit)).is_err() {
                return false;
            }
            if hit {
                *stop_hit = true;
                return false;
            }
            true
        };
        session.run_generation(prompt, params, &mut sink)
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(error = %e, "generation failed");
            let _ = tx.blocking_send(StreamToken::Error(e.to_string()));
            return;
        }
    };

    let reason = match outcome {
        BackendStop::SinkClosed if cancel.is_cancelled() => StopReason::Cancelled,
        BackendStop::SinkClosed if stop_hit => StopReason::StopSequence,
        // The consumer dropped the stream; nobody is listening.
        BackendStop::SinkClosed => return,
        BackendStop::Eos => StopReason::Eos,
        BackendStop::MaxTokens => StopReason::MaxTokens,
    };

    if matches!(reason, StopReason::Eos | StopReason::MaxTokens) {
        let tail = matcher.finish();
        if !tail.is_empty() {
            let _ = tx.blocking_send(StreamToken::Token(tail));
        }
    }
    let _ = tx.blocking_send(StreamToken::Done(reason));
    tracing::debug!(?reason, "generation finished");
}
