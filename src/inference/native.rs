//! Native backend over the linked prebuilt engine.
//!
//! Implements [`InferenceBackend`] by calling directly into the verified
//! binary. Every native resource (model, context, sampler chain) has an RAII
//! wrapper so it is freed on every exit path, including cancellation and
//! mid-generation errors.

use super::backend::{BackendSession, BackendStop, InferenceBackend, TokenId};
use super::engine::{EngineError, GenerationParams, LoadedModelInfo, ModelParams};
use super::ffi;
use super::streaming::drain_valid_utf8;
use once_cell::sync::OnceCell;
use std::ffi::CString;
use std::os::raw::c_int;
use std::path::Path;
use std::ptr::NonNull;

/// One-time process-wide engine init. The engine requires this exactly once;
/// it is the only global this crate keeps.
fn ensure_backend_init() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| unsafe { ffi::llama_backend_init() });
}

/// Backend over the engine binary linked by the build script.
pub struct NativeBackend;

impl NativeBackend {
    pub fn init() -> Self {
        ensure_backend_init();
        NativeBackend
    }
}

impl InferenceBackend for NativeBackend {
    fn load(
        &self,
        path: &Path,
        params: &ModelParams,
    ) -> Result<Box<dyn BackendSession>, EngineError> {
        let c_path = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| EngineError::LoadFailed("model path contains a NUL byte".to_string()))?;

        let mut model_params = unsafe { ffi::llama_model_default_params() };
        model_params.n_gpu_layers = params.gpu_layers as c_int;
        model_params.use_mmap = params.use_mmap;

        let model = NonNull::new(unsafe {
            ffi::llama_model_load_from_file(c_path.as_ptr(), model_params)
        })
        .map(NativeModel)
        .ok_or_else(|| {
            EngineError::LoadFailed(format!("engine rejected model {}", path.display()))
        })?;

        let mut ctx_params = unsafe { ffi::llama_context_default_params() };
        ctx_params.n_ctx = params.context_size;
        if let Some(threads) = params.threads {
            ctx_params.n_threads = c_int::from(threads);
            ctx_params.n_threads_batch = c_int::from(threads);
        }

        let ctx = NonNull::new(unsafe { ffi::llama_init_from_model(model.0.as_ptr(), ctx_params) })
            .map(NativeContext)
            .ok_or_else(|| {
                EngineError::LoadFailed(
                    "engine could not create an inference context (insufficient memory?)"
                        .to_string(),
                )
            })?;

        let vocab = unsafe { ffi::llama_model_get_vocab(model.0.as_ptr()) };
        let info = LoadedModelInfo {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            path: path.to_path_buf(),
            size_bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            parameters: Some(unsafe { ffi::llama_model_n_params(model.0.as_ptr()) }),
            context_size: unsafe { ffi::llama_n_ctx(ctx.0.as_ptr()) },
        };

        tracing::info!(model = %info.name, context = info.context_size, "native session created");
        Ok(Box::new(NativeSession {
            info,
            vocab,
            ctx,
            model,
        }))
    }
}

struct NativeModel(NonNull<ffi::llama_model>);

impl Drop for NativeModel {
    fn drop(&mut self) {
        unsafe { ffi::llama_model_free(self.0.as_ptr()) };
    }
}

struct NativeContext(NonNull<ffi::llama_context>);

impl Drop for NativeContext {
    fn drop(&mut self) {
        unsafe { ffi::llama_free(self.0.as_ptr()) };
    }
}

/// A sampler chain; freeing the chain frees every sampler added to it.
struct SamplerChain(NonNull<ffi::llama_sampler>);

impl SamplerChain {
    fn for_params(params: &GenerationParams) -> Result<Self, EngineError> {
        let chain = NonNull::new(unsafe {
            ffi::llama_sampler_chain_init(ffi::llama_sampler_chain_default_params())
        })
        .ok_or_else(|| EngineError::Inference("failed to create sampler chain".to_string()))?;
        let chain = SamplerChain(chain);

        unsafe {
            if params.temperature == 0.0 {
                ffi::llama_sampler_chain_add(chain.0.as_ptr(), ffi::llama_sampler_init_greedy());
            } else {
                if params.top_k > 0 {
                    ffi::llama_sampler_chain_add(
                        chain.0.as_ptr(),
                        ffi::llama_sampler_init_top_k(params.top_k as c_int),
                    );
                }
                ffi::llama_sampler_chain_add(
                    chain.0.as_ptr(),
                    ffi::llama_sampler_init_top_p(params.top_p, 1),
                );
                ffi::llama_sampler_chain_add(
                    chain.0.as_ptr(),
                    ffi::llama_sampler_init_temp(params.temperature),
                );
                ffi::llama_sampler_chain_add(
                    chain.0.as_ptr(),
                    ffi::llama_sampler_init_dist(params.seed.unwrap_or(ffi::LLAMA_DEFAULT_SEED)),
                );
            }
        }
        Ok(chain)
    }
}

impl Drop for SamplerChain {
    fn drop(&mut self) {
        unsafe { ffi::llama_sampler_free(self.0.as_ptr()) };
    }
}

/// Field order matters: the context must drop before the model it was
/// created from.
struct NativeSession {
    info: LoadedModelInfo,
    vocab: *const ffi::llama_vocab,
    ctx: NativeContext,
    model: NativeModel,
}

// Sessions are only driven behind the facade's per-handle lock; the engine
// does not promise thread-safety for a shared context, and the lock is what
// provides it here.
unsafe impl Send for NativeSession {}

impl NativeSession {
    fn tokenize_internal(
        &self,
        text: &str,
        add_special: bool,
    ) -> Result<Vec<ffi::llama_token>, EngineError> {
        let text_len = c_int::try_from(text.len())
            .map_err(|_| EngineError::Inference("input text too long to tokenize".to_string()))?;

        let needed = unsafe {
            ffi::llama_tokenize(
                self.vocab,
                text.as_ptr().cast(),
                text_len,
                std::ptr::null_mut(),
                0,
                add_special,
                true,
            )
        };
        let capacity = needed.unsigned_abs() as usize;
        if capacity == 0 {
            return Ok(Vec::new());
        }

        let mut tokens = vec![0 as ffi::llama_token; capacity];
        let written = unsafe {
            ffi::llama_tokenize(
                self.vocab,
                text.as_ptr().cast(),
                text_len,
                tokens.as_mut_ptr(),
                capacity as c_int,
                add_special,
                true,
            )
        };
        if written < 0 {
            return Err(EngineError::Inference("tokenization failed".to_string()));
        }
        tokens.truncate(written as usize);
        Ok(tokens)
    }

    fn append_piece_bytes(
        &self,
        token: ffi::llama_token,
        out: &mut Vec<u8>,
    ) -> Result<(), EngineError> {
        let mut buf = [0u8; 256];
        let n = unsafe {
            ffi::llama_token_to_piece(
                self.vocab,
                token,
                buf.as_mut_ptr().cast(),
                buf.len() as c_int,
                0,
                false,
            )
        };
        if n < 0 {
            return Err(EngineError::Inference(format!(
                "detokenization of token {token} failed"
            )));
        }
        out.extend_from_slice(&buf[..n as usize]);
        Ok(())
    }

    fn decode(&mut self, tokens: &mut [ffi::llama_token]) -> Result<(), EngineError> {
        let batch = unsafe { ffi::llama_batch_get_one(tokens.as_mut_ptr(), tokens.len() as c_int) };
        let status = unsafe { ffi::llama_decode(self.ctx.0.as_ptr(), batch) };
        if status != 0 {
            return Err(EngineError::Inference(format!(
                "decode failed with status {status}"
            )));
        }
        Ok(())
    }
}

impl BackendSession for NativeSession {
    fn info(&self) -> LoadedModelInfo {
        self.info.clone()
    }

    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>, EngineError> {
        self.tokenize_internal(text, true)
    }

    fn run_generation(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        sink: &mut dyn FnMut(&str) -> bool,
    ) -> Result<BackendStop, EngineError> {
        let mut prompt_tokens = self.tokenize_internal(prompt, true)?;
        if prompt_tokens.is_empty() {
            return Err(EngineError::Inference(
                "prompt tokenized to nothing".to_string(),
            ));
        }

        let n_ctx = unsafe { ffi::llama_n_ctx(self.ctx.0.as_ptr()) };
        if prompt_tokens.len() as u64 + u64::from(params.max_tokens) > u64::from(n_ctx) {
            return Err(EngineError::ContextOverflow {
                prompt_tokens: prompt_tokens.len(),
                max_tokens: params.max_tokens,
                context_size: n_ctx,
            });
        }

        let chain = SamplerChain::for_params(params)?;
        self.decode(&mut prompt_tokens)?;

        let mut bytes: Vec<u8> = Vec::new();
        let mut produced = 0u32;
        let mut token =
            unsafe { ffi::llama_sampler_sample(chain.0.as_ptr(), self.ctx.0.as_ptr(), -1) };
        loop {
            if unsafe { ffi::llama_vocab_is_eog(self.vocab, token) } {
                return Ok(BackendStop::Eos);
            }

            produced += 1;
            self.append_piece_bytes(token, &mut bytes)?;
            let fragment = drain_valid_utf8(&mut bytes);
            if !fragment.is_empty() && !sink(&fragment) {
                return Ok(BackendStop::SinkClosed);
            }
            if produced >= params.max_tokens {
                return Ok(BackendStop::MaxTokens);
            }

            let mut next = [token];
            self.decode(&mut next)?;
            token =
                unsafe { ffi::llama_sampler_sample(chain.0.as_ptr(), self.ctx.0.as_ptr(), -1) };
        }
    }
}
