//! Token streaming
//!
//! Plumbing between the blocking generation task and async consumers: the
//! stream items, the cancel handle, and stop-sequence matching.

use super::engine::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why a generation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The engine produced an end-of-generation token.
    Eos,
    /// The max-token bound was reached.
    MaxTokens,
    /// A configured stop sequence appeared in the output.
    StopSequence,
    /// The caller cancelled the generation.
    Cancelled,
}

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamToken {
    /// A decoded text fragment.
    Token(String),
    /// Terminal item: the generation finished for the given reason.
    Done(StopReason),
    /// Terminal item: the engine reported a failure mid-generation.
    Error(String),
}

/// Best-effort cancellation of a generation in progress.
///
/// Cancelling stops the stream after the current token step; all native
/// resources are still released.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination of the generation this handle belongs to.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Lazy, finite sequence of generation output.
///
/// Ends with [`StreamToken::Done`] or [`StreamToken::Error`]; not
/// restartable. Dropping the stream stops the producer at its next token.
#[derive(Debug)]
pub struct TokenStream {
    rx: mpsc::Receiver<StreamToken>,
}

impl TokenStream {
    pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<StreamToken>, TokenStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, TokenStream { rx })
    }

    /// Next stream item, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<StreamToken> {
        self.rx.recv().await
    }

    /// Drain the stream, concatenating all fragments.
    pub async fn collect_text(mut self) -> Result<(String, StopReason), EngineError> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            match item {
                StreamToken::Token(fragment) => text.push_str(&fragment),
                StreamToken::Done(reason) => return Ok((text, reason)),
                StreamToken::Error(message) => return Err(EngineError::Inference(message)),
            }
        }
        Err(EngineError::Inference(
            "generation ended without a stop reason".to_string(),
        ))
    }
}

/// Incremental stop-sequence matcher.
///
/// Fragments may split a stop sequence anywhere, so text that could still be
/// the prefix of a stop sequence is held back until it either completes one
/// or is ruled out.
pub(crate) struct StopMatcher {
    sequences: Vec<String>,
    pending: String,
}

impl StopMatcher {
    pub fn new(sequences: &[String]) -> Self {
        Self {
            sequences: sequences.iter().filter(|s| !s.is_empty()).cloned().collect(),
            pending: String::new(),
        }
    }

    /// Feed a fragment. Returns the text safe to emit now and whether a stop
    /// sequence completed (emitted text excludes the sequence itself).
    pub fn push(&mut self, piece: &str) -> (String, bool) {
        self.pending.push_str(piece);

        let mut hit: Option<usize> = None;
        for seq in &self.sequences {
            if let Some(idx) = self.pending.find(seq.as_str()) {
                hit = Some(hit.map_or(idx, |h| h.min(idx)));
            }
        }
        if let Some(idx) = hit {
            let emit = self.pending[..idx].to_string();
            self.pending.clear();
            return (emit, true);
        }

        if self.sequences.is_empty() {
            return (std::mem::take(&mut self.pending), false);
        }

        let keep = self.holdback_len();
        let cut = self.pending.len() - keep;
        let emit = self.pending[..cut].to_string();
        self.pending.drain(..cut);
        (emit, false)
    }

    /// Longest suffix of `pending` that is a proper prefix of any stop
    /// sequence.
    fn holdback_len(&self) -> usize {
        let mut best = 0;
        for seq in &self.sequences {
            let max = (seq.len() - 1).min(self.pending.len());
            for len in (best + 1)..=max {
                let start = self.pending.len() - len;
                if self.pending.is_char_boundary(start)
                    && seq.is_char_boundary(len)
                    && self.pending[start..] == seq[..len]
                {
                    best = len;
                }
            }
        }
        best
    }

    /// Flush any held-back text at the end of a generation.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

/// Move the longest valid UTF-8 prefix out of `buf`, leaving any trailing
/// incomplete multi-byte sequence for the next token's bytes to finish.
pub(crate) fn drain_valid_utf8(buf: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buf) {
        Ok(text) => {
            let text = text.to_string();
            buf.clear();
            text
        }
        Err(err) if err.error_len().is_none() => {
            let valid = err.valid_up_to();
            let text = String::from_utf8_lossy(&buf[..valid]).into_owned();
            buf.drain(..valid);
            text
        }
        Err(_) => {
            // Invalid bytes in the middle; surface them lossily rather than
            // stalling the stream.
            let text = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            text
        }
    }
}
