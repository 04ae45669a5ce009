//! Inference backends for colloquy.
//!
//! A [`Backend`] turns a rendered prompt string into generated text, either
//! in one blocking call or as a token stream. Two implementations ship with
//! the library: [`LocalBackend`] runs GGUF-quantized models on the caller's
//! hardware via Candle, and [`RemoteBackend`] talks to any OpenAI-compatible
//! chat-completion endpoint. The [`Model`] handle owns one backend and is
//! shared across agents.

#[cfg(feature = "local")]
pub mod local;
pub mod model;
pub mod remote;

#[cfg(feature = "local")]
pub use local::LocalBackend;
pub use model::{LocalConfig, Model, RemoteConfig};
pub use remote::RemoteBackend;

use async_trait::async_trait;
use colloquy_core::BackendError;
use tokio::sync::mpsc;

/// Per-call generation parameters.
///
/// Backends that cannot honor a parameter (e.g. a remote server that
/// ignores temperature) must still accept it.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Sampling temperature (0.0 = deterministic)
    pub temperature: f32,

    /// Maximum tokens to generate; `None` leaves the limit to the backend
    pub max_tokens: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Static information about a loaded backend.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Backend type: "candle", "openai", "mock", ...
    pub backend: String,

    /// Device: "Metal", "CUDA", "CPU", "remote"
    pub device: String,

    /// Number of layers resident on an accelerator
    pub gpu_layers_loaded: i32,

    /// Estimated memory footprint in bytes
    pub memory_bytes: u64,

    /// Context window size in tokens
    pub context_size: usize,
}

/// A token stream: the receiving half of a channel carrying generated
/// text fragments in order, ending when the sender is dropped.
pub type TokenStream = mpsc::Receiver<Result<String, BackendError>>;

/// The uniform backend contract.
///
/// `generate` blocks until the full completion is available;
/// `generate_stream` delivers fragments as they are produced. The default
/// stream implementation is the degenerate one: a single send of the
/// complete `generate` result.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g. "candle", "openai").
    fn name(&self) -> &str;

    /// Generate a completion for the rendered prompt.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError>;

    /// Generate a completion as a token stream.
    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        let text = self.generate(prompt, params).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(text)).await;
        Ok(rx)
    }

    /// Static information about this backend.
    fn info(&self) -> BackendInfo;

    /// Prime caches with one decode step. Optional; the default is a
    /// successful no-op (remote backends have nothing to warm).
    async fn warmup(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
