//! The Model handle: typed configuration plus an owned backend.
//!
//! A `Model` owns exactly one [`Backend`]. Agents reference a model through
//! `Arc<Model>`, so several agents may share one model; the local backend
//! serializes its decode calls internally, and remote backends are
//! reentrant by nature.

use std::sync::Arc;
use colloquy_core::{diag, BackendError, Error, Result};
use tracing::{info, warn};

use crate::{Backend, BackendInfo, GenerationParams, TokenStream};

/// Configuration for a local GGUF model.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Path to the `.gguf` model file
    pub path: std::path::PathBuf,

    /// Accelerator layers: `-1` auto (all layers when an accelerator is
    /// detected, else none), `0` CPU only, positive N pins the count
    pub gpu_layers: i32,

    /// Context window size in tokens
    pub context_size: usize,

    /// CPU threads; `0` auto-detects
    pub threads: usize,
}

impl LocalConfig {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            gpu_layers: -1,
            context_size: 2048,
            threads: 0,
        }
    }

    pub fn with_gpu_layers(mut self, layers: i32) -> Self {
        self.gpu_layers = layers;
        self
    }

    pub fn with_context_size(mut self, size: usize) -> Self {
        self.context_size = size;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }
}

/// Configuration for a remote OpenAI-compatible model.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base endpoint URL; `/chat/completions` is appended per request
    pub endpoint: String,

    /// Bearer token sent in the `Authorization` header
    pub api_key: String,

    /// Model name carried in each request body
    pub model: String,

    /// Context window size the server is assumed to support
    pub context_size: usize,
}

impl RemoteConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".into(),
            api_key: api_key.into(),
            model: model.into(),
            context_size: 8192,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_context_size(mut self, size: usize) -> Self {
        self.context_size = size;
        self
    }
}

/// A model: one owned backend behind a uniform generate/stream/info surface.
pub struct Model {
    backend: Box<dyn Backend>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Model {
    /// Create a local model by loading a GGUF file eagerly.
    ///
    /// Fails with `ModelNotFound` when the file does not exist and
    /// `BackendInit` when it cannot be loaded. Loading blocks the calling
    /// thread; do it at startup, not inside a request handler.
    #[cfg(feature = "local")]
    pub fn local(config: LocalConfig) -> Result<Arc<Self>> {
        let result = crate::local::LocalBackend::open(&config)
            .map(|backend| {
                Arc::new(Self {
                    backend: Box::new(backend),
                })
            })
            .map_err(Error::from);
        diag::track(&result);
        result
    }

    /// Create a remote model targeting an OpenAI-compatible endpoint.
    ///
    /// No request is issued at construction; connectivity problems surface
    /// on the first `generate` call.
    pub fn remote(config: RemoteConfig) -> Result<Arc<Self>> {
        let result = validate_remote(&config).and_then(|_| {
            let backend = crate::remote::RemoteBackend::new(&config)?;
            Ok(Arc::new(Self {
                backend: Box::new(backend),
            }))
        });
        diag::track(&result);
        result
    }

    /// Wrap an existing backend implementation (custom backends, tests).
    pub fn from_backend(backend: Box<dyn Backend>) -> Arc<Self> {
        Arc::new(Self { backend })
    }

    /// Run the backend warmup. Failure is advisory: the model remains
    /// usable, the error is logged, recorded in the diagnostics slot, and
    /// returned for callers that care.
    pub async fn warmup(&self) -> std::result::Result<(), BackendError> {
        info!(backend = self.backend.name(), "Warming up model");
        match self.backend.warmup().await {
            Ok(()) => {
                diag::clear();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Model warmup failed (non-fatal)");
                diag::record(&Error::Backend(e.clone()));
                Err(e)
            }
        }
    }

    /// Static information about the underlying backend.
    pub fn info(&self) -> BackendInfo {
        self.backend.info()
    }

    /// Generate a completion for a rendered prompt.
    pub async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<String, BackendError> {
        self.backend.generate(prompt, params).await
    }

    /// Generate a completion as a token stream.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<TokenStream, BackendError> {
        self.backend.generate_stream(prompt, params).await
    }
}

fn validate_remote(config: &RemoteConfig) -> Result<()> {
    if config.api_key.is_empty() {
        return Err(Error::InvalidParam(
            "API key is required for remote models".into(),
        ));
    }
    if config.model.is_empty() {
        return Err(Error::InvalidParam(
            "Model name is required for remote models".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::ErrorKind;

    #[test]
    fn remote_requires_api_key_and_model() {
        let err = Model::remote(RemoteConfig::new("", "gpt-4")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);

        let err = Model::remote(RemoteConfig::new("sk-test", "")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
    }

    #[test]
    fn remote_rejects_bad_endpoint() {
        let config = RemoteConfig::new("sk-test", "gpt-4").with_endpoint("ftp://example.com");
        let err = Model::remote(config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendInit);
    }

    #[test]
    fn remote_constructs_and_reports_info() {
        let config = RemoteConfig::new("sk-test", "gpt-4").with_context_size(32768);
        let model = Model::remote(config).unwrap();
        let info = model.info();
        assert_eq!(info.backend, "openai");
        assert_eq!(info.device, "remote");
        assert_eq!(info.context_size, 32768);
    }

    #[tokio::test]
    async fn remote_warmup_is_noop_success() {
        let model = Model::remote(RemoteConfig::new("sk-test", "gpt-4")).unwrap();
        assert!(model.warmup().await.is_ok());
    }

    #[cfg(feature = "local")]
    #[test]
    fn local_missing_file_reports_model_not_found() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc as StdArc, Mutex};

        let count = StdArc::new(AtomicUsize::new(0));
        let seen = StdArc::new(Mutex::new(None));
        {
            let count = count.clone();
            let seen = seen.clone();
            // Match on the unique path so concurrently-running tests that
            // record unrelated errors don't perturb the count.
            diag::set_error_callback(move |kind, message| {
                if message.contains("/nonexistent/model.gguf") {
                    count.fetch_add(1, Ordering::SeqCst);
                    *seen.lock().unwrap() = Some((kind, message.to_string()));
                }
            });
        }

        let err = Model::local(LocalConfig::new("/nonexistent/model.gguf")).unwrap_err();
        diag::clear_error_callback();

        assert_eq!(err.kind(), ErrorKind::ModelNotFound);
        assert!(err.to_string().contains("not found"));

        // Thread-local slot reports the same failure
        let (kind, message) = diag::last_error().unwrap();
        assert_eq!(kind, ErrorKind::ModelNotFound);
        assert!(message.contains("not found"));

        // Callback invoked exactly once, with the same kind and message
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let (cb_kind, cb_message) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(cb_kind, ErrorKind::ModelNotFound);
        assert_eq!(cb_message, message);
    }
}
