//! Local backend — runs GGUF-quantized models directly on the caller's
//! hardware via [Candle](https://github.com/huggingface/candle).
//!
//! The model file is loaded eagerly at construction. Inference is
//! CPU/GPU-bound and inherently sequential, so the loaded state sits
//! behind a mutex and decode runs on a blocking thread; a `Model` shared
//! by several agents therefore serializes its generations. CPU tensor
//! work executes inside a dedicated rayon pool sized by the configured
//! thread count, so `threads` bounds decode parallelism.
//!
//! A `tokenizer.json` is expected next to the `.gguf` file.

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use colloquy_core::BackendError;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::model::LocalConfig;
use crate::{Backend, BackendInfo, GenerationParams};

const DEFAULT_MAX_TOKENS: u32 = 512;
const SAMPLER_SEED: u64 = 42;

/// A backend that runs a GGUF-quantized llama-family model via Candle.
pub struct LocalBackend {
    state: Arc<Mutex<LocalState>>,
    /// Sized thread pool that all decode work runs inside.
    pool: Arc<rayon::ThreadPool>,
    device_name: &'static str,
    gpu_layers_loaded: i32,
    memory_bytes: u64,
    context_size: usize,
    threads: usize,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("device_name", &self.device_name)
            .field("gpu_layers_loaded", &self.gpu_layers_loaded)
            .field("memory_bytes", &self.memory_bytes)
            .field("context_size", &self.context_size)
            .field("threads", &self.threads)
            .finish()
    }
}

/// The loaded model state (weights + tokenizer + device).
struct LocalState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: u32,
}

impl LocalBackend {
    /// Load a model from a GGUF file.
    ///
    /// Fails with `ModelNotFound` when the file is absent and `Init` when
    /// the file or its tokenizer cannot be loaded. Blocks until loading
    /// completes; no partially-initialized backend is ever returned.
    pub fn open(config: &LocalConfig) -> Result<Self, BackendError> {
        let path = config.path.as_path();
        if !path.is_file() {
            return Err(BackendError::ModelNotFound(format!(
                "Model file not found: {}",
                path.display()
            )));
        }

        let memory_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let threads = resolve_threads(config.threads);
        let pool = Arc::new(build_decode_pool(threads)?);
        let context_size = if config.context_size > 0 {
            config.context_size
        } else {
            2048
        };

        let mut file = std::fs::File::open(path)
            .map_err(|e| BackendError::Init(format!("Failed to open model file: {e}")))?;
        let content = gguf_file::Content::read(&mut file)
            .map_err(|e| BackendError::Init(format!("Failed to parse GGUF file: {e}")))?;

        let n_layers = content
            .metadata
            .get("llama.block_count")
            .and_then(|v| v.to_u32().ok())
            .unwrap_or(32) as i32;

        let accelerator = detect_accelerator();
        let gpu_layers_loaded =
            resolve_gpu_layers(config.gpu_layers, accelerator.is_some(), n_layers);
        let (device, device_name) = match accelerator {
            Some((device, name)) if gpu_layers_loaded > 0 => (device, name),
            _ => (Device::Cpu, "CPU"),
        };

        info!(
            path = %path.display(),
            device = device_name,
            gpu_layers = gpu_layers_loaded,
            context_size,
            threads,
            "Loading local model"
        );

        let model = qlm::ModelWeights::from_gguf(content, &mut file, &device)
            .map_err(|e| BackendError::Init(format!("Failed to load model weights: {e}")))?;

        let tokenizer_path = path.with_file_name("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            BackendError::Init(format!(
                "Failed to load tokenizer from {}: {e}",
                tokenizer_path.display()
            ))
        })?;

        let eos_token_id = tokenizer
            .token_to_id("</s>")
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
            .or_else(|| tokenizer.token_to_id("<|im_end|>"))
            .or_else(|| tokenizer.token_to_id("<|eot_id|>"))
            .unwrap_or(2);

        Ok(Self {
            state: Arc::new(Mutex::new(LocalState {
                model,
                tokenizer,
                device,
                eos_token_id,
            })),
            pool,
            device_name,
            gpu_layers_loaded,
            memory_bytes,
            context_size,
            threads,
        })
    }
}

impl LocalState {
    /// Run one generation: tokenize, decode loop, detokenize.
    fn generate(&mut self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| BackendError::Inference(format!("Tokenization failed: {e}")))?;
        let prompt_tokens = encoding.get_ids().to_vec();

        let max_tokens = params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS) as usize;
        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens,
            temperature = params.temperature,
            "Starting local generation"
        );

        let mut logits_processor = if params.temperature <= 0.0 {
            LogitsProcessor::new(SAMPLER_SEED, None, None)
        } else {
            LogitsProcessor::new(SAMPLER_SEED, Some(params.temperature as f64), None)
        };

        let mut generated: Vec<u32> = Vec::new();

        // Process the whole prompt at position 0, then feed tokens back
        // one at a time.
        let mut next_token = {
            let input = Tensor::new(prompt_tokens.as_slice(), &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
            let logits = self
                .model
                .forward(&input, 0)
                .and_then(|l| l.squeeze(0))
                .map_err(map_candle_err)?;
            logits_processor.sample(&logits).map_err(map_candle_err)?
        };

        while generated.len() < max_tokens {
            if next_token == self.eos_token_id {
                break;
            }
            generated.push(next_token);

            let input = Tensor::new(&[next_token][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
            let logits = self
                .model
                .forward(&input, prompt_tokens.len() + generated.len() - 1)
                .and_then(|l| l.squeeze(0))
                .map_err(map_candle_err)?;
            next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;
        }

        let output = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| BackendError::Inference(format!("Detokenization failed: {e}")))?;

        debug!(completion_tokens = generated.len(), "Generation complete");
        Ok(trim_special_tokens(&output).to_string())
    }

    /// One decode step on a short prompt to populate caches.
    fn warmup(&mut self) -> Result<(), BackendError> {
        let encoding = self
            .tokenizer
            .encode("Hello", true)
            .map_err(|e| BackendError::Inference(format!("Warmup tokenization failed: {e}")))?;
        let tokens = encoding.get_ids().to_vec();
        if tokens.is_empty() {
            return Err(BackendError::Inference(
                "Warmup prompt produced no tokens".into(),
            ));
        }

        let input = Tensor::new(tokens.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let logits = self
            .model
            .forward(&input, 0)
            .and_then(|l| l.squeeze(0))
            .map_err(map_candle_err)?;
        let mut sampler = LogitsProcessor::new(SAMPLER_SEED, None, None);
        sampler.sample(&logits).map_err(map_candle_err)?;
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "candle"
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let state = self.state.clone();
        let pool = self.pool.clone();
        let prompt = prompt.to_string();
        let params = params.clone();

        // Decode is CPU/GPU-bound; keep it off the async executor and
        // inside the sized pool so `threads` bounds its parallelism.
        tokio::task::spawn_blocking(move || {
            let mut guard = state.blocking_lock();
            pool.install(|| guard.generate(&prompt, &params))
        })
        .await
        .map_err(|e| BackendError::Inference(format!("Inference task panicked: {e}")))?
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            backend: "candle".into(),
            device: self.device_name.into(),
            gpu_layers_loaded: self.gpu_layers_loaded,
            memory_bytes: self.memory_bytes,
            context_size: self.context_size,
        }
    }

    async fn warmup(&self) -> Result<(), BackendError> {
        debug!(threads = self.threads, "Running warmup decode");
        let state = self.state.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = state.blocking_lock();
            pool.install(|| guard.warmup())
        })
        .await
        .map_err(|e| BackendError::Inference(format!("Warmup task panicked: {e}")))?
    }
}

/// Detect an available accelerator.
fn detect_accelerator() -> Option<(Device, &'static str)> {
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return Some((device, "Metal"));
        }
    }
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return Some((device, "CUDA"));
        }
    }
    None
}

/// Apply the layer-count policy: `-1` auto (everything when an accelerator
/// exists, else nothing), `0` CPU only, positive N capped at the model's
/// layer count.
fn resolve_gpu_layers(requested: i32, accelerator_available: bool, n_layers: i32) -> i32 {
    match requested {
        -1 if accelerator_available => n_layers,
        -1 => 0,
        0 => 0,
        n => n.min(n_layers),
    }
}

/// Resolve the thread count: `0` auto-detects.
fn resolve_threads(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Build the pool that decode work runs inside. Candle's CPU kernels
/// parallelize through rayon, so installing onto this pool caps them at
/// the resolved thread count.
fn build_decode_pool(threads: usize) -> Result<rayon::ThreadPool, BackendError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("decode-{i}"))
        .build()
        .map_err(|e| BackendError::Init(format!("Failed to build decode thread pool: {e}")))
}

/// Strip trailing end-of-turn markers the decoder may emit verbatim.
fn trim_special_tokens(output: &str) -> &str {
    output
        .trim()
        .trim_end_matches("</s>")
        .trim_end_matches("<|im_end|>")
        .trim_end_matches("<|eot_id|>")
        .trim()
}

fn map_candle_err(e: candle_core::Error) -> BackendError {
    BackendError::Inference(format!("Candle inference error: {e}"))
}
