use anyhow::{anyhow, Result};
use candle_core::{DType, Device};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokenizers::Tokenizer;

use recipedb_core::config::{expand_path, ModelSettings};
use recipedb_core::error::Error;
pub use recipedb_core::traits::Embedder;

pub mod config;
pub mod device;
pub mod ops;
pub mod pool;
pub mod quant;
pub mod qwen3;
pub mod tokenize;
pub mod weights;
pub mod worker;

pub use config::ModelConfig;
pub use device::{parse_dtype, select_device};
pub use pool::{l2_normalize, last_token_l2, last_token_pool};
pub use quant::{dequantize, quantize, QuantizationSpec, QuantizedWeight};
pub use qwen3::{KvCache, Qwen3Encoder};
pub use weights::{load_model_weights, WeightTable};
pub use worker::EmbedWorker;

const EOS_TOKEN: &str = "<|endoftext|>";
const DEFAULT_MODEL_DIRS: &[&str] = &["../models/qwen3-embedding", "models/qwen3-embedding"];

pub struct EmbeddingModel {
    model: Qwen3Encoder,
    tokenizer: Tokenizer,
    device: Device,
    eos: u32,
    max_len: usize,
}

impl EmbeddingModel {
    /// Load using the `[model]` settings: directory resolution, device and dtype.
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let model_dir = resolve_model_dir(settings.dir.as_deref())?;
        let dtype = parse_dtype(&settings.dtype)?;
        Self::load(&model_dir, select_device(), dtype, settings.max_len)
    }

    pub fn load(model_dir: &Path, device: Device, dtype: DType, max_len: usize) -> Result<Self> {
        let start = Instant::now();
        let cfg = ModelConfig::load(model_dir)?;
        tracing::info!(
            dir = %model_dir.display(),
            layers = cfg.num_hidden_layers,
            hidden = cfg.hidden_size,
            quantized = cfg.quantization.is_some(),
            "loading embedding model"
        );

        let tokenizer_path = model_dir.join("tokenizer.json");
        if !tokenizer_path.is_file() {
            return Err(Error::NotFound(format!("tokenizer {}", tokenizer_path.display())).into());
        }
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let eos = cfg
            .eos_token_id
            .or_else(|| tokenizer.token_to_id(EOS_TOKEN))
            .ok_or_else(|| Error::InvalidConfig(format!("no eos_token_id and tokenizer lacks {EOS_TOKEN}")))?;

        let weights = load_model_weights(model_dir, &cfg, &device)?;
        let model = Qwen3Encoder::load(weights.into_var_builder(dtype, &device), &cfg)?;
        let max_len = max_len.min(cfg.max_position_embeddings);

        tracing::info!(elapsed_ms = start.elapsed().as_millis(), dim = model.hidden_size(), "embedding model ready");
        Ok(Self { model, tokenizer, device, eos, max_len })
    }
}

impl Embedder for EmbeddingModel {
    fn dim(&self) -> usize {
        self.model.hidden_size()
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let (ids, mask) = tokenize::tokenize_batch_on_device(&self.tokenizer, texts, self.max_len, self.eos, &self.device)?;
        let pooled = self.model.forward(&ids, &mask, None)?;
        Ok(pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }
}

/// Deterministic bag-of-words hashing embedder for tests and development.
pub struct FakeEmbedder {
    dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;

        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += val + (i % 3) as f32 * 0.01;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(pool::NORM_EPS);
        v.iter_mut().for_each(|x| *x /= norm);
        v
    }
}

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Dimension of the fake embedder; matches Qwen3-Embedding-0.6B.
pub const FAKE_EMBEDDING_DIM: usize = 1024;

pub fn get_default_embedder(settings: &ModelSettings) -> Result<Box<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if use_fake || settings.use_fake {
        tracing::info!("🧪 Using FakeEmbedder");
        return Ok(Box::new(FakeEmbedder::new(FAKE_EMBEDDING_DIM)));
    }
    Ok(Box::new(EmbeddingModel::new(settings)?))
}

/// Locate the model directory: explicit setting, `APP_MODEL_DIR`,
/// `MODEL_DIR`, then the well-known relative paths.
pub fn resolve_model_dir(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        let p = expand_path(dir);
        if p.is_dir() {
            tracing::info!("📦 Using model dir: {}", p.display());
            return Ok(p);
        }
        return Err(Error::NotFound(format!("model directory {}", p.display())).into());
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = expand_path(dir);
            if p.is_dir() {
                tracing::info!("📦 Using {var}: {}", p.display());
                return Ok(p);
            }
        }
    }
    for candidate in DEFAULT_MODEL_DIRS {
        let p = Path::new(candidate);
        if p.is_dir() {
            tracing::info!("📦 Using model dir: {}", p.display());
            return Ok(p.to_path_buf());
        }
    }
    Err(Error::NotFound("could not locate the Qwen3 embedding model directory".into()).into())
}
