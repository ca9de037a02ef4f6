//! Loading model parameters from weight shards.
//!
//! Shards are read in sorted file-name order and merged into one
//! [`WeightTable`]; a key present in several shards keeps the value from the
//! last one. After merging, the table is sanitized to the `model.` naming
//! scheme, packed quantized weights are expanded, and every parameter the
//! configured layer count needs is checked for.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use recipedb_core::error::Error;

use crate::config::ModelConfig;
use crate::quant::{dequantize, quantize, QuantizationSpec, QuantizedWeight};

const MODEL_PREFIX: &str = "model.";
const SHARD_EXTENSIONS: &[&str] = &["safetensors", "bin"];

#[derive(Debug, Clone, Default)]
pub struct WeightTable {
    tensors: HashMap<String, Tensor>,
}

impl WeightTable {
    pub fn from_map(tensors: HashMap<String, Tensor>) -> Self {
        Self { tensors }
    }

    /// Insert or replace a parameter, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Parameter names in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.tensors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn into_map(self) -> HashMap<String, Tensor> {
        self.tensors
    }

    /// Merge every shard in `dir`. Later shards overwrite earlier ones.
    pub fn load_dir(dir: &Path, device: &Device) -> Result<Self> {
        let mut table = Self::default();
        for path in shard_files(dir)? {
            let entries = read_shard(&path, device)?;
            tracing::debug!(shard = %path.display(), tensors = entries.len(), "read weight shard");
            for (name, tensor) in entries {
                if table.insert(name.clone(), tensor).is_some() {
                    tracing::debug!(%name, shard = %path.display(), "duplicate weight overridden");
                }
            }
        }
        Ok(table)
    }

    /// Drop tensors the encoder never reads and normalize names to `model.*`.
    /// A name already carrying the prefix wins over its unprefixed twin.
    pub fn sanitize(&mut self) {
        let (prefixed, bare): (HashMap<_, _>, HashMap<_, _>) = std::mem::take(&mut self.tensors)
            .into_iter()
            .filter(|(name, _)| !name.contains("rotary_emb.inv_freq") && !name.starts_with("lm_head"))
            .partition(|(name, _)| name.starts_with(MODEL_PREFIX));
        self.tensors = prefixed;
        for (name, tensor) in bare {
            self.tensors.entry(format!("{MODEL_PREFIX}{name}")).or_insert(tensor);
        }
    }

    /// Replace every `<p>.weight` that has a `<p>.scales` companion with its
    /// dense dequantized form, removing the companions.
    pub fn dequantize_packed(&mut self, spec: &QuantizationSpec) -> Result<usize> {
        let mut prefixes: Vec<String> = self
            .tensors
            .keys()
            .filter_map(|k| k.strip_suffix(".scales").map(str::to_string))
            .collect();
        prefixes.sort_unstable();

        for prefix in &prefixes {
            let weight_key = format!("{prefix}.weight");
            let missing = |what: &str| Error::InvalidQuantization {
                name: weight_key.clone(),
                reason: format!("missing {what}"),
            };
            let packed = self.tensors.remove(&weight_key).ok_or_else(|| missing("packed weight"))?;
            let scales = self
                .tensors
                .remove(&format!("{prefix}.scales"))
                .ok_or_else(|| missing("scales"))?;
            let biases = self
                .tensors
                .remove(&format!("{prefix}.biases"))
                .ok_or_else(|| missing("biases"))?;
            let dense = dequantize(&QuantizedWeight { packed, scales, biases }, spec).map_err(|e| {
                Error::InvalidQuantization { name: weight_key.clone(), reason: e.to_string() }
            })?;
            self.tensors.insert(weight_key, dense);
        }
        if !prefixes.is_empty() {
            tracing::info!(count = prefixes.len(), bits = spec.bits, group_size = spec.group_size, "dequantized weights");
        }
        Ok(prefixes.len())
    }

    /// Quantize every 2-D `*.weight` whose row length divides into groups,
    /// except norms and embeddings. Produces the packed layout
    /// [`Self::dequantize_packed`] reads.
    pub fn quantize_linear(&mut self, spec: &QuantizationSpec) -> Result<usize> {
        spec.validate()?;
        let mut names: Vec<String> = self
            .tensors
            .iter()
            .filter(|(name, t)| {
                name.ends_with("_proj.weight")
                    && t.dims2().is_ok_and(|(_, cols)| cols % spec.group_size == 0)
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();

        for name in &names {
            let Some(prefix) = name.strip_suffix(".weight") else { continue };
            let Some(weight) = self.tensors.get(name) else { continue };
            let q = quantize(weight, spec)?;
            self.tensors.insert(name.clone(), q.packed);
            self.tensors.insert(format!("{prefix}.scales"), q.scales);
            self.tensors.insert(format!("{prefix}.biases"), q.biases);
        }
        Ok(names.len())
    }

    /// Fail with [`Error::MissingWeight`] on the first absent parameter.
    pub fn validate(&self, cfg: &ModelConfig) -> Result<(), Error> {
        match required_keys(cfg).into_iter().find(|k| !self.contains(k)) {
            Some(name) => Err(Error::MissingWeight(name)),
            None => Ok(()),
        }
    }

    pub fn into_var_builder(self, dtype: DType, device: &Device) -> VarBuilder<'static> {
        VarBuilder::from_tensors(self.tensors, dtype, device)
    }
}

/// Weight shard files directly inside `dir`, sorted by file name.
pub fn shard_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::NotFound(format!("model directory {}", dir.display())).into());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SHARD_EXTENSIONS.contains(&e))
        })
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(Error::NotFound(format!("no weight shards in {}", dir.display())).into());
    }
    Ok(files)
}

fn read_shard(path: &Path, device: &Device) -> Result<Vec<(String, Tensor)>> {
    let is_safetensors = path.extension().is_some_and(|e| e == "safetensors");
    if is_safetensors {
        let tensors = candle_core::safetensors::load(path, device)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(tensors.into_iter().collect())
    } else {
        let tensors = candle_core::pickle::read_all(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        tensors
            .into_iter()
            .map(|(name, t)| Ok((name, t.to_device(device)?)))
            .collect()
    }
}

/// Every parameter the encoder reads for `cfg.num_hidden_layers` blocks.
pub fn required_keys(cfg: &ModelConfig) -> Vec<String> {
    const PER_LAYER: &[&str] = &[
        "input_layernorm.weight",
        "post_attention_layernorm.weight",
        "self_attn.q_proj.weight",
        "self_attn.k_proj.weight",
        "self_attn.v_proj.weight",
        "self_attn.o_proj.weight",
        "self_attn.q_norm.weight",
        "self_attn.k_norm.weight",
        "mlp.gate_proj.weight",
        "mlp.up_proj.weight",
        "mlp.down_proj.weight",
    ];
    let mut keys = vec!["model.embed_tokens.weight".to_string(), "model.norm.weight".to_string()];
    for layer in 0..cfg.num_hidden_layers {
        keys.extend(PER_LAYER.iter().map(|p| format!("model.layers.{layer}.{p}")));
    }
    keys
}

/// Full load sequence for a model directory: read shards, sanitize, expand
/// quantized weights, validate.
pub fn load_model_weights(dir: &Path, cfg: &ModelConfig, device: &Device) -> Result<WeightTable> {
    let mut table = WeightTable::load_dir(dir, device)?;
    table.sanitize();

    let has_packed = table.tensors.keys().any(|k| k.ends_with(".scales"));
    match (&cfg.quantization, has_packed) {
        (Some(spec), _) => {
            table.dequantize_packed(spec)?;
        }
        (None, true) => {
            return Err(Error::InvalidQuantization {
                name: "<model>".into(),
                reason: "packed weights present but config.json has no quantization".into(),
            }
            .into())
        }
        (None, false) => {}
    }

    table.validate(cfg)?;
    tracing::info!(tensors = table.len(), dir = %dir.display(), "model weights loaded");
    Ok(table)
}
