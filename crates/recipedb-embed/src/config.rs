//! `config.json` of a Qwen3-style embedding model.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use recipedb_core::error::Error;

use crate::quant::QuantizationSpec;

pub const SUPPORTED_ARCHITECTURES: &[&str] = &["qwen3"];

/// Rotary scaling as declared in `rope_scaling`. Only `linear` changes the
/// rotation; other kinds are accepted and ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct RopeScaling {
    pub kind: String,
    pub factor: f64,
}

impl RopeScaling {
    /// Factor dividing the position index, if this scaling applies to RoPE.
    pub fn linear_factor(&self) -> Option<f64> {
        (self.kind == "linear").then_some(self.factor)
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_type: String,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub head_dim: usize,
    pub rms_norm_eps: f64,
    pub vocab_size: usize,
    pub rope_theta: f64,
    pub rope_scaling: Option<RopeScaling>,
    pub max_position_embeddings: usize,
    pub eos_token_id: Option<u32>,
    pub quantization: Option<QuantizationSpec>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    model_type: Option<String>,
    hidden_size: usize,
    intermediate_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    #[serde(default)]
    num_key_value_heads: Option<usize>,
    #[serde(default)]
    head_dim: Option<usize>,
    #[serde(default = "default_rms_norm_eps")]
    rms_norm_eps: f64,
    vocab_size: usize,
    #[serde(default = "default_rope_theta")]
    rope_theta: f64,
    #[serde(default)]
    rope_scaling: Option<Value>,
    #[serde(default = "default_max_position_embeddings")]
    max_position_embeddings: usize,
    #[serde(default)]
    eos_token_id: Option<Value>,
    #[serde(default)]
    quantization: Option<QuantizationSpec>,
}

fn default_rms_norm_eps() -> f64 { 1e-6 }
fn default_rope_theta() -> f64 { 1_000_000.0 }
fn default_max_position_embeddings() -> usize { 32_768 }

impl ModelConfig {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join("config.json");
        if !path.is_file() {
            return Err(Error::NotFound(format!("model config {}", path.display())).into());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid model config {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("config.json: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let model_type = raw.model_type.unwrap_or_default();
        if !SUPPORTED_ARCHITECTURES.contains(&model_type.as_str()) {
            return Err(Error::UnsupportedArchitecture(model_type).into());
        }
        if raw.num_attention_heads == 0 || raw.hidden_size == 0 || raw.num_hidden_layers == 0 {
            return Err(Error::InvalidConfig("hidden size, layer and head counts must be positive".into()).into());
        }
        let num_key_value_heads = raw.num_key_value_heads.unwrap_or(raw.num_attention_heads);
        if num_key_value_heads == 0 || raw.num_attention_heads % num_key_value_heads != 0 {
            return Err(Error::InvalidConfig(format!(
                "num_attention_heads ({}) must be a multiple of num_key_value_heads ({})",
                raw.num_attention_heads, num_key_value_heads
            ))
            .into());
        }
        let head_dim = raw.head_dim.unwrap_or(raw.hidden_size / raw.num_attention_heads);
        if head_dim == 0 || head_dim % 2 != 0 {
            return Err(Error::InvalidConfig(format!("head_dim must be even and positive, got {head_dim}")).into());
        }
        if let Some(spec) = &raw.quantization {
            spec.validate()?;
        }

        Ok(Self {
            model_type,
            hidden_size: raw.hidden_size,
            intermediate_size: raw.intermediate_size,
            num_hidden_layers: raw.num_hidden_layers,
            num_attention_heads: raw.num_attention_heads,
            num_key_value_heads,
            head_dim,
            rms_norm_eps: raw.rms_norm_eps,
            vocab_size: raw.vocab_size,
            rope_theta: raw.rope_theta,
            rope_scaling: raw.rope_scaling.as_ref().map(parse_rope_scaling).transpose()?,
            max_position_embeddings: raw.max_position_embeddings,
            eos_token_id: raw.eos_token_id.as_ref().and_then(first_token_id),
            quantization: raw.quantization,
        })
    }

    /// Query heads served by each key/value head.
    pub fn gqa_group_size(&self) -> usize {
        self.num_attention_heads / self.num_key_value_heads
    }
}

fn parse_rope_scaling(value: &Value) -> Result<RopeScaling> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidConfig("rope_scaling must be an object".into()))?;
    let kind = obj
        .get("type")
        .or_else(|| obj.get("rope_type"))
        .and_then(Value::as_str)
        .unwrap_or("linear")
        .to_string();
    let factor = match obj.get("factor") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| Error::InvalidConfig("rope_scaling.factor is not representable".into()))?,
        Some(other) => {
            return Err(Error::InvalidConfig(format!("rope_scaling.factor must be a number, got {other}")).into())
        }
        None => return Err(Error::InvalidConfig("rope_scaling.factor is missing".into()).into()),
    };
    if !factor.is_finite() || factor <= 0.0 {
        return Err(Error::InvalidConfig(format!("rope_scaling.factor must be finite and positive, got {factor}")).into());
    }
    Ok(RopeScaling { kind, factor })
}

fn first_token_id(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::Array(items) => items.iter().find_map(first_token_id),
        _ => None,
    }
}
