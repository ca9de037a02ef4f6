//! Qwen3 decoder stack used as a text encoder.
//!
//! Each block is pre-norm attention with per-head QK RMSNorm applied before
//! the rotary embedding, grouped-query attention, and a SwiGLU feed-forward.
//! The encoder returns the last real token's final hidden state, L2
//! normalized.

use anyhow::Result;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, linear_no_bias, Embedding, Linear, VarBuilder};

use recipedb_core::error::Error;

use crate::config::ModelConfig;
use crate::ops::{causal_mask, repeat_kv, RmsNorm, RotaryEmbedding};
use crate::pool;

/// Keys and values already seen, per layer. Owned by the caller and passed
/// into each forward call; the encoder itself is stateless.
#[derive(Debug, Clone, Default)]
pub struct KvCache {
    layers: Vec<Option<(Tensor, Tensor)>>,
}

impl KvCache {
    pub fn new(num_layers: usize) -> Self {
        Self { layers: vec![None; num_layers] }
    }

    /// Number of positions already cached.
    pub fn offset(&self) -> usize {
        self.layers
            .first()
            .and_then(Option::as_ref)
            .and_then(|(k, _)| k.dim(2).ok())
            .unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.layers.iter_mut().for_each(|slot| *slot = None);
    }
}

#[derive(Debug, Clone)]
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    q_norm: RmsNorm,
    k_norm: RmsNorm,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let (h, heads, kv_heads, d) =
            (cfg.hidden_size, cfg.num_attention_heads, cfg.num_key_value_heads, cfg.head_dim);
        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / (d as f64).sqrt();
        Ok(Self {
            q_proj: linear_no_bias(h, heads * d, vb.pp("q_proj"))?,
            k_proj: linear_no_bias(h, kv_heads * d, vb.pp("k_proj"))?,
            v_proj: linear_no_bias(h, kv_heads * d, vb.pp("v_proj"))?,
            o_proj: linear_no_bias(heads * d, h, vb.pp("o_proj"))?,
            q_norm: RmsNorm::load(d, cfg.rms_norm_eps, vb.pp("q_norm"))?,
            k_norm: RmsNorm::load(d, cfg.rms_norm_eps, vb.pp("k_norm"))?,
            num_heads: heads,
            num_kv_heads: kv_heads,
            head_dim: d,
            scale,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        rope: &RotaryEmbedding,
        mask: Option<&Tensor>,
        cache: Option<&mut Option<(Tensor, Tensor)>>,
    ) -> candle_core::Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        let split = |proj: &Linear, heads: usize| -> candle_core::Result<Tensor> {
            proj.forward(x)?
                .reshape((b, t, heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = self.q_norm.forward(&split(&self.q_proj, self.num_heads)?)?;
        let k = self.k_norm.forward(&split(&self.k_proj, self.num_kv_heads)?)?;
        let v = split(&self.v_proj, self.num_kv_heads)?;

        let offset = match cache.as_deref() {
            Some(Some((k_prev, _))) => k_prev.dim(2)?,
            _ => 0,
        };
        let q = rope.apply(&q, offset)?;
        let k = rope.apply(&k, offset)?;

        let (k, v) = match cache {
            Some(slot) => {
                let (k, v) = match slot.take() {
                    Some((k_prev, v_prev)) => {
                        (Tensor::cat(&[&k_prev, &k], 2)?, Tensor::cat(&[&v_prev, &v], 2)?)
                    }
                    None => (k, v),
                };
                *slot = Some((k.clone(), v.clone()));
                (k, v)
            }
            None => (k, v),
        };

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, n_rep)?.contiguous()?;
        let v = repeat_kv(v, n_rep)?.contiguous()?;

        let scores = (q.matmul(&k.transpose(2, 3)?)? * self.scale)?;
        let scores = match mask {
            Some(m) => scores.broadcast_add(m)?,
            None => scores,
        };
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, t, self.num_heads * self.head_dim))?
            .apply(&self.o_proj)
    }
}

#[derive(Debug, Clone)]
struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl Mlp {
    fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let (h, i) = (cfg.hidden_size, cfg.intermediate_size);
        Ok(Self {
            gate_proj: linear_no_bias(h, i, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(h, i, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(i, h, vb.pp("down_proj"))?,
        })
    }
}

impl Module for Mlp {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        (gate * self.up_proj.forward(x)?)?.apply(&self.down_proj)
    }
}

#[derive(Debug, Clone)]
struct DecoderLayer {
    input_layernorm: RmsNorm,
    self_attn: Attention,
    post_attention_layernorm: RmsNorm,
    mlp: Mlp,
}

impl DecoderLayer {
    fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            input_layernorm: RmsNorm::load(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("input_layernorm"))?,
            self_attn: Attention::load(cfg, vb.pp("self_attn"))?,
            post_attention_layernorm: RmsNorm::load(
                cfg.hidden_size,
                cfg.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
            mlp: Mlp::load(cfg, vb.pp("mlp"))?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        rope: &RotaryEmbedding,
        mask: Option<&Tensor>,
        cache: Option<&mut Option<(Tensor, Tensor)>>,
    ) -> candle_core::Result<Tensor> {
        let attn = self.self_attn.forward(&self.input_layernorm.forward(x)?, rope, mask, cache)?;
        let x = (x + attn)?;
        let ff = self.mlp.forward(&self.post_attention_layernorm.forward(&x)?)?;
        x + ff
    }
}

#[derive(Debug, Clone)]
pub struct Qwen3Encoder {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    rope: RotaryEmbedding,
    hidden_size: usize,
    max_positions: usize,
    dtype: DType,
    device: Device,
}

impl Qwen3Encoder {
    /// Build from a `VarBuilder` rooted above the `model.` prefix.
    pub fn load(vb: VarBuilder, cfg: &ModelConfig) -> Result<Self> {
        let device = vb.device().clone();
        let dtype = vb.dtype();
        let vb = vb.pp("model");
        let embed_tokens = embedding(cfg.vocab_size, cfg.hidden_size, vb.pp("embed_tokens"))?;
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| DecoderLayer::load(cfg, vb.pp("layers").pp(i)))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let norm = RmsNorm::load(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("norm"))?;
        let rope = RotaryEmbedding::new(
            cfg.head_dim,
            cfg.rope_theta,
            cfg.rope_scaling.as_ref().and_then(|s| s.linear_factor()),
            cfg.max_position_embeddings,
            &device,
        )?;
        Ok(Self {
            embed_tokens,
            layers,
            norm,
            rope,
            hidden_size: cfg.hidden_size,
            max_positions: cfg.max_position_embeddings,
            dtype,
            device,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn new_cache(&self) -> KvCache {
        KvCache::new(self.layers.len())
    }

    /// Final-normed hidden states `[B,T,H]` for `input_ids [B,T]`.
    pub fn hidden_states(&self, input_ids: &Tensor, cache: Option<&mut KvCache>) -> Result<Tensor> {
        let (_b, t) = input_ids.dims2()?;
        let offset = cache.as_deref().map_or(0, KvCache::offset);
        if let Some(c) = cache.as_deref() {
            if c.layers.len() != self.layers.len() {
                return Err(Error::InputMismatch(format!(
                    "cache has {} layers, model has {}",
                    c.layers.len(),
                    self.layers.len()
                ))
                .into());
            }
        }
        if offset + t > self.max_positions {
            return Err(Error::InputMismatch(format!(
                "sequence end {} exceeds max_position_embeddings {}",
                offset + t,
                self.max_positions
            ))
            .into());
        }

        let mask = if t > 1 { Some(causal_mask(t, offset, self.dtype, &self.device)?) } else { None };
        let mut x = self.embed_tokens.forward(input_ids)?;
        match cache {
            Some(cache) => {
                for (layer, slot) in self.layers.iter().zip(cache.layers.iter_mut()) {
                    x = layer.forward(&x, &self.rope, mask.as_ref(), Some(slot))?;
                }
            }
            None => {
                for layer in &self.layers {
                    x = layer.forward(&x, &self.rope, mask.as_ref(), None)?;
                }
            }
        }
        Ok(self.norm.forward(&x)?)
    }

    /// Pooled, unit-norm embeddings `[B,H]` (f32).
    ///
    /// `attention_mask` must have the same shape as `input_ids`; this is
    /// checked before any compute.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, cache: Option<&mut KvCache>) -> Result<Tensor> {
        if input_ids.dims() != attention_mask.dims() {
            return Err(Error::InputMismatch(format!(
                "attention mask {:?} does not match input ids {:?}",
                attention_mask.dims(),
                input_ids.dims()
            ))
            .into());
        }
        let hidden = self.hidden_states(input_ids, cache)?;
        let pooled = pool::last_token_l2(&hidden, attention_mask)?;
        Ok(pooled.to_dtype(DType::F32)?.contiguous()?)
    }
}
