#![allow(dead_code)]

use candle_core::{Device, Tensor};
use std::fs;
use std::path::Path;

use recipedb_embed::{ModelConfig, WeightTable};

pub const VOCAB: &[&str] = &["<|endoftext|>", "<unk>", "chocolate", "cake", "tomato", "soup", "quick", "bread"];

pub fn tiny_config_json() -> serde_json::Value {
    serde_json::json!({
        "model_type": "qwen3",
        "hidden_size": 16,
        "intermediate_size": 32,
        "num_hidden_layers": 2,
        "num_attention_heads": 4,
        "num_key_value_heads": 2,
        "head_dim": 4,
        "rms_norm_eps": 1e-6,
        "vocab_size": 32,
        "rope_theta": 10000.0,
        "max_position_embeddings": 64
    })
}

pub fn tiny_config() -> ModelConfig {
    ModelConfig::from_json(&tiny_config_json().to_string()).expect("config")
}

fn randn(shape: (usize, usize)) -> Tensor {
    Tensor::randn(0f32, 0.3, shape, &Device::Cpu).expect("randn")
}

/// Random parameters for every tensor the encoder reads, named without the
/// `model.` prefix the way embedding checkpoints ship them.
pub fn random_table(cfg: &ModelConfig) -> WeightTable {
    let (h, i, d) = (cfg.hidden_size, cfg.intermediate_size, cfg.head_dim);
    let (heads, kv) = (cfg.num_attention_heads, cfg.num_key_value_heads);
    let ones = |n: usize| Tensor::ones(n, candle_core::DType::F32, &Device::Cpu).expect("ones");
    // Uneven per-dimension gains so the order of QK-norm and RoPE matters.
    let ramp = |n: usize, step: f64| {
        Tensor::arange(0f32, n as f32, &Device::Cpu).and_then(|t| t.affine(step, 0.5)).expect("ramp")
    };

    let mut table = WeightTable::default();
    table.insert("embed_tokens.weight", randn((cfg.vocab_size, h)));
    table.insert("norm.weight", ones(h));
    for l in 0..cfg.num_hidden_layers {
        let p = format!("layers.{l}");
        table.insert(format!("{p}.input_layernorm.weight"), ones(h));
        table.insert(format!("{p}.post_attention_layernorm.weight"), ones(h));
        table.insert(format!("{p}.self_attn.q_proj.weight"), randn((heads * d, h)));
        table.insert(format!("{p}.self_attn.k_proj.weight"), randn((kv * d, h)));
        table.insert(format!("{p}.self_attn.v_proj.weight"), randn((kv * d, h)));
        table.insert(format!("{p}.self_attn.o_proj.weight"), randn((h, heads * d)));
        table.insert(format!("{p}.self_attn.q_norm.weight"), ramp(d, 0.5));
        table.insert(format!("{p}.self_attn.k_norm.weight"), ramp(d, 0.25));
        table.insert(format!("{p}.mlp.gate_proj.weight"), randn((i, h)));
        table.insert(format!("{p}.mlp.up_proj.weight"), randn((i, h)));
        table.insert(format!("{p}.mlp.down_proj.weight"), randn((h, i)));
    }
    table
}

pub fn write_config(dir: &Path, config: &serde_json::Value) {
    fs::write(dir.join("config.json"), config.to_string()).expect("write config");
}

pub fn write_shard(dir: &Path, name: &str, table: &WeightTable) {
    candle_core::safetensors::save(&table.clone().into_map(), dir.join(name)).expect("write shard");
}

/// Whitespace word-level tokenizer over [`VOCAB`].
pub fn write_tokenizer(dir: &Path) {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(i, w)| ((*w).to_string(), serde_json::Value::from(i)))
        .collect();
    let tokenizer = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
    });
    fs::write(dir.join("tokenizer.json"), tokenizer.to_string()).expect("write tokenizer");
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < tol, "{x} vs {y}");
    }
}
