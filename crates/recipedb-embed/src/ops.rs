//! Numeric building blocks of the encoder: RMSNorm, rotary embedding,
//! causal masking and grouped-query head expansion.

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::VarBuilder;

/// `x / sqrt(mean(x²) + eps) * weight` over the last dimension, computed in f32.
pub fn rms_norm(x: &Tensor, weight: &Tensor, eps: f64) -> Result<Tensor> {
    let dtype = x.dtype();
    let x = x.to_dtype(DType::F32)?;
    let mean_sq = x.sqr()?.mean_keepdim(D::Minus1)?;
    let normed = x.broadcast_div(&mean_sq.affine(1.0, eps)?.sqrt()?)?;
    normed.to_dtype(dtype)?.broadcast_mul(weight)
}

#[derive(Debug, Clone)]
pub struct RmsNorm {
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    pub fn new(weight: Tensor, eps: f64) -> Self {
        Self { weight, eps }
    }

    pub fn load(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self::new(vb.get(size, "weight")?, eps))
    }
}

impl Module for RmsNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        rms_norm(xs, &self.weight, self.eps)
    }
}

/// Rotary position embedding in the half-split layout: dimension `i` is
/// paired with `i + head_dim / 2`.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    inv_freq: Tensor,
    position_scale: f64,
    max_positions: usize,
}

impl RotaryEmbedding {
    /// `linear_factor` divides every position index, stretching the
    /// effective wavelength by that factor.
    pub fn new(
        head_dim: usize,
        base: f64,
        linear_factor: Option<f64>,
        max_positions: usize,
        device: &Device,
    ) -> Result<Self> {
        let half = head_dim / 2;
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let inv_freq: Vec<f32> = (0..half)
            .map(|i| (1.0 / base.powf((2 * i) as f64 / head_dim as f64)) as f32)
            .collect();
        Ok(Self {
            inv_freq: Tensor::from_vec(inv_freq, half, device)?,
            position_scale: linear_factor.map_or(1.0, |f| 1.0 / f),
            max_positions,
        })
    }

    /// `(cos, sin)` tables of shape `[seq, head_dim]` for positions
    /// `offset..offset + seq`.
    pub fn tables(&self, seq: usize, offset: usize) -> Result<(Tensor, Tensor)> {
        if offset + seq > self.max_positions {
            candle_core::bail!(
                "positions {}..{} exceed max_position_embeddings {}",
                offset,
                offset + seq,
                self.max_positions
            );
        }
        let device = self.inv_freq.device();
        #[allow(clippy::cast_precision_loss)]
        let positions = Tensor::arange(offset as f32, (offset + seq) as f32, device)?
            .affine(self.position_scale, 0.0)?
            .unsqueeze(1)?;
        let freqs = positions.broadcast_mul(&self.inv_freq.unsqueeze(0)?)?;
        let freqs = Tensor::cat(&[&freqs, &freqs], D::Minus1)?;
        Ok((freqs.cos()?, freqs.sin()?))
    }

    /// Rotate `x` of shape `[batch, heads, seq, head_dim]`.
    pub fn apply(&self, x: &Tensor, offset: usize) -> Result<Tensor> {
        let (_b, _h, seq, head_dim) = x.dims4()?;
        let (cos, sin) = self.tables(seq, offset)?;
        let cos = cos.to_dtype(x.dtype())?;
        let sin = sin.to_dtype(x.dtype())?;
        let half = head_dim / 2;
        let x1 = x.narrow(D::Minus1, 0, half)?;
        let x2 = x.narrow(D::Minus1, half, half)?;
        let rotated = Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)?;
        x.broadcast_mul(&cos)? + rotated.broadcast_mul(&sin)?
    }
}

/// Additive mask `[seq, offset + seq]`: 0 where key position `j` is not in
/// the future of query position `i`, `-inf` otherwise.
pub fn causal_mask(seq: usize, offset: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let total = offset + seq;
    let mask: Vec<f32> = (0..seq)
        .flat_map(|i| (0..total).map(move |j| if j > i + offset { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (seq, total), device)?.to_dtype(dtype)
}

/// Repeat each key/value head `n_rep` times, block-contiguous:
/// heads `[A, B]` with `n_rep = 2` become `[A, A, B, B]`.
pub fn repeat_kv(x: Tensor, n_rep: usize) -> Result<Tensor> {
    candle_transformers::utils::repeat_kv(x, n_rep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_norm_matches_hand_computation() {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[3.0f32, 4.0]], &dev).unwrap();
        let w = Tensor::new(&[1.0f32, 2.0], &dev).unwrap();
        let out = rms_norm(&x, &w, 0.0).unwrap().to_vec2::<f32>().unwrap();
        let rms = (12.5f32).sqrt();
        assert!((out[0][0] - 3.0 / rms).abs() < 1e-6);
        assert!((out[0][1] - 8.0 / rms).abs() < 1e-6);
    }

    #[test]
    fn rope_at_position_zero_is_identity() {
        let dev = Device::Cpu;
        let rope = RotaryEmbedding::new(4, 10_000.0, None, 16, &dev).unwrap();
        let x = Tensor::new(&[1.0f32, 2.0, 3.0, 4.0], &dev).unwrap().reshape((1, 1, 1, 4)).unwrap();
        let out = rope.apply(&x, 0).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (a, b) in out.iter().zip([1.0f32, 2.0, 3.0, 4.0]) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn rope_rotates_pairs_by_position() {
        let dev = Device::Cpu;
        // head_dim 2: a single pair (x0, x1) rotated by angle = position
        let rope = RotaryEmbedding::new(2, 10_000.0, None, 16, &dev).unwrap();
        let x = Tensor::new(&[1.0f32, 0.0], &dev).unwrap().reshape((1, 1, 1, 2)).unwrap();
        let out = rope.apply(&x, 1).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!((out[0] - 1.0f32.cos()).abs() < 1e-6);
        assert!((out[1] - 1.0f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn linear_scaling_divides_positions() {
        let dev = Device::Cpu;
        let plain = RotaryEmbedding::new(2, 10_000.0, None, 16, &dev).unwrap();
        let scaled = RotaryEmbedding::new(2, 10_000.0, Some(2.0), 16, &dev).unwrap();
        let (cos_plain, _) = plain.tables(1, 1).unwrap();
        let (cos_scaled, _) = scaled.tables(1, 2).unwrap();
        let a = cos_plain.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = cos_scaled.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!((a[0] - b[0]).abs() < 1e-6, "position 2 at factor 2 equals position 1");
    }

    #[test]
    fn rope_rejects_positions_past_max() {
        let rope = RotaryEmbedding::new(4, 10_000.0, None, 4, &Device::Cpu).unwrap();
        assert!(rope.tables(3, 2).is_err());
    }

    #[test]
    fn causal_mask_blocks_future_positions() {
        let m = causal_mask(2, 1, DType::F32, &Device::Cpu).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(m[0][0], 0.0);
        assert_eq!(m[0][1], 0.0);
        assert!(m[0][2].is_infinite());
        assert_eq!(m[1][2], 0.0);
    }

    #[test]
    fn repeat_kv_is_block_contiguous() {
        let dev = Device::Cpu;
        // [batch=1, kv_heads=2, seq=1, head_dim=1] holding heads A=1, B=2
        let kv = Tensor::new(&[1.0f32, 2.0], &dev).unwrap().reshape((1, 2, 1, 1)).unwrap();
        let out = repeat_kv(kv, 2).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(out, vec![1.0, 1.0, 2.0, 2.0]);
    }
}
