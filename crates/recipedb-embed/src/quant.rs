//! Group-wise affine quantization of 2-D weight matrices.
//!
//! Every run of `group_size` consecutive values along a row shares one
//! `scale` and `bias`; each value is stored as a `bits`-wide level `q` with
//! `w ≈ scale * q + bias`. Levels are packed into `u32` words, the first
//! column in the lowest bits. Packed weights are `[rows, cols * bits / 32]`,
//! scales and biases `[rows, cols / group_size]`.

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use recipedb_core::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationSpec {
    pub group_size: usize,
    pub bits: u32,
}

impl QuantizationSpec {
    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.bits, 2 | 4 | 8) {
            return Err(Error::InvalidConfig(format!("unsupported quantization bits {}", self.bits)));
        }
        if self.group_size == 0 || self.group_size % self.values_per_word() != 0 {
            return Err(Error::InvalidConfig(format!(
                "quantization group_size {} must be a positive multiple of {}",
                self.group_size,
                self.values_per_word()
            )));
        }
        Ok(())
    }

    pub fn values_per_word(&self) -> usize {
        (32 / self.bits) as usize
    }

    fn max_level(&self) -> u32 {
        (1u32 << self.bits) - 1
    }
}

#[derive(Debug, Clone)]
pub struct QuantizedWeight {
    pub packed: Tensor,
    pub scales: Tensor,
    pub biases: Tensor,
}

/// Quantize a `[rows, cols]` matrix. `cols` must be a multiple of the group size.
pub fn quantize(weight: &Tensor, spec: &QuantizationSpec) -> anyhow::Result<QuantizedWeight> {
    spec.validate()?;
    let (rows, cols) = weight.dims2()?;
    if cols % spec.group_size != 0 {
        return Err(Error::InvalidQuantization {
            name: "<weight>".into(),
            reason: format!("{cols} columns are not divisible by group size {}", spec.group_size),
        }
        .into());
    }
    let device = weight.device();
    let values = weight.to_dtype(DType::F32)?.to_device(&Device::Cpu)?.to_vec2::<f32>()?;

    let per_word = spec.values_per_word();
    let groups = cols / spec.group_size;
    let words = cols / per_word;
    #[allow(clippy::cast_precision_loss)]
    let max_level = spec.max_level() as f32;

    let mut packed = vec![0u32; rows * words];
    let mut scales = Vec::with_capacity(rows * groups);
    let mut biases = Vec::with_capacity(rows * groups);

    for (r, row) in values.iter().enumerate() {
        for group in row.chunks(spec.group_size) {
            let (lo, hi) = group
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            let range = hi - lo;
            let scale = if range > 0.0 { range / max_level } else { 1.0 };
            scales.push(scale);
            biases.push(lo);
        }
        for (c, &v) in row.iter().enumerate() {
            let g = r * groups + c / spec.group_size;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let level = ((v - biases[g]) / scales[g]).round().clamp(0.0, max_level) as u32;
            let shift = (c % per_word) as u32 * spec.bits;
            packed[r * words + c / per_word] |= level << shift;
        }
    }

    Ok(QuantizedWeight {
        packed: Tensor::from_vec(packed, (rows, words), device)?,
        scales: Tensor::from_vec(scales, (rows, groups), device)?,
        biases: Tensor::from_vec(biases, (rows, groups), device)?,
    })
}

/// Expand packed levels back into a dense `f32` matrix.
pub fn dequantize(q: &QuantizedWeight, spec: &QuantizationSpec) -> anyhow::Result<Tensor> {
    spec.validate()?;
    let device = q.packed.device();
    let (rows, words) = q.packed.dims2()?;
    let per_word = spec.values_per_word();
    let cols = words * per_word;
    let groups = cols / spec.group_size;

    let invalid = |reason: String| Error::InvalidQuantization { name: "<weight>".into(), reason };
    if cols % spec.group_size != 0 {
        return Err(invalid(format!("{cols} columns are not divisible by group size {}", spec.group_size)).into());
    }
    if q.scales.dims2()? != (rows, groups) || q.biases.dims2()? != (rows, groups) {
        return Err(invalid(format!(
            "scales {:?} / biases {:?} do not match {rows}x{groups} groups",
            q.scales.dims(),
            q.biases.dims()
        ))
        .into());
    }

    let packed = q.packed.to_dtype(DType::U32)?.to_device(&Device::Cpu)?.to_vec2::<u32>()?;
    let scales = q.scales.to_dtype(DType::F32)?.to_device(&Device::Cpu)?.to_vec2::<f32>()?;
    let biases = q.biases.to_dtype(DType::F32)?.to_device(&Device::Cpu)?.to_vec2::<f32>()?;
    let mask = spec.max_level();

    let mut out = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            let shift = (c % per_word) as u32 * spec.bits;
            let level = (packed[r][c / per_word] >> shift) & mask;
            let g = c / spec.group_size;
            #[allow(clippy::cast_precision_loss)]
            let value = scales[r][g] * level as f32 + biases[r][g];
            out.push(value);
        }
    }
    Ok(Tensor::from_vec(out, (rows, cols), device)?)
}
