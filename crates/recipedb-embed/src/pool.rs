use anyhow::Result;
use candle_core::{DType, IndexOp, Tensor, D};

use recipedb_core::error::Error;

/// Floor applied to vector norms before dividing.
pub const NORM_EPS: f32 = 1e-9;

/// Index of the last real token per row: `max(sum(mask) - 1, 0)`.
pub fn last_token_positions(attention_mask: &Tensor) -> Result<Vec<usize>> {
    let sums = attention_mask.to_dtype(DType::F32)?.sum(1)?.to_vec1::<f32>()?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let positions = sums.into_iter().map(|s| (s.round() as usize).saturating_sub(1)).collect();
    Ok(positions)
}

/// Pick the hidden state `[B,T,H]` at each row's last real token, giving `[B,H]`.
pub fn last_token_pool(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, time, _hidden_dim) = hidden.dims3()?;
    let mask_dims = attention_mask.dims2()?;
    if mask_dims != (batch, time) {
        return Err(Error::InputMismatch(format!(
            "attention mask {mask_dims:?} does not match hidden states [{batch}, {time}]"
        ))
        .into());
    }
    let rows = last_token_positions(attention_mask)?
        .into_iter()
        .enumerate()
        .map(|(b, t)| hidden.i((b, t)))
        .collect::<candle_core::Result<Vec<_>>>()?;
    Ok(Tensor::stack(&rows, 0)?)
}

/// Row-wise L2 normalization of `[B,H]`; norms are floored at [`NORM_EPS`].
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let dtype = x.dtype();
    let x = x.to_dtype(DType::F32)?;
    let norm = x.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.maximum(NORM_EPS)?;
    Ok(x.broadcast_div(&norm)?.to_dtype(dtype)?)
}

pub fn last_token_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    l2_normalize(&last_token_pool(hidden, attention_mask)?)
}
