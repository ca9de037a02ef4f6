use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// Truncate to `max_len` and make sure the sequence ends in `eos`.
///
/// A truncated sequence has its last kept token replaced by `eos`, so the
/// pooled position is always the end-of-text marker.
pub fn ensure_eos(mut ids: Vec<u32>, max_len: usize, eos: u32) -> Vec<u32> {
    if ids.len() >= max_len {
        ids.truncate(max_len.saturating_sub(1));
    }
    if ids.last() != Some(&eos) {
        ids.push(eos);
    }
    ids
}

/// Right-pad to the longest sequence. Returns `(input_ids, attention_mask)`,
/// both `[B,T]` `u32`.
pub fn pad_batch(seqs: &[Vec<u32>], pad_id: u32, device: &Device) -> Result<(Tensor, Tensor)> {
    let batch = seqs.len();
    let width = seqs.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let mut ids = Vec::with_capacity(batch * width);
    let mut mask = Vec::with_capacity(batch * width);
    for seq in seqs {
        ids.extend_from_slice(seq);
        mask.extend(std::iter::repeat(1u32).take(seq.len()));
        let pad = width - seq.len();
        ids.extend(std::iter::repeat(pad_id).take(pad));
        mask.extend(std::iter::repeat(0u32).take(pad));
    }
    let input_ids = Tensor::from_vec(ids, (batch, width), device)?;
    let attention_mask = Tensor::from_vec(mask, (batch, width), device)?;
    Ok((input_ids, attention_mask))
}

pub fn tokenize_batch_on_device(
    tokenizer: &Tokenizer,
    texts: &[String],
    max_len: usize,
    eos: u32,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let seqs = texts
        .iter()
        .map(|text| {
            let enc = tokenizer
                .encode(text.as_str(), true)
                .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
            Ok(ensure_eos(enc.get_ids().to_vec(), max_len, eos))
        })
        .collect::<Result<Vec<_>>>()?;
    pad_batch(&seqs, eos, device)
}
