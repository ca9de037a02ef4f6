use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

use recipedb_core::corpus::Recipe;
use recipedb_core::error::Error;
use recipedb_core::traits::Embedder;

use crate::store::EmbeddingMatrix;

/// Embed every recipe's search text, in corpus order.
pub fn embed_corpus(
    embedder: &dyn Embedder,
    recipes: &[Recipe],
    batch_size: usize,
    show_progress: bool,
) -> Result<EmbeddingMatrix> {
    let texts: Vec<String> = recipes.iter().map(Recipe::search_text).collect();
    embed_texts(embedder, &texts, batch_size, show_progress)
}

pub fn embed_texts(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    show_progress: bool,
) -> Result<EmbeddingMatrix> {
    if batch_size == 0 {
        return Err(Error::InvalidConfig("batch size must be > 0".into()).into());
    }
    let start = Instant::now();
    let pb = if show_progress { ProgressBar::new(texts.len() as u64) } else { ProgressBar::hidden() };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} recipes ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );

    let dim = embedder.dim();
    let mut data = Vec::with_capacity(texts.len() * dim);
    for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
        let vectors = embedder.embed_batch(batch)?;
        if vectors.len() != batch.len() {
            return Err(Error::Operation(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            ))
            .into());
        }
        for v in vectors {
            if v.len() != dim {
                return Err(Error::InputMismatch(format!("embedding dim {} != {dim}", v.len())).into());
            }
            data.extend(v);
        }
        pb.inc(batch.len() as u64);
        pb.set_message(format!("batch {}", batch_no + 1));
    }
    pb.finish_with_message("done");

    tracing::info!(
        count = texts.len(),
        dim,
        elapsed_s = start.elapsed().as_secs_f32(),
        "embedded corpus"
    );
    Ok(EmbeddingMatrix { count: texts.len(), dim, data })
}
