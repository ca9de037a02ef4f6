use anyhow::Result;
use candle_core::{Device, Tensor};
use std::cmp::Ordering;

use recipedb_core::error::Error;
use recipedb_core::types::RecordId;
use recipedb_embed::pool::l2_normalize;

use crate::store::EmbeddingMatrix;

/// Immutable `[n, dim]` matrix of unit rows plus the record id of each row.
///
/// Queries score every row with one matrix-vector product. Ranking is by
/// score descending, ties broken by ascending row index, so [`top_k`] is
/// always a prefix of [`rank_all`].
///
/// [`top_k`]: VectorIndex::top_k
/// [`rank_all`]: VectorIndex::rank_all
#[derive(Debug, Clone)]
pub struct VectorIndex {
    matrix: Tensor,
    ids: Vec<RecordId>,
    dim: usize,
}

impl VectorIndex {
    pub fn from_matrix(matrix: &EmbeddingMatrix, ids: Vec<RecordId>, device: &Device) -> Result<Self> {
        if ids.len() != matrix.count {
            return Err(Error::InputMismatch(format!(
                "{} record ids for {} embedding rows",
                ids.len(),
                matrix.count
            ))
            .into());
        }
        let rows = Tensor::from_slice(&matrix.data, (matrix.count, matrix.dim), device)?;
        let matrix_t = if matrix.count == 0 { rows } else { l2_normalize(&rows)? };
        tracing::debug!(rows = matrix.count, dim = matrix.dim, "vector index built");
        Ok(Self { matrix: matrix_t, ids, dim: matrix.dim })
    }

    pub fn from_rows(rows: Vec<Vec<f32>>, ids: Vec<RecordId>) -> Result<Self> {
        Self::from_matrix(&EmbeddingMatrix::from_rows(rows)?, ids, &Device::Cpu)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn record_id(&self, index: usize) -> Option<&RecordId> {
        self.ids.get(index)
    }

    /// Cosine score of every row against `query`, in row order.
    pub fn scores(&self, query: &[f32]) -> Result<Vec<f32>> {
        if query.len() != self.dim {
            return Err(Error::InputMismatch(format!(
                "query has dim {}, index has dim {}",
                query.len(),
                self.dim
            ))
            .into());
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let q = Tensor::from_slice(query, (1, self.dim), self.matrix.device())?;
        let q = l2_normalize(&q)?.reshape((self.dim, 1))?;
        Ok(self.matrix.matmul(&q)?.flatten_all()?.to_vec1::<f32>()?)
    }

    /// All rows, best first.
    pub fn rank_all(&self, query: &[f32]) -> Result<Vec<(usize, f32)>> {
        let mut scored: Vec<(usize, f32)> = self.scores(query)?.into_iter().enumerate().collect();
        scored.sort_by(rank_order);
        Ok(scored)
    }

    /// The best `min(k, n)` rows; identical to `rank_all(query)[..k]`.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        let mut scored: Vec<(usize, f32)> = self.scores(query)?.into_iter().enumerate().collect();
        if k == 0 {
            return Ok(Vec::new());
        }
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank_order);
            scored.truncate(k);
        }
        scored.sort_by(rank_order);
        Ok(scored)
    }
}

fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}
