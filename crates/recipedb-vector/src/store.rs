//! Corpus embeddings file.
//!
//! Layout, all little-endian: `i32 count`, `i32 dim`, then `count * dim`
//! `f32` values, row-major. Row `i` belongs to corpus record `i`.

use anyhow::{Context, Result};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use recipedb_core::error::Error;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    pub count: usize,
    pub dim: usize,
    pub data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Stack equal-length rows.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(Error::InputMismatch(format!("row {i} has dim {}, expected {dim}", row.len())).into());
        }
        let count = rows.len();
        Ok(Self { count, dim, data: rows.into_iter().flatten().collect() })
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        (i < self.count).then(|| &self.data[i * self.dim..(i + 1) * self.dim])
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim.max(1)).take(self.count)
    }
}

pub fn read_embeddings(path: &Path) -> Result<EmbeddingMatrix> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read embeddings {}", path.display()))?;
    let matrix = decode(&bytes).with_context(|| format!("Invalid embeddings file {}", path.display()))?;
    tracing::info!(count = matrix.count, dim = matrix.dim, path = %path.display(), "loaded embeddings");
    Ok(matrix)
}

fn decode(bytes: &[u8]) -> Result<EmbeddingMatrix, Error> {
    let malformed = |msg: String| Error::MalformedEmbeddings(msg);
    if bytes.len() < HEADER_LEN {
        return Err(malformed(format!("{} bytes is shorter than the header", bytes.len())));
    }
    let count = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let dim = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let (Ok(count), Ok(dim)) = (usize::try_from(count), usize::try_from(dim)) else {
        return Err(malformed(format!("negative header count={count} dim={dim}")));
    };
    if dim == 0 {
        return Err(malformed("dimension is zero".into()));
    }
    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(|| malformed(format!("header {count}x{dim} overflows")))?;
    if bytes.len() != expected {
        return Err(malformed(format!(
            "header says {count}x{dim} ({expected} bytes), file has {} bytes",
            bytes.len()
        )));
    }
    let data = bytes[HEADER_LEN..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(EmbeddingMatrix { count, dim, data })
}

pub fn write_embeddings(path: &Path, matrix: &EmbeddingMatrix) -> Result<()> {
    if matrix.data.len() != matrix.count * matrix.dim {
        return Err(Error::InputMismatch(format!(
            "{} values for a {}x{} matrix",
            matrix.data.len(),
            matrix.count,
            matrix.dim
        ))
        .into());
    }
    let too_large = || Error::InvalidConfig(format!("{}x{} does not fit the i32 header", matrix.count, matrix.dim));
    let count = i32::try_from(matrix.count).map_err(|_| too_large())?;
    let dim = i32::try_from(matrix.dim).map_err(|_| too_large())?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    out.write_all(&count.to_le_bytes())?;
    out.write_all(&dim.to_le_bytes())?;
    for v in &matrix.data {
        out.write_all(&v.to_le_bytes())?;
    }
    out.flush()?;
    tracing::info!(count = matrix.count, dim = matrix.dim, path = %path.display(), "wrote embeddings");
    Ok(())
}
