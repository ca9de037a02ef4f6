use std::future::Future;

use crate::cancel::Ticket;
use crate::types::{SearchMode, SearchResult};

/// Turns texts into L2-normalized vectors of a fixed dimension.
///
/// Implementations are loaded once and shared; callers that need
/// serialized access wrap them in a worker (see `recipedb_embed::worker`).
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Produces the full ranked list for one query in one mode.
///
/// Work must give up with `Error::Cancelled` once `ticket` goes stale.
pub trait Searcher: Send + Sync + 'static {
    fn search(
        &self,
        query: String,
        mode: SearchMode,
        ticket: Ticket,
    ) -> impl Future<Output = anyhow::Result<Vec<SearchResult>>> + Send;
}
