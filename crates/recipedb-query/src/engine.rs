use anyhow::{anyhow, Result};
use std::sync::Arc;

use recipedb_core::cancel::Ticket;
use recipedb_core::corpus::{record_ids, Recipe};
use recipedb_core::error::Error;
use recipedb_core::traits::Searcher;
use recipedb_core::types::{RecordId, Score, SearchMode, SearchResult};
use recipedb_embed::EmbedWorker;
use recipedb_text::LexicalIndex;
use recipedb_vector::VectorIndex;

/// Both rankers over one corpus. Semantic queries go through the embedding
/// worker and the vector index; lexical queries through the keyword scorer.
/// Scoring runs on the blocking pool.
pub struct SearchEngine {
    worker: EmbedWorker,
    vectors: Arc<VectorIndex>,
    lexical: Arc<LexicalIndex>,
    recipes: Arc<Vec<Recipe>>,
    ids: Arc<Vec<RecordId>>,
}

impl SearchEngine {
    pub fn new(worker: EmbedWorker, vectors: VectorIndex, recipes: Vec<Recipe>) -> Result<Self> {
        if vectors.len() != recipes.len() {
            return Err(Error::InputMismatch(format!(
                "{} embedding rows for {} recipes",
                vectors.len(),
                recipes.len()
            ))
            .into());
        }
        if worker.dim() != vectors.dim() {
            return Err(Error::InputMismatch(format!(
                "embedder dim {} does not match index dim {}",
                worker.dim(),
                vectors.dim()
            ))
            .into());
        }
        let lexical = LexicalIndex::new(&recipes);
        let ids = record_ids(&recipes);
        Ok(Self {
            worker,
            vectors: Arc::new(vectors),
            lexical: Arc::new(lexical),
            recipes: Arc::new(recipes),
            ids: Arc::new(ids),
        })
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn recipe(&self, index: usize) -> Option<&Recipe> {
        self.recipes.get(index)
    }

    async fn semantic(&self, query: &str, ticket: Ticket) -> Result<Vec<SearchResult>> {
        let vector = self.worker.embed_query(query, ticket.clone()).await?;
        ticket.check()?;
        let index = Arc::clone(&self.vectors);
        let ranked = tokio::task::spawn_blocking(move || -> Result<Vec<(usize, f32)>> {
            ticket.check()?;
            index.rank_all(&vector)
        })
        .await
        .map_err(|e| anyhow!(Error::Operation(format!("similarity task failed: {e}"))))??;
        Ok(ranked
            .into_iter()
            .map(|(index, score)| self.result(index, Score::Cosine(score)))
            .collect())
    }

    async fn keyword(&self, query: &str, ticket: Ticket) -> Result<Vec<SearchResult>> {
        let lexical = Arc::clone(&self.lexical);
        let query = query.to_string();
        let ranked = tokio::task::spawn_blocking(move || lexical.rank(&query, Some(&ticket)))
            .await
            .map_err(|e| anyhow!(Error::Operation(format!("lexical task failed: {e}"))))??;
        Ok(ranked
            .into_iter()
            .map(|(index, score)| self.result(index, Score::Lexical(score)))
            .collect())
    }

    fn result(&self, index: usize, score: Score) -> SearchResult {
        let record_id = self.ids.get(index).cloned().unwrap_or_else(|| index.to_string());
        SearchResult { index, record_id, score }
    }
}

impl Searcher for SearchEngine {
    async fn search(&self, query: String, mode: SearchMode, ticket: Ticket) -> Result<Vec<SearchResult>> {
        ticket.check()?;
        let started = std::time::Instant::now();
        let results = match mode {
            SearchMode::Semantic => self.semantic(&query, ticket).await?,
            SearchMode::Lexical => self.keyword(&query, ticket).await?,
        };
        tracing::debug!(
            %query,
            %mode,
            hits = results.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "search finished"
        );
        Ok(results)
    }
}
