use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use recipedb_core::config::{resolve_with_base, Settings};
use recipedb_core::corpus::{load_recipes, record_ids};
use recipedb_core::error::Error;
use recipedb_embed::{get_default_embedder, EmbedWorker};
use recipedb_vector::{read_embeddings, VectorIndex};

use crate::engine::SearchEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    /// `recoverable` failures (I/O) may succeed on [`Startup::retry`];
    /// the rest need a configuration or data fix.
    Failed { message: String, recoverable: bool },
}

/// Startup sequence: corpus, embeddings, model, indexes.
pub struct Startup {
    settings: Settings,
    base_dir: PathBuf,
    state: LoadState,
}

impl Startup {
    /// Relative data paths in `settings` resolve against `base_dir`.
    pub fn new(settings: Settings, base_dir: impl Into<PathBuf>) -> Self {
        Self { settings, base_dir: base_dir.into(), state: LoadState::Loading }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn load(&mut self) -> Result<Arc<SearchEngine>> {
        self.state = LoadState::Loading;
        let settings = self.settings.clone();
        let base_dir = self.base_dir.clone();
        let outcome = tokio::task::spawn_blocking(move || build_engine(&settings, &base_dir))
            .await
            .map_err(|e| anyhow::anyhow!(Error::Operation(format!("startup task failed: {e}"))))
            .and_then(|r| r);

        match outcome {
            Ok(engine) => {
                self.state = LoadState::Ready;
                tracing::info!(recipes = engine.len(), "search engine ready");
                Ok(Arc::new(engine))
            }
            Err(err) => {
                let recoverable = !is_fatal(&err);
                tracing::error!(error = %format!("{err:#}"), recoverable, "startup failed");
                self.state = LoadState::Failed { message: format!("{err:#}"), recoverable };
                Err(err)
            }
        }
    }

    /// Re-run the whole load after a recoverable failure.
    pub async fn retry(&mut self) -> Result<Arc<SearchEngine>> {
        if let LoadState::Failed { recoverable: false, message } = &self.state {
            return Err(Error::Operation(format!("startup failure is not retryable: {message}")).into());
        }
        tracing::info!("retrying startup");
        self.load().await
    }
}

/// Whether any cause in the chain is a load-time error a retry cannot fix.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<Error>().is_some_and(Error::is_fatal))
}

fn build_engine(settings: &Settings, base_dir: &Path) -> Result<SearchEngine> {
    let corpus_path = resolve_with_base(base_dir, &settings.data.corpus_json);
    let embeddings_path = resolve_with_base(base_dir, &settings.data.embeddings_bin);

    let recipes = load_recipes(&corpus_path)?;
    let matrix = read_embeddings(&embeddings_path)?;
    if matrix.count != recipes.len() {
        return Err(Error::MalformedEmbeddings(format!(
            "{} has {} rows but the corpus has {} recipes",
            embeddings_path.display(),
            matrix.count,
            recipes.len()
        ))
        .into());
    }

    let embedder = get_default_embedder(&settings.model)?;
    if embedder.dim() != matrix.dim {
        return Err(Error::MalformedEmbeddings(format!(
            "embeddings have dim {} but the model produces {}",
            matrix.dim,
            embedder.dim()
        ))
        .into());
    }

    let index = VectorIndex::from_matrix(&matrix, record_ids(&recipes), &candle_core::Device::Cpu)?;
    let worker = EmbedWorker::spawn(embedder)?;
    SearchEngine::new(worker, index, recipes)
}
