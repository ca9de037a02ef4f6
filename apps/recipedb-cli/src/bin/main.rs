use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Instant;

use recipedb_cli::{init_tracing, load_settings, print_view};
use recipedb_core::config::resolve_with_base;
use recipedb_core::corpus::load_recipes;
use recipedb_core::types::SearchMode;
use recipedb_embed::get_default_embedder;
use recipedb_query::{CoordinatorConfig, QueryCoordinator, Startup};
use recipedb_vector::{embed_corpus, write_embeddings};

#[derive(Parser, Debug)]
#[command(version, about = "Semantic and keyword recipe search", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed every recipe in the corpus and write the embeddings file
    Embed {
        /// Override model.batch_size
        #[clap(short, long)]
        batch_size: Option<usize>,
    },
    /// Run one query and print the first page of results
    Query {
        text: String,

        /// semantic or lexical
        #[clap(short, long)]
        mode: Option<SearchMode>,

        /// Results to print
        #[clap(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let (settings, base_dir) = load_settings()?;

    match args.command {
        Command::Embed { batch_size } => {
            let corpus_path = resolve_with_base(&base_dir, &settings.data.corpus_json);
            let out_path = resolve_with_base(&base_dir, &settings.data.embeddings_bin);
            let batch_size = batch_size.unwrap_or(settings.model.batch_size);

            let start = Instant::now();
            let matrix = tokio::task::spawn_blocking(move || -> Result<_> {
                let recipes = load_recipes(&corpus_path)?;
                let embedder = get_default_embedder(&settings.model)?;
                embed_corpus(embedder.as_ref(), &recipes, batch_size, true)
            })
            .await??;
            write_embeddings(&out_path, &matrix)?;
            println!(
                "✅ Wrote {} embeddings (dim {}) to {} in {:.1}s",
                matrix.count,
                matrix.dim,
                out_path.display(),
                start.elapsed().as_secs_f64()
            );
        }
        Command::Query { text, mode, limit } => {
            let mut search = settings.search.clone();
            search.page_size = limit.max(1);
            if let Some(mode) = mode {
                search.default_mode = mode;
            }
            let mut startup = Startup::new(settings, base_dir);
            let engine = startup.load().await?;
            let coordinator = QueryCoordinator::spawn(Arc::clone(&engine), CoordinatorConfig::from(&search));
            coordinator.set_query_text(text);
            let view = coordinator.wait_for_results(0).await?;
            print_view(&engine, &view);
        }
    }
    Ok(())
}
