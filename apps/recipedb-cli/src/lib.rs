//! Shared plumbing for the recipedb binaries.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use recipedb_core::config::{Config, Settings};
use recipedb_core::corpus::Recipe;
use recipedb_core::types::SearchResult;
use recipedb_query::{SearchEngine, SearchView};

/// Log to stderr; `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Settings plus the directory relative data paths resolve against.
pub fn load_settings() -> Result<(Settings, PathBuf)> {
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let base_dir = std::env::current_dir()?;
    Ok((config.settings()?, base_dir))
}

/// Characters of description shown under each hit.
pub const EXCERPT_CHARS: usize = 150;

pub fn print_view(engine: &SearchEngine, view: &SearchView) {
    if let Some(err) = &view.error_message {
        println!("⚠️  Search failed: {err}");
        return;
    }
    if view.results.is_empty() {
        println!("No recipes match \"{}\" ({} mode)", view.query.trim(), view.mode);
        return;
    }
    println!(
        "\n🔍 {} of {} results for \"{}\" ({} mode)",
        view.results.len(),
        view.total_count,
        view.query.trim(),
        view.mode
    );
    for (rank, hit) in view.results.iter().enumerate() {
        println!("{}", format_hit(rank + 1, hit, engine.recipe(hit.index)));
    }
    if view.has_more {
        println!("  … more available");
    }
}

/// One ranked hit: title line, id, description excerpt, rating and link.
pub fn format_hit(rank: usize, hit: &SearchResult, recipe: Option<&Recipe>) -> String {
    let Some(recipe) = recipe else {
        return format!("\n{rank}. [{}] <unknown>\n   ID: {}", hit.score, hit.record_id);
    };
    let mut lines = vec![
        format!("\n{rank}. [{}] {}", hit.score, recipe.title),
        format!("   ID: {}", hit.record_id),
    ];
    if !recipe.description.is_empty() {
        lines.push(format!("   {}", excerpt(&recipe.description, EXCERPT_CHARS)));
    }
    if let Some(rating) = recipe.rating {
        lines.push(format!("   ⭐ Rating: {rating:.1}"));
    }
    if let Some(url) = recipe.url.as_deref().filter(|u| !u.is_empty()) {
        lines.push(format!("   🔗 {url}"));
    }
    lines.join("\n")
}

/// First `max_chars` characters, with `...` appended when anything was cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() { format!("{head}...") } else { head }
}
