//! Recipe corpus records and the text each one is embedded from.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

use crate::types::RecordId;

/// Embedding inputs longer than this are cut (in characters).
pub const MAX_SEARCH_TEXT_CHARS: usize = 2000;
/// Only the leading ingredients go into the embedded text.
pub const MAX_EMBEDDED_INGREDIENTS: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ingredients: Vec<String>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub rating: Option<f32>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Recipe {
    /// Stable id, falling back to the corpus position when the record has none.
    pub fn record_id(&self, position: usize) -> RecordId {
        self.id.clone().unwrap_or_else(|| position.to_string())
    }

    /// Text fed to the embedding model: title, description, then the first
    /// ingredients, truncated to [`MAX_SEARCH_TEXT_CHARS`].
    pub fn search_text(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(3);
        if !self.title.is_empty() {
            parts.push(self.title.clone());
        }
        if !self.description.is_empty() {
            parts.push(self.description.clone());
        }
        if !self.ingredients.is_empty() {
            let head: Vec<&str> = self
                .ingredients
                .iter()
                .take(MAX_EMBEDDED_INGREDIENTS)
                .map(String::as_str)
                .collect();
            parts.push(format!("Ingredients: {}", head.join(", ")));
        }
        parts.join(" ").chars().take(MAX_SEARCH_TEXT_CHARS).collect()
    }
}

/// Read the corpus JSON array. Order is significant: it is the row order of
/// the embeddings matrix.
pub fn load_recipes(path: &Path) -> Result<Vec<Recipe>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus {}", path.display()))?;
    let recipes: Vec<Recipe> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse corpus {}", path.display()))?;
    tracing::info!(count = recipes.len(), path = %path.display(), "loaded corpus");
    Ok(recipes)
}

pub fn record_ids(recipes: &[Recipe]) -> Vec<RecordId> {
    recipes.iter().enumerate().map(|(i, r)| r.record_id(i)).collect()
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn lenient_f32<'de, D>(deserializer: D) -> std::result::Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64().map(|v| v as f32),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
