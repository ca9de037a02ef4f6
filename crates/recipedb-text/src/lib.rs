//! recipedb-text
//!
//! Keyword scoring over a lower-cased snapshot of the corpus. Each query
//! term found in a field adds that field's weight; the whole query found in
//! the title adds a phrase bonus once.

use recipedb_core::cancel::Ticket;
use recipedb_core::corpus::Recipe;
use recipedb_core::error::Result;

pub const TITLE_WEIGHT: u32 = 10;
pub const DESCRIPTION_WEIGHT: u32 = 3;
pub const INGREDIENTS_WEIGHT: u32 = 2;
pub const TITLE_PHRASE_BONUS: u32 = 20;

/// Records scored between cancellation checks.
const CHECK_EVERY: usize = 1024;

#[derive(Debug, Clone)]
struct LoweredRecipe {
    title: String,
    description: String,
    ingredients: String,
}

#[derive(Debug, Clone)]
pub struct LexicalIndex {
    records: Vec<LoweredRecipe>,
}

impl LexicalIndex {
    pub fn new(recipes: &[Recipe]) -> Self {
        let records = recipes
            .iter()
            .map(|r| LoweredRecipe {
                title: r.title.to_lowercase(),
                description: r.description.to_lowercase(),
                ingredients: r.ingredients.join(" ").to_lowercase(),
            })
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records with a positive score, best first; equal scores keep corpus
    /// order. Stops with `Error::Cancelled` once `ticket` goes stale.
    pub fn rank(&self, query: &str, ticket: Option<&Ticket>) -> Result<Vec<(usize, u32)>> {
        let phrase = query.trim().to_lowercase();
        let terms: Vec<&str> = phrase.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = Vec::new();
        for (i, record) in self.records.iter().enumerate() {
            if i % CHECK_EVERY == 0 {
                if let Some(t) = ticket {
                    t.check()?;
                }
            }
            let score = score(record, &terms, &phrase);
            if score > 0 {
                scored.push((i, score));
            }
        }
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        tracing::debug!(query = %phrase, hits = scored.len(), "lexical ranking");
        Ok(scored)
    }
}

fn score(record: &LoweredRecipe, terms: &[&str], phrase: &str) -> u32 {
    let mut total = 0;
    for term in terms {
        if record.title.contains(term) {
            total += TITLE_WEIGHT;
        }
        if record.description.contains(term) {
            total += DESCRIPTION_WEIGHT;
        }
        if record.ingredients.contains(term) {
            total += INGREDIENTS_WEIGHT;
        }
    }
    if record.title.contains(phrase) {
        total += TITLE_PHRASE_BONUS;
    }
    total
}
