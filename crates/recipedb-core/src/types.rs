//! Domain types shared by the embedding, vector, text and query crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type RecordId = String;

/// Which ranking the coordinator dispatches a query to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Semantic,
    Lexical,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semantic => f.write_str("semantic"),
            Self::Lexical => f.write_str("lexical"),
        }
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "semantic" | "s" => Ok(Self::Semantic),
            "lexical" | "l" | "text" => Ok(Self::Lexical),
            other => Err(Error::InvalidConfig(format!("unknown search mode '{other}'"))),
        }
    }
}

/// A score whose meaning depends on the engine that produced it.
///
/// Cosine scores lie in `[-1, 1]`; lexical scores are unbounded keyword
/// weights. The two are never compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Score {
    Cosine(f32),
    Lexical(u32),
}

impl Score {
    pub fn mode(&self) -> SearchMode {
        match self {
            Self::Cosine(_) => SearchMode::Semantic,
            Self::Lexical(_) => SearchMode::Lexical,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine(s) => write!(f, "{s:.3}"),
            Self::Lexical(s) => write!(f, "{s}"),
        }
    }
}

/// One ranked row: `index` is the corpus position, `record_id` its stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub index: usize,
    pub record_id: RecordId,
    pub score: Score,
}

/// A prefix `[0, page_end)` of a full ranked list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    pub results: Vec<SearchResult>,
    pub total_count: usize,
    pub has_more: bool,
}

impl ResultPage {
    /// Slice pages `0..=page` of `ranked` (each `page_size` long).
    pub fn slice(ranked: &[SearchResult], page: usize, page_size: usize) -> Self {
        let total_count = ranked.len();
        let page_end = page
            .saturating_add(1)
            .saturating_mul(page_size)
            .min(total_count);
        Self {
            results: ranked[..page_end].to_vec(),
            total_count,
            has_more: page_end < total_count,
        }
    }
}
