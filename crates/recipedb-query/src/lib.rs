//! recipedb-query
//!
//! Dual-mode search over the recipe corpus and the coordinator that drives
//! it from an interactive surface.

pub mod coordinator;
pub mod engine;
pub mod loader;

pub use coordinator::{CoordinatorConfig, QueryCoordinator, SearchView};
pub use engine::SearchEngine;
pub use loader::{LoadState, Startup};
