//! recipedb-core
//!
//! Types, configuration, errors and the cancellation primitive shared by the
//! embedding, vector, text and query crates.

pub mod cancel;
pub mod config;
pub mod corpus;
pub mod error;
pub mod traits;
pub mod types;
