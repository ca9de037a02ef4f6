//! recipedb-vector
//!
//! Exact cosine-similarity search over the corpus embedding matrix, the
//! on-disk embeddings format, and the batch job that produces it.

pub mod build;
pub mod index;
pub mod store;

pub use build::{embed_corpus, embed_texts};
pub use index::VectorIndex;
pub use store::{read_embeddings, write_embeddings, EmbeddingMatrix};
