//! Semantic place search.
//!
//! # Architecture
//!
//! - `embeddings`: embedding providers (hosted API, optional fastembed)
//! - `index`: flat in-memory vector index searched by squared L2 distance
//! - `storage`: reads the FAISS flat index file
//! - `catalog`: joins index rows with the places table
//! - `ranking`: query embedding, overfetch, similarity threshold, truncation

pub mod catalog;
pub mod embeddings;
pub mod index;
pub mod ranking;
pub mod storage;

#[cfg(feature = "local-embeddings")]
pub use embeddings::LocalEmbeddings;
pub use catalog::PlaceCatalog;
pub use embeddings::{EmbeddingProvider, OpenAiEmbeddings};
pub use ranking::{Ranker, RankingError, ScoredCandidate, SearchConfig};

/// Default hosted embedding model
pub const DEFAULT_MODEL: &str = "text-embedding-ada-002";

/// Default minimum similarity offered in the UI
pub const DEFAULT_THRESHOLD: f32 = 0.5;
