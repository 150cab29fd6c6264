//! Search engine for skills
//!
//! Semantic retrieval over hash embeddings, combined at query time with the
//! store's BM25 full-text search by [`SearchService`].

pub mod embeddings;
pub mod service;
pub mod snippet;
pub mod vector;

pub use embeddings::{Embedder, HashEmbedder};
pub use service::{
    Match, MatchType, SearchOptions, SearchResults, SearchService, SearchServiceConfig,
    SearchStats,
};
pub use snippet::{Highlight, Snippet};
pub use vector::{BatchOutcome, DEFAULT_MAX_TOKENS, HashVectorStore, SearchHit, VectorStore};
