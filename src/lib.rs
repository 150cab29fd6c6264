//! skillsift - hybrid search over skills
//!
//! Skills live in a persistent store with ranked full-text search. A
//! background indexer embeds pending skills into a pluggable vector store,
//! and the search service merges both retrieval methods into title and
//! content matches with highlighted snippets.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod indexing;
pub mod search;
pub mod storage;
pub mod test_utils;
pub mod utils;

pub use error::{Result, SiftError};
