//! Core skill types and logic

pub mod content;
pub mod skill;

pub use content::{content_hash, hash, prepare, truncate};
pub use skill::{Skill, Tag};
