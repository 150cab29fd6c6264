//! Embeddable text preparation and content hashing
//!
//! The prepared text is what gets embedded; its SHA-256 hex digest is the
//! content hash stored in `Skill::embedding_id`. A stored hash that no longer
//! matches the recomputed one marks the embedding as stale.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use super::skill::Skill;

/// Approximate characters per token for budget truncation.
pub const CHARS_PER_TOKEN: usize = 4;

const FIELD_SEPARATOR: &str = "\n\n";

/// Build the deterministic text embedded for a skill.
///
/// Title is repeated for emphasis; empty fields are omitted. Tag names are
/// appended in sorted, de-duplicated order.
#[must_use]
pub fn prepare(skill: &Skill) -> String {
    let tag_names: BTreeSet<&str> = skill
        .tags
        .iter()
        .map(|tag| tag.name.as_str())
        .filter(|name| !name.is_empty())
        .collect();

    [
        skill.title.as_str(),
        skill.title.as_str(),
        skill.description.as_str(),
        skill.summary.as_str(),
        skill.content.as_str(),
    ]
    .into_iter()
    .filter(|field| !field.is_empty())
    .chain(tag_names)
    .collect::<Vec<_>>()
    .join(FIELD_SEPARATOR)
}

/// Lowercase hex SHA-256 of `text`.
#[must_use]
pub fn hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Content hash of the prepared text of `skill`.
#[must_use]
pub fn content_hash(skill: &Skill) -> String {
    hash(&prepare(skill))
}

/// Cut `text` to roughly `max_tokens` tokens (`max_tokens * 4` characters).
#[must_use]
pub fn truncate(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
