//! Snippet extraction and highlighting
//!
//! Finds query-term occurrences in a text body and cuts short excerpts
//! around them so a result can show why it matched. Offsets are byte offsets
//! into the snippet text. Matching folds ASCII case only, which keeps every
//! offset in the lowercased haystack valid for the original text.

use std::collections::HashSet;

use memchr::memmem;
use serde::Serialize;

/// Snippets returned when the caller passes zero.
pub const DEFAULT_MAX_SNIPPETS: usize = 3;

/// Characters of context on each side of an occurrence.
const CONTEXT_CHARS: usize = 50;

const FALLBACK_MAX_CHARS: usize = 150;

/// How far the fallback cut may move back to reach whitespace.
const FALLBACK_BACKOFF_CHARS: usize = 30;

const MIN_TERM_CHARS: usize = 2;

const ELLIPSIS: &str = "...";

/// Byte range inside [`Snippet::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snippet {
    pub text: String,
    pub highlights: Vec<Highlight>,
}

#[derive(Debug, Clone, Copy)]
struct Occurrence {
    start: usize,
    end: usize,
}

/// Search terms of a query: whitespace-split, edge punctuation trimmed,
/// shorter than two characters dropped, ASCII-lowercased.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| token.chars().count() >= MIN_TERM_CHARS)
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Extract up to `max_snippets` highlighted excerpts of `content` for `query`.
///
/// Returns nothing for an empty content or query, or when no usable term
/// remains. When terms exist but none occur, a single unhighlighted prefix
/// of the content is returned instead.
pub fn extract(content: &str, query: &str, max_snippets: usize) -> Vec<Snippet> {
    if content.is_empty() || query.is_empty() {
        return Vec::new();
    }

    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    let occurrences = find_occurrences(content, &terms);
    if occurrences.is_empty() {
        return vec![fallback_snippet(content)];
    }

    let max_snippets = if max_snippets == 0 {
        DEFAULT_MAX_SNIPPETS
    } else {
        max_snippets
    };
    cluster(content, &occurrences, max_snippets)
}

/// Every occurrence of every term, sorted by start. Occurrences sharing a
/// start keep the one from the term scanned first; overlaps with different
/// starts are kept.
fn find_occurrences(content: &str, terms: &[String]) -> Vec<Occurrence> {
    let haystack = content.to_ascii_lowercase();
    let mut seen_starts = HashSet::new();
    let mut occurrences = Vec::new();

    for term in terms {
        for start in memmem::find_iter(haystack.as_bytes(), term.as_bytes()) {
            if seen_starts.insert(start) {
                occurrences.push(Occurrence {
                    start,
                    end: start + term.len(),
                });
            }
        }
    }

    occurrences.sort_by_key(|occurrence| occurrence.start);
    occurrences
}

fn cluster(content: &str, occurrences: &[Occurrence], max_snippets: usize) -> Vec<Snippet> {
    let mut consumed = vec![false; occurrences.len()];
    let mut snippets = Vec::new();

    for (idx, occurrence) in occurrences.iter().enumerate() {
        if snippets.len() >= max_snippets {
            break;
        }
        if consumed[idx] {
            continue;
        }

        let (start, end) = window(content, *occurrence);
        let prefix = if start > 0 { ELLIPSIS.len() } else { 0 };

        let mut highlights = Vec::new();
        for (other_idx, other) in occurrences.iter().enumerate() {
            if !consumed[other_idx] && other.start >= start && other.end <= end {
                consumed[other_idx] = true;
                highlights.push(Highlight {
                    start: other.start - start + prefix,
                    end: other.end - start + prefix,
                });
            }
        }

        let mut text = String::with_capacity(end - start + 2 * ELLIPSIS.len());
        if prefix > 0 {
            text.push_str(ELLIPSIS);
        }
        text.push_str(&content[start..end]);
        if end < content.len() {
            text.push_str(ELLIPSIS);
        }

        snippets.push(Snippet { text, highlights });
    }

    snippets
}

/// Context window around an occurrence, widened so no word is cut and
/// narrowed past any whitespace at its edges.
fn window(content: &str, occurrence: Occurrence) -> (usize, usize) {
    let mut start = extend_left(content, back_chars(content, occurrence.start, CONTEXT_CHARS));
    let mut end = extend_right(content, forward_chars(content, occurrence.end, CONTEXT_CHARS));

    while let Some(ch) = content[start..occurrence.start].chars().next() {
        if !ch.is_whitespace() {
            break;
        }
        start += ch.len_utf8();
    }
    while let Some(ch) = content[occurrence.end..end].chars().next_back() {
        if !ch.is_whitespace() {
            break;
        }
        end -= ch.len_utf8();
    }

    (start, end)
}

fn fallback_snippet(content: &str) -> Snippet {
    if content.chars().count() <= FALLBACK_MAX_CHARS {
        return Snippet {
            text: content.to_string(),
            highlights: Vec::new(),
        };
    }

    let cut = forward_chars(content, 0, FALLBACK_MAX_CHARS);
    let floor = back_chars(content, cut, FALLBACK_BACKOFF_CHARS);
    let end = content[floor..cut]
        .rfind(char::is_whitespace)
        .map_or(cut, |offset| floor + offset);

    let mut text = content[..end].trim_end().to_string();
    text.push_str(ELLIPSIS);
    Snippet {
        text,
        highlights: Vec::new(),
    }
}

/// Byte index `n` characters before `from`, or 0.
fn back_chars(s: &str, from: usize, n: usize) -> usize {
    s[..from]
        .char_indices()
        .rev()
        .take(n)
        .last()
        .map_or(from, |(idx, _)| idx)
}

/// Byte index `n` characters after `from`, or the end of `s`.
fn forward_chars(s: &str, from: usize, n: usize) -> usize {
    s[from..]
        .char_indices()
        .nth(n)
        .map_or(s.len(), |(idx, _)| from + idx)
}

fn extend_left(s: &str, mut start: usize) -> usize {
    while let Some(prev) = s[..start].chars().next_back() {
        if prev.is_whitespace() {
            break;
        }
        start -= prev.len_utf8();
    }
    start
}

fn extend_right(s: &str, mut end: usize) -> usize {
    while let Some(next) = s[end..].chars().next() {
        if next.is_whitespace() {
            break;
        }
        end += next.len_utf8();
    }
    end
}

/// Render with `**` around each highlight.
pub fn highlight_text(snippet: &Snippet) -> String {
    highlight_with(snippet, |matched| format!("**{matched}**"))
}

/// Render a snippet, passing each highlighted range through `mark`.
///
/// Highlights that are empty, out of bounds, or not on char boundaries are
/// skipped. A highlight overlapping the previous one is marked from where
/// the previous one ended.
pub fn highlight_with(snippet: &Snippet, mark: impl Fn(&str) -> String) -> String {
    let text = snippet.text.as_str();
    let mut highlights: Vec<Highlight> = snippet
        .highlights
        .iter()
        .filter(|h| {
            h.start < h.end
                && h.end <= text.len()
                && text.is_char_boundary(h.start)
                && text.is_char_boundary(h.end)
        })
        .copied()
        .collect();
    highlights.sort_by_key(|h| (h.start, h.end));

    let mut out = String::with_capacity(text.len() + highlights.len() * 4);
    let mut cursor = 0;
    for highlight in highlights {
        let start = highlight.start.max(cursor);
        if start >= highlight.end {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(&mark(&text[start..highlight.end]));
        cursor = highlight.end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn highlighted(snippet: &Snippet) -> Vec<&str> {
        snippet
            .highlights
            .iter()
            .map(|h| &snippet.text[h.start..h.end])
            .collect()
    }

    #[test]
    fn test_empty_inputs() {
        assert!(extract("", "query", 3).is_empty());
        assert!(extract("content", "", 3).is_empty());
        assert!(extract("content", "a", 3).is_empty());
        assert!(extract("content", "a ! ?", 3).is_empty());
    }

    #[test]
    fn test_query_terms() {
        assert_eq!(query_terms("  (React), hooks! a"), vec!["react", "hooks"]);
        assert!(query_terms("x y z").is_empty());
    }

    #[test]
    fn test_no_match_fallback() {
        let snippets = extract("Python guide about pandas", "javascript", 3);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].text, "Python guide about pandas");
        assert!(snippets[0].highlights.is_empty());
    }

    #[test]
    fn test_fallback_truncates_on_whitespace() {
        let content = "word ".repeat(60);
        let snippets = extract(&content, "missing", 3);
        let text = &snippets[0].text;
        assert!(text.ends_with("..."));
        let body = text.trim_end_matches("...");
        assert!(body.chars().count() <= 150);
        assert!(body.ends_with("word"));
        assert!(content.starts_with(body));
    }

    #[test]
    fn test_fallback_without_whitespace_cuts_hard() {
        let content = "x".repeat(400);
        let text = &extract(&content, "zz", 1)[0].text;
        assert_eq!(text.len(), 150 + 3);
    }

    #[test]
    fn test_single_match_in_short_content() {
        let snippets = extract("Learn goroutines and channels", "goroutines", 3);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].text, "Learn goroutines and channels");
        assert_eq!(highlighted(&snippets[0]), vec!["goroutines"]);
    }

    #[test]
    fn test_case_insensitive_match_keeps_original_case() {
        let snippets = extract("Use GoRoutines wisely", "goroutines", 3);
        assert_eq!(highlighted(&snippets[0]), vec!["GoRoutines"]);
    }

    #[test]
    fn test_window_adds_ellipses_and_shifts_offsets() {
        let content = format!("{} needle {}", "lead ".repeat(30), "tail ".repeat(30));
        let snippets = extract(&content, "needle", 3);
        assert_eq!(snippets.len(), 1);
        let snippet = &snippets[0];
        assert!(snippet.text.starts_with("..."));
        assert!(snippet.text.ends_with("..."));
        assert_eq!(highlighted(snippet), vec!["needle"]);
        // no word is cut at either edge
        let inner = snippet.text.trim_start_matches("...").trim_end_matches("...");
        assert!(inner.starts_with("lead"));
        assert!(inner.ends_with("tail"));
    }

    #[test]
    fn test_nearby_matches_share_a_snippet() {
        let snippets = extract("rust async runtime and rust macros", "rust", 3);
        assert_eq!(snippets.len(), 1);
        assert_eq!(highlighted(&snippets[0]), vec!["rust", "rust"]);
    }

    #[test]
    fn test_max_snippets_limit() {
        let filler = "filler ".repeat(40);
        let content = format!("alpha {filler} alpha {filler} alpha {filler} alpha {filler} alpha");
        assert_eq!(extract(&content, "alpha", 2).len(), 2);
        assert_eq!(extract(&content, "alpha", 0).len(), DEFAULT_MAX_SNIPPETS);
        assert_eq!(extract(&content, "alpha", 10).len(), 5);
    }

    #[test]
    fn test_same_start_dedup_prefers_first_term() {
        let snippets = extract("goroutines everywhere", "go goroutines", 3);
        assert_eq!(highlighted(&snippets[0]), vec!["go"]);

        let snippets = extract("goroutines everywhere", "goroutines go", 3);
        assert_eq!(highlighted(&snippets[0]), vec!["goroutines"]);
    }

    #[test]
    fn test_overlapping_different_starts_are_kept() {
        let snippets = extract("abcd", "abc bcd", 3);
        assert_eq!(highlighted(&snippets[0]), vec!["abc", "bcd"]);
    }

    #[test]
    fn test_multibyte_content_is_safe() {
        let content = format!("{}café needle über{}", "é".repeat(70), "ü".repeat(70));
        let snippets = extract(&content, "needle", 3);
        assert_eq!(highlighted(&snippets[0]), vec!["needle"]);
        let no_match = extract(&"ü".repeat(200), "needle", 3);
        assert!(no_match[0].text.ends_with("..."));
    }

    #[test]
    fn test_highlight_text() {
        let snippets = extract("Learn goroutines and channels", "goroutines channels", 3);
        assert_eq!(
            highlight_text(&snippets[0]),
            "Learn **goroutines** and **channels**"
        );
    }

    #[test]
    fn test_highlight_text_skips_invalid_ranges() {
        let snippet = Snippet {
            text: "hello world".to_string(),
            highlights: vec![
                Highlight { start: 6, end: 11 },
                Highlight { start: 3, end: 3 },
                Highlight { start: 8, end: 50 },
                Highlight { start: 5, end: 2 },
            ],
        };
        assert_eq!(highlight_text(&snippet), "hello **world**");
    }

    #[test]
    fn test_highlight_text_handles_overlap() {
        let snippet = Snippet {
            text: "abcd".to_string(),
            highlights: vec![Highlight { start: 0, end: 3 }, Highlight { start: 1, end: 4 }],
        };
        assert_eq!(highlight_text(&snippet), "**abc****d**");
    }
}
