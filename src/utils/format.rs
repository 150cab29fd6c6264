//! Output formatting utilities

use std::time::Duration;

/// Truncate to at most `max_len` characters, ending in `...` when cut.
#[must_use]
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len < 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{}...", kept.trim_end())
}

/// Short human-readable elapsed time: `850ms`, `2.40s`, `3m 05s`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else if secs >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}
