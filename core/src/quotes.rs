//! Quote extraction from marker phrases
//!
//! The model cites evidence by giving two short phrases that bracket the
//! quoted span instead of repeating the whole quote. This module locates the
//! span in the source text, tolerating whitespace and case drift between the
//! model's markers and the original.

use regex::{Regex, RegexBuilder};

/// Spans longer than this are assumed to be a bad marker match.
const MAX_QUOTE_CHARS: usize = 500;

/// Extract the inclusive span bracketed by `start_marker` and `end_marker`.
///
/// Returns `None` when either marker is empty, the text is empty, a marker
/// does not occur (end is searched from the start-match onward), or the span
/// exceeds 500 characters. Internal whitespace of the returned string is
/// collapsed to single spaces.
#[must_use]
pub fn extract_quote(text: &str, start_marker: &str, end_marker: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let start_re = marker_pattern(start_marker)?;
    let end_re = marker_pattern(end_marker)?;

    let start_match = start_re.find(text)?;
    let tail = &text[start_match.start()..];
    let end_match = end_re.find(tail)?;

    let span = &tail[..end_match.end()];
    if span.chars().count() > MAX_QUOTE_CHARS {
        return None;
    }

    Some(collapse_whitespace(span))
}

/// Compile a marker phrase into a forgiving pattern: metacharacters escaped,
/// whitespace runs matched as `\s+`, case-insensitive.
fn marker_pattern(marker: &str) -> Option<Regex> {
    let mut pattern = String::new();
    for token in marker.split_whitespace() {
        if !pattern.is_empty() {
            pattern.push_str(r"\s+");
        }
        pattern.push_str(&regex::escape(token));
    }
    if pattern.is_empty() {
        return None;
    }
    RegexBuilder::new(&pattern).case_insensitive(true).build().ok()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
