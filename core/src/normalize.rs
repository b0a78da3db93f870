//! Label normalization
//!
//! The graph's lookup index is exact-match (case-insensitive), so every
//! label written or looked up by this worker goes through [`normalize_label`]
//! first. Two mentions of the same name in different chunks must collapse to
//! the same key or deduplication falls apart.

/// Map a free-form label to the canonical form stored in the graph.
///
/// Lowercases, trims, strips every character that is neither a word
/// character, whitespace nor a hyphen, and collapses whitespace runs to a
/// single space. Hyphens survive so compound proper names keep their shape.
///
/// Common prefixes ("the", "a") are deliberately NOT stripped: lookup is
/// exact-match, and stripping makes entities unfindable under their written
/// name.
///
/// Idempotent: `normalize_label(normalize_label(s)) == normalize_label(s)`.
#[must_use]
pub fn normalize_label(label: &str) -> String {
    let lowered = label.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;

    for ch in lowered.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch.is_alphanumeric() || ch == '_' || ch == '-' {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        }
    }

    out
}
