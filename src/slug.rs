//! Filesystem-safe names for output files.

use regex::Regex;
use std::sync::LazyLock;

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercase, map every run of non `[a-z0-9]` characters to a single `_`,
/// then trim `_` from both ends. Idempotent.
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    NON_ALNUM
        .replace_all(&lower, "_")
        .trim_matches('_')
        .to_string()
}
