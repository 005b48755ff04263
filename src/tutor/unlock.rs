use std::sync::LazyLock;

use regex::Regex;

static UNLOCK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"LESSON_UNLOCKED_([A-Za-z0-9_-]+)").unwrap());

/// Scan free-form model output for the unlock signal
/// `LESSON_UNLOCKED_<token>` and return the token. All pattern knowledge
/// stays behind this function.
pub fn extract_unlock_signal(text: &str) -> Option<&str> {
    UNLOCK_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}
