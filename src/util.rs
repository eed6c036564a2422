//! Shared utility functions used across the codebase.

/// Read an environment variable, treating empty or whitespace-only values as unset.
pub fn env_var_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable as `u64`, returning `default` if unset.
///
/// Returns the parse error message when the variable is set but not a number,
/// so callers can surface it as a configuration error.
pub fn env_var_u64(name: &str, default: u64) -> Result<u64, String> {
    match env_var_non_empty(name) {
        Some(value) => value
            .parse::<u64>()
            .map_err(|e| format!("{} ({:?})", e, value)),
        None => Ok(default),
    }
}

/// Truncate `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
