//! Tolerant extraction of JSON from generated text
//!
//! Model output is often wrapped in markdown code fences (```` ```json ... ``` ````).
//! Fences are stripped, then the remainder must parse strictly into the target type.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Generated output was empty")]
    Empty,

    #[error("Generated output is not valid JSON for the expected shape: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip the info string ("json", "JSON", ...) on the opening fence line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };

    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Strip fences and parse strictly into `T`
pub fn parse_generated<T: DeserializeOwned>(raw: &str) -> Result<T, ExtractError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(serde_json::from_str(body)?)
}
