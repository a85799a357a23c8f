//! Origin list loading.
//!
//! The list is a plain text file with one storefront domain per line.
//! Blank lines and lines starting with `#` are ignored; a domain listed
//! twice is crawled once, at its first position.

use std::collections::HashSet;
use std::path::Path;

use crate::error::AppError;

/// Reads the origin list from `path`.
///
/// # Errors
///
/// Returns [`AppError::ConfigError`] when the file cannot be read.
pub fn read_origins(path: impl AsRef<Path>) -> Result<Vec<String>, AppError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!("Cannot read origin list {}: {}", path.display(), e))
    })?;
    Ok(parse_origins(&content))
}

/// Parses origin names from text, one per line.
pub fn parse_origins(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}
