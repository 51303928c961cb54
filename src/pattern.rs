//! Regular-expression capability used by every edit operator.
//!
//! Two kinds of matching are offered: a full-line match (the whole line must
//! match, as when selecting region delimiters or anchors) and a bounded match
//! that reports the byte offsets of the first match inside a line (used by
//! pattern replacement and field splitting).
//!
//! Compiled expressions are cached thread-locally, capped at 256 entries; the
//! cache is cleared wholesale when full.

use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

const MAX_CACHE_ENTRIES: usize = 256;

thread_local! {
    // Key carries the match kind so the anchored and unanchored compilations
    // of the same source never collide.
    static PATTERN_CACHE: RefCell<HashMap<String, Regex>> =
        RefCell::new(HashMap::new());
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid regular expression '{pattern}': {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Full,
    Bounded,
}

fn compiled(pattern: &str, kind: Kind) -> Result<Regex, PatternError> {
    let cache_key = format!("{kind:?}:{pattern}");

    PATTERN_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();

        if let Some(re) = cache.get(&cache_key) {
            return Ok(re.clone());
        }

        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }

        let source = match kind {
            Kind::Full => format!("^(?:{pattern})$"),
            Kind::Bounded => pattern.to_string(),
        };
        let re = Regex::new(&source).map_err(|e| PatternError {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        cache.insert(cache_key, re.clone());
        Ok(re)
    })
}

/// Check that a pattern compiles.
pub fn validate(pattern: &str) -> Result<(), PatternError> {
    compiled(pattern, Kind::Bounded).map(|_| ())
}

/// True if `pattern` matches the entire `line`.
pub fn full_match(pattern: &str, line: &str) -> Result<bool, PatternError> {
    Ok(compiled(pattern, Kind::Full)?.is_match(line))
}

/// Byte offsets `(start, end)` of the first match of `pattern` in `line`.
pub fn bounded_match(pattern: &str, line: &str) -> Result<Option<(usize, usize)>, PatternError> {
    bounded_match_at(pattern, line, 0)
}

/// Like [`bounded_match`] but only considers matches starting at or after
/// byte offset `from`. Offsets are relative to the whole line.
pub fn bounded_match_at(
    pattern: &str,
    line: &str,
    from: usize,
) -> Result<Option<(usize, usize)>, PatternError> {
    if from > line.len() {
        return Ok(None);
    }
    let re = compiled(pattern, Kind::Bounded)?;
    Ok(re.find_at(line, from).map(|m| (m.start(), m.end())))
}

/// Every non-overlapping match of `pattern` in `line`.
pub fn find_all(pattern: &str, line: &str) -> Result<Vec<(usize, usize)>, PatternError> {
    let re = compiled(pattern, Kind::Bounded)?;
    Ok(re.find_iter(line).map(|m| (m.start(), m.end())).collect())
}

/// A pattern is anchored only when it is pinned at both ends (`^...$`).
pub fn is_anchored(pattern: &str) -> bool {
    pattern.starts_with('^') && pattern.ends_with('$')
}

/// Clear the compiled pattern cache (mainly for testing).
pub fn clear_cache() {
    PATTERN_CACHE.with(|cache| {
        cache.borrow_mut().clear();
    });
}

/// Get cache statistics for monitoring.
pub fn cache_size() -> usize {
    PATTERN_CACHE.with(|cache| cache.borrow().len())
}
