//! Whitespace-normalizing match policy for "is this line already present"
//! decisions during insertion.

use crate::document::{Document, LineId};
use crate::pattern::{self, PatternError};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitespacePolicy {
    #[serde(alias = "exact_match")]
    Exact,
    IgnoreLeading,
    IgnoreTrailing,
    IgnoreEmbedded,
}

impl fmt::Display for WhitespacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WhitespacePolicy::Exact => "exact_match",
            WhitespacePolicy::IgnoreLeading => "ignore_leading",
            WhitespacePolicy::IgnoreTrailing => "ignore_trailing",
            WhitespacePolicy::IgnoreEmbedded => "ignore_embedded",
        };
        f.write_str(name)
    }
}

/// Set of whitespace policies declared on an insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet(BTreeSet<WhitespacePolicy>);

impl PolicySet {
    pub fn exact() -> Self {
        Self::default()
    }

    pub fn new(policies: impl IntoIterator<Item = WhitespacePolicy>) -> Self {
        Self(policies.into_iter().collect())
    }

    pub fn contains(&self, policy: WhitespacePolicy) -> bool {
        self.0.contains(&policy)
    }

    /// No policy, or only `Exact`: literal comparison.
    pub fn is_exact(&self) -> bool {
        self.0.is_empty() || self.contains(WhitespacePolicy::Exact)
    }

    /// `Exact` combined with any ignore policy.
    pub fn has_conflict(&self) -> bool {
        self.contains(WhitespacePolicy::Exact) && self.0.len() > 1
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = WhitespacePolicy> + '_ {
        self.0.iter().copied()
    }

    /// Build the full-line regex that `candidate` turns into under this
    /// policy set. `None` means literal comparison applies.
    pub fn pattern_for(&self, candidate: &str) -> Option<String> {
        if self.is_exact() {
            return None;
        }

        let mut built = regex::escape(candidate);

        if self.contains(WhitespacePolicy::IgnoreEmbedded) {
            built = collapse_embedded(&built);
        }

        if self.contains(WhitespacePolicy::IgnoreLeading) && !built.starts_with(r"\s*") {
            built = format!(r"\s*{}", built.trim_start());
        }

        if self.contains(WhitespacePolicy::IgnoreTrailing) && !built.ends_with(r"\s*") {
            built = format!(r"{}\s*", built.trim_end());
        }

        Some(built)
    }
}

impl FromIterator<WhitespacePolicy> for PolicySet {
    fn from_iter<I: IntoIterator<Item = WhitespacePolicy>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Replace each internal whitespace run (not leading, not trailing) with `\s+`.
fn collapse_embedded(text: &str) -> String {
    let trimmed_start = text.len() - text.trim_start().len();
    let trimmed_end = text.trim_end().len();
    if trimmed_start >= trimmed_end {
        return text.to_string();
    }

    let (leading, rest) = text.split_at(trimmed_start);
    let (body, trailing) = rest.split_at(trimmed_end - trimmed_start);

    let mut out = String::with_capacity(text.len() + 8);
    out.push_str(leading);
    let mut in_space = false;
    for ch in body.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push_str(r"\s+");
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out.push_str(trailing);
    out
}

/// Decide whether `candidate_line` matches `haystack_line` under `policies`.
pub fn matches_with_policy(
    candidate_line: &str,
    haystack_line: &str,
    policies: &PolicySet,
) -> Result<bool, PatternError> {
    match policies.pattern_for(candidate_line) {
        None => Ok(candidate_line == haystack_line),
        Some(built) => pattern::full_match(&built, haystack_line),
    }
}

/// True when every line of `candidate` matches some line of `run`.
pub fn is_present_in(
    doc: &Document,
    candidate: &str,
    run: &[LineId],
    policies: &PolicySet,
) -> Result<bool, PatternError> {
    for line in candidate.split('\n') {
        let mut found = false;
        for id in run {
            let haystack = doc.get(*id).unwrap_or_default();
            if matches_with_policy(line, haystack, policies)? {
                found = true;
                break;
            }
        }
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}
