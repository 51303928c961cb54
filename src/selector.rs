//! Optional line selection filter applied before any structural edit looks
//! at a line.

use crate::pattern::{self, PatternError};
use serde::Deserialize;

/// Selector lists as declared on a promise. At most one negative list may be
/// set, and positive lists cannot be mixed with negative ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SelectorSpec {
    #[serde(default)]
    pub start_with: Option<Vec<String>>,
    #[serde(default)]
    pub not_start_with: Option<Vec<String>>,
    #[serde(default)]
    pub r#match: Option<Vec<String>>,
    #[serde(default)]
    pub not_match: Option<Vec<String>>,
    #[serde(default)]
    pub contains: Option<Vec<String>>,
    #[serde(default)]
    pub not_contains: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    StartWith,
    Match,
    Contains,
}

/// Resolved filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LineSelector {
    #[default]
    All,
    Select {
        kind: SelectorKind,
        negated: bool,
        values: Vec<String>,
    },
}

impl SelectorSpec {
    pub fn is_empty(&self) -> bool {
        self.positives().next().is_none() && self.negatives().next().is_none()
    }

    fn positives(&self) -> impl Iterator<Item = (SelectorKind, &Vec<String>)> {
        [
            (SelectorKind::StartWith, self.start_with.as_ref()),
            (SelectorKind::Match, self.r#match.as_ref()),
            (SelectorKind::Contains, self.contains.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, values)| values.map(|v| (kind, v)))
    }

    fn negatives(&self) -> impl Iterator<Item = (SelectorKind, &Vec<String>)> {
        [
            (SelectorKind::StartWith, self.not_start_with.as_ref()),
            (SelectorKind::Match, self.not_match.as_ref()),
            (SelectorKind::Contains, self.not_contains.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, values)| values.map(|v| (kind, v)))
    }

    /// Conflicts that make the selection meaningless.
    pub fn conflicts(&self) -> Vec<&'static str> {
        let mut problems = Vec::new();
        let negatives = self.negatives().count();
        if negatives > 1 {
            problems.push("negative line selectors are mutually exclusive (only one is allowed)");
        }
        if negatives > 0 && self.positives().next().is_some() {
            problems.push("cannot mix positive and negative line selectors");
        }
        problems
    }

    /// Resolve to a filter. The first configured list wins, in the order
    /// start-with, match, contains, then their negations.
    pub fn resolve(&self) -> LineSelector {
        if let Some((kind, values)) = self.positives().next() {
            return LineSelector::Select {
                kind,
                negated: false,
                values: values.clone(),
            };
        }
        if let Some((kind, values)) = self.negatives().next() {
            return LineSelector::Select {
                kind,
                negated: true,
                values: values.clone(),
            };
        }
        LineSelector::All
    }
}

impl LineSelector {
    /// Whether `line` passes the filter.
    pub fn selects(&self, line: &str) -> Result<bool, PatternError> {
        let LineSelector::Select {
            kind,
            negated,
            values,
        } = self
        else {
            return Ok(true);
        };

        let mut hit = false;
        for value in values {
            let found = match kind {
                SelectorKind::StartWith => line.starts_with(value.as_str()),
                SelectorKind::Match => pattern::full_match(value, line)?,
                SelectorKind::Contains => pattern::bounded_match(value, line)?.is_some(),
            };
            if found {
                hit = true;
                break;
            }
        }
        Ok(hit != *negated)
    }

    /// Patterns that must compile for this selector to be usable.
    pub fn patterns(&self) -> &[String] {
        match self {
            LineSelector::Select {
                kind: SelectorKind::Match | SelectorKind::Contains,
                values,
                ..
            } => values,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(values: &[&str]) -> Option<Vec<String>> {
        Some(values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn test_all_selects_everything() {
        assert!(LineSelector::All.selects("anything").unwrap());
        assert_eq!(SelectorSpec::default().resolve(), LineSelector::All);
    }

    #[test]
    fn test_start_with_and_negation() {
        let spec = SelectorSpec {
            start_with: list(&["#", ";"]),
            ..SelectorSpec::default()
        };
        let selector = spec.resolve();
        assert!(selector.selects("# comment").unwrap());
        assert!(selector.selects("; comment").unwrap());
        assert!(!selector.selects("code").unwrap());

        let spec = SelectorSpec {
            not_start_with: list(&["#"]),
            ..SelectorSpec::default()
        };
        let selector = spec.resolve();
        assert!(!selector.selects("# comment").unwrap());
        assert!(selector.selects("code").unwrap());
    }

    #[test]
    fn test_match_is_full_line() {
        let spec = SelectorSpec {
            r#match: list(&["key=.*"]),
            ..SelectorSpec::default()
        };
        let selector = spec.resolve();
        assert!(selector.selects("key=1").unwrap());
        assert!(!selector.selects(" key=1").unwrap());
    }

    #[test]
    fn test_contains_is_substring_regex() {
        let spec = SelectorSpec {
            not_contains: list(&["secret"]),
            ..SelectorSpec::default()
        };
        let selector = spec.resolve();
        assert!(!selector.selects("a secret value").unwrap());
        assert!(selector.selects("public").unwrap());
    }

    #[test]
    fn test_conflicts() {
        let two_negatives = SelectorSpec {
            not_match: list(&["a"]),
            not_contains: list(&["b"]),
            ..SelectorSpec::default()
        };
        assert_eq!(two_negatives.conflicts().len(), 1);

        let mixed = SelectorSpec {
            start_with: list(&["a"]),
            not_contains: list(&["b"]),
            ..SelectorSpec::default()
        };
        assert_eq!(mixed.conflicts().len(), 1);

        let positives = SelectorSpec {
            start_with: list(&["a"]),
            contains: list(&["b"]),
            ..SelectorSpec::default()
        };
        assert!(positives.conflicts().is_empty());
        assert!(matches!(
            positives.resolve(),
            LineSelector::Select {
                kind: SelectorKind::StartWith,
                ..
            }
        ));
    }
}
