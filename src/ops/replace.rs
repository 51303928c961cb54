//! Pattern replacement within lines.

use super::{resolve_region, EditError, EditReport, OpContext};
use crate::document::Document;
use crate::pattern::{self, PatternError};
use serde::Deserialize;

/// Upper bound on substitutions performed on a single line.
pub const MAX_REPLACEMENTS: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occurrences {
    #[default]
    All,
    /// One substitution per line. Not convergent unless the replacement
    /// stops the pattern from matching.
    First,
}

/// Result of rewriting a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSubstitution {
    pub text: String,
    pub count: usize,
    /// Substitution stopped at [`MAX_REPLACEMENTS`] with matches remaining.
    pub capped: bool,
}

/// Substitute `replacement` for matches of `pattern` in `line`.
///
/// Every substitution restarts the search at the start of the rewritten
/// line, so replacements that expose a new match are folded in the same
/// run. The loop stops when nothing matches, when the leftmost match
/// already reads as the replacement, or at the occurrence limit.
pub fn substitute_line(
    pattern: &str,
    line: &str,
    replacement: &str,
    occurrences: Occurrences,
) -> Result<LineSubstitution, PatternError> {
    let limit = match occurrences {
        Occurrences::All => MAX_REPLACEMENTS,
        Occurrences::First => 1,
    };

    let mut text = line.to_string();
    let mut count = 0;
    let mut capped = false;

    while let Some((start, end)) = pattern::bounded_match(pattern, &text)? {
        if &text[start..end] == replacement {
            if start == 0 && end == text.len() {
                tracing::trace!(
                    target: "edit.replace",
                    line = %text,
                    "whole line already matches as the replacement, accepting"
                );
            }
            break;
        }
        if count == limit {
            capped = occurrences == Occurrences::All;
            break;
        }

        text.replace_range(start..end, replacement);
        count += 1;
    }

    Ok(LineSubstitution {
        text,
        count,
        capped,
    })
}

/// Replace `pattern` with the expanded `replacement` on every region line.
pub fn replace_patterns(
    doc: &mut Document,
    ctx: &OpContext<'_>,
    pattern: &str,
    replacement: &str,
    occurrences: Occurrences,
) -> Result<EditReport, EditError> {
    let region = resolve_region(doc, ctx.region, false)?;
    let replacement = ctx.vars.expand(replacement);
    let mut report = EditReport::default();

    if occurrences == Occurrences::First {
        tracing::warn!(
            target: "edit.replace",
            pattern,
            "replacing only the first occurrence on each line is not convergent"
        );
        report.warn(format!(
            "replacing only the first occurrence of '{pattern}' is not convergent"
        ));
    }

    for id in region.lines(doc) {
        let Some(line) = doc.get(id) else {
            continue;
        };
        if !ctx.selector.selects(line)? {
            continue;
        }
        if pattern::bounded_match(pattern, line)?.is_none() {
            continue;
        }

        let substitution = substitute_line(pattern, line, &replacement, occurrences)?;
        if substitution.capped {
            tracing::debug!(
                target: "edit.replace",
                line = %line,
                limit = MAX_REPLACEMENTS,
                "too many replacements on this line"
            );
            report.capped = true;
        }

        if !pattern::is_anchored(pattern) && pattern::bounded_match(pattern, &replacement)?.is_some() {
            tracing::error!(
                target: "edit.replace",
                pattern,
                replacement = %replacement,
                "promised replacement matches the pattern it replaces; this is not convergent"
            );
            return Err(EditError::NonConvergentReplacement {
                pattern: pattern.to_string(),
                replacement,
                applied: report.edits,
            });
        }

        if pattern::bounded_match(pattern, &substitution.text)?.is_some() {
            tracing::warn!(
                target: "edit.replace",
                pattern,
                line = %substitution.text,
                "edited line still matches the pattern; promise is not properly convergent"
            );
            report.warn(format!(
                "line '{}' still matches '{pattern}' after replacement",
                substitution.text
            ));
        }

        if substitution.text != line {
            tracing::info!(
                target: "edit.replace",
                before = %line,
                after = %substitution.text,
                "replaced pattern in line"
            );
            doc.set(id, substitution.text);
            report.edits += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;
    use crate::expand::Context;

    #[test]
    fn test_replace_every_occurrence() {
        let sub = substitute_line("o", "foo boo", "0", Occurrences::All).unwrap();
        assert_eq!(sub.text, "f00 b00");
        assert_eq!(sub.count, 4);
        assert!(!sub.capped);
    }

    #[test]
    fn test_first_occurrence_only() {
        let sub = substitute_line("o", "foo", "0", Occurrences::First).unwrap();
        assert_eq!(sub.text, "f0o");
        assert_eq!(sub.count, 1);
        assert!(!sub.capped);
    }

    #[test]
    fn test_zero_width_pattern_hits_cap() {
        let line = "a".repeat(40);
        let sub = substitute_line("x*", &line, "-", Occurrences::All).unwrap();
        assert_eq!(sub.count, MAX_REPLACEMENTS);
        assert!(sub.capped);
    }

    #[test]
    fn test_replacement_containing_match_stops_at_cap() {
        let sub = substitute_line("a", "aaa", "aa", Occurrences::All).unwrap();
        assert_eq!(sub.count, MAX_REPLACEMENTS);
        assert_eq!(sub.text, "a".repeat(3 + MAX_REPLACEMENTS));
        assert!(sub.capped);
    }

    #[test]
    fn test_cascading_matches_fold_in_one_run() {
        let sub = substitute_line("ab", "abb", "a", Occurrences::All).unwrap();
        assert_eq!(sub.text, "a");
        assert_eq!(sub.count, 2);
        assert!(!sub.capped);

        let mut doc = Document::from_lines(["abbb x", "cab"]);
        let fixture = Fixture::new();
        let report =
            replace_patterns(&mut doc, &fixture.ctx(), "ab", "a", Occurrences::All).unwrap();
        assert_eq!(report.edits, 2);
        assert!(doc.lines_eq(&["a x", "ca"]));

        let report =
            replace_patterns(&mut doc, &fixture.ctx(), "ab", "a", Occurrences::All).unwrap();
        assert_eq!(report.edits, 0);
    }

    #[test]
    fn test_line_reading_as_replacement_is_accepted() {
        let sub = substitute_line("^x+$", "xx", "xx", Occurrences::All).unwrap();
        assert_eq!(sub.text, "xx");
        assert_eq!(sub.count, 0);
        assert!(!sub.capped);

        let sub = substitute_line("^x+$", "x", "xx", Occurrences::All).unwrap();
        assert_eq!(sub.text, "xx");
        assert_eq!(sub.count, 1);
    }

    #[test]
    fn test_empty_replacement_of_zero_width_match_stops() {
        let sub = substitute_line("x*", "abc", "", Occurrences::All).unwrap();
        assert_eq!(sub.text, "abc");
        assert_eq!(sub.count, 0);
    }

    #[test]
    fn test_replace_in_document_is_convergent() {
        let mut doc = Document::from_lines(["PermitRootLogin yes", "Port 22"]);
        let fixture = Fixture::new();
        let report = replace_patterns(
            &mut doc,
            &fixture.ctx(),
            "PermitRootLogin yes",
            "PermitRootLogin no",
            Occurrences::All,
        )
        .unwrap();
        assert_eq!(report.edits, 1);
        assert!(doc.lines_eq(&["PermitRootLogin no", "Port 22"]));

        let report = replace_patterns(
            &mut doc,
            &fixture.ctx(),
            "PermitRootLogin yes",
            "PermitRootLogin no",
            Occurrences::All,
        )
        .unwrap();
        assert!(!report.changed());
    }

    #[test]
    fn test_unanchored_self_matching_replacement_interrupts() {
        let mut doc = Document::from_lines(["ab", "ab"]);
        let fixture = Fixture::new();
        let err = replace_patterns(&mut doc, &fixture.ctx(), "a", "aa", Occurrences::All)
            .unwrap_err();
        assert!(matches!(
            err,
            EditError::NonConvergentReplacement { applied: 0, .. }
        ));
        assert!(doc.lines_eq(&["ab", "ab"]));
    }

    #[test]
    fn test_anchored_self_match_is_advisory() {
        let mut doc = Document::from_lines(["x"]);
        let fixture = Fixture::new();
        let report =
            replace_patterns(&mut doc, &fixture.ctx(), "^x+$", "xx", Occurrences::All).unwrap();
        assert_eq!(report.edits, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(doc.lines_eq(&["xx"]));
    }

    #[test]
    fn test_first_mode_warns() {
        let mut doc = Document::from_lines(["a a"]);
        let fixture = Fixture::new();
        let report =
            replace_patterns(&mut doc, &fixture.ctx(), "a", "b", Occurrences::First).unwrap();
        assert!(doc.lines_eq(&["b a"]));
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn test_replacement_is_expanded() {
        let mut context = Context::new();
        context.define_var("port", "2222");
        let mut fixture = Fixture::new();
        fixture.vars = context.snapshot();
        let mut doc = Document::from_lines(["Port 22"]);
        replace_patterns(&mut doc, &fixture.ctx(), "^Port 22$", "Port $(port)", Occurrences::All)
            .unwrap();
        assert!(doc.lines_eq(&["Port 2222"]));
    }

    #[test]
    fn test_region_limits_replacement() {
        let mut doc = Document::from_lines(["v=1", "[s]", "v=1", "[t]", "v=1"]);
        let fixture = Fixture::region(Some(r"\[s\]"), Some(r"\[.*\]"));
        replace_patterns(&mut doc, &fixture.ctx(), "v=1", "v=2", Occurrences::All).unwrap();
        assert!(doc.lines_eq(&["v=1", "[s]", "v=2", "[t]", "v=1"]));
    }
}
