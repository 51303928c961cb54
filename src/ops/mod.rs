//! Edit operators.
//!
//! Every operator takes the document, an [`OpContext`] describing where and
//! how it may look, and its own parameters. It mutates the document in place
//! and returns an [`EditReport`]; a no-op is `Ok` with zero edits, never an
//! error.

pub mod column;
pub mod delete;
pub mod insert;
pub mod replace;

pub use column::{edit_column, ColumnEdit, FieldOperation};
pub use delete::delete_lines;
pub use insert::{insert_lines, Anchor, InsertSource, Insertion, Pick, Placement};
pub use replace::{replace_patterns, substitute_line, LineSubstitution, Occurrences, MAX_REPLACEMENTS};

use crate::document::Document;
use crate::expand::Snapshot;
use crate::pattern::PatternError;
use crate::region::{self, Region, RegionError, RegionSpec};
use crate::selector::LineSelector;
use std::path::PathBuf;
use thiserror::Error;

/// Inputs shared by all operators.
#[derive(Debug, Clone, Copy)]
pub struct OpContext<'a> {
    pub region: &'a RegionSpec,
    pub selector: &'a LineSelector,
    pub vars: &'a Snapshot,
}

/// What an operator did to the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "EditReport tells whether the document changed"]
pub struct EditReport {
    /// Number of line-level mutations performed.
    pub edits: usize,
    /// Advisory diagnostics; the edit still happened.
    pub warnings: Vec<String>,
    /// A line hit the per-line substitution cap.
    pub capped: bool,
}

impl EditReport {
    pub fn changed(&self) -> bool {
        self.edits > 0
    }

    pub(crate) fn warn(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("conflicting options: {0}")]
    ValidationConflict(String),

    #[error("could not select an edit region: {reason}")]
    RegionNotFound { reason: String },

    #[error("end pattern '{pattern}' was not found when selecting the edit region")]
    EndNotFound { pattern: String },

    #[error("no line matches the location pattern '{pattern}'")]
    AnchorNotFound { pattern: String },

    #[error(
        "replacement '{replacement}' still matches pattern '{pattern}'; \
         this replacement is not convergent"
    )]
    NonConvergentReplacement {
        pattern: String,
        replacement: String,
        /// Lines already rewritten before the hazard was found.
        applied: usize,
    },

    #[error("line has only {found} fields, but field {wanted} was requested")]
    InsufficientFields { found: usize, wanted: usize },

    #[error("separator '{separator}' does not occur in line '{line}'")]
    NoFieldSeparator { separator: String, line: String },

    #[error("no line matches '{pattern}', nothing to edit")]
    NoLineToEdit { pattern: String },

    #[error("cannot insert lines from directory '{}'", path.display())]
    SourceIsDirectory { path: PathBuf },

    #[error("could not read '{}': {message}", path.display())]
    SourceIo { path: PathBuf, message: String },

    #[error(transparent)]
    InvalidPattern(#[from] PatternError),
}

impl EditError {
    /// Interruptions abandon the promise for this run; everything else is a
    /// failure of the promise itself.
    pub fn is_interruption(&self) -> bool {
        !matches!(
            self,
            EditError::ValidationConflict(_)
                | EditError::InvalidPattern(_)
                | EditError::NoLineToEdit { .. }
        )
    }

    /// Edits already made to the document before the operator stopped.
    pub fn applied_edits(&self) -> usize {
        match self {
            EditError::NonConvergentReplacement { applied, .. } => *applied,
            _ => 0,
        }
    }
}

impl From<RegionError> for EditError {
    fn from(err: RegionError) -> Self {
        match err {
            RegionError::Pattern(e) => EditError::InvalidPattern(e),
            other => EditError::RegionNotFound {
                reason: other.to_string(),
            },
        }
    }
}

/// Resolve the operator's region. With `require_end`, a configured end
/// delimiter that never matched is an error unless end-of-file matching was
/// allowed.
pub(crate) fn resolve_region(
    doc: &Document,
    spec: &RegionSpec,
    require_end: bool,
) -> Result<Region, EditError> {
    let region = region::select_region(doc, spec)?;
    if require_end && region.end_missing() && !spec.select_end_match_eof {
        return Err(EditError::EndNotFound {
            pattern: spec.select_end.clone().unwrap_or_default(),
        });
    }
    Ok(region)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub struct Fixture {
        pub region: RegionSpec,
        pub selector: LineSelector,
        pub vars: Snapshot,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                region: RegionSpec::default(),
                selector: LineSelector::All,
                vars: Snapshot::default(),
            }
        }

        pub fn region(start: Option<&str>, end: Option<&str>) -> Self {
            let mut fixture = Self::new();
            fixture.region.select_start = start.map(String::from);
            fixture.region.select_end = end.map(String::from);
            fixture
        }

        pub fn ctx(&self) -> OpContext<'_> {
            OpContext {
                region: &self.region,
                selector: &self.selector,
                vars: &self.vars,
            }
        }
    }
}
