//! Region selection: the sub-range of a document an operator is scoped to.

use crate::document::{Document, LineId};
use crate::pattern::{self, PatternError};
use serde::Deserialize;
use thiserror::Error;

/// Start/end delimiters of an edit region, as declared on a promise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegionSpec {
    #[serde(default)]
    pub select_start: Option<String>,
    #[serde(default)]
    pub select_end: Option<String>,
    /// Treat the start delimiter line as part of the editable range.
    #[serde(default)]
    pub include_start: bool,
    /// Treat the end delimiter line as part of the editable range.
    #[serde(default)]
    pub include_end: bool,
    /// A missing end delimiter is acceptable and means end-of-file.
    #[serde(default)]
    pub select_end_match_eof: bool,
}

/// Where a resolved region stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionEnd {
    /// The end delimiter matched this line.
    Line(LineId),
    /// No end delimiter is configured.
    EndOfDocument,
    /// An end delimiter is configured but never matched; the region runs to
    /// end-of-file.
    NotFound,
}

/// A view over document positions; it owns no lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Start delimiter line. `None` means the region opens at the document
    /// head with no delimiter to exclude.
    pub begin: Option<LineId>,
    pub end: RegionEnd,
    pub include_start: bool,
    pub include_end: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("start pattern '{pattern}' was not found")]
    StartNotFound { pattern: String },

    #[error("start pattern '{pattern}' matched the last line, leaving an empty region")]
    EmptyAtEnd { pattern: String },

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

impl Region {
    /// The whole document, start to end.
    pub fn whole() -> Self {
        Self {
            begin: None,
            end: RegionEnd::EndOfDocument,
            include_start: true,
            include_end: true,
        }
    }

    /// True when an end delimiter was configured but not found.
    pub fn end_missing(&self) -> bool {
        self.end == RegionEnd::NotFound
    }

    /// First editable line, after applying `include_start`.
    pub fn first_line(&self, doc: &Document) -> Option<LineId> {
        match self.begin {
            None => doc.first(),
            Some(begin) if self.include_start => Some(begin),
            Some(begin) => doc.next(begin),
        }
    }

    /// Exclusive boundary of the editable run; `None` is end-of-document.
    pub fn terminator(&self, doc: &Document) -> Option<LineId> {
        match self.end {
            RegionEnd::Line(end) if self.include_end => doc.next(end),
            RegionEnd::Line(end) => Some(end),
            RegionEnd::EndOfDocument | RegionEnd::NotFound => None,
        }
    }

    /// The line the editable run starts after (`None` = document head).
    /// Used to place insertions into a region that is currently empty.
    pub fn start_slot(&self, doc: &Document) -> Option<LineId> {
        match self.begin {
            None => None,
            Some(begin) if self.include_start => doc.prev(begin),
            Some(begin) => Some(begin),
        }
    }

    /// Line ids of the editable run in document order.
    pub fn lines(&self, doc: &Document) -> Vec<LineId> {
        doc.run(self.first_line(doc), self.terminator(doc))
    }
}

/// Resolve `spec` against `doc` with a single forward scan.
///
/// The first line fully matching `select_start` opens the region; the first
/// later line fully matching `select_end` closes it. A configured end pattern
/// that never matches still succeeds, reported as [`RegionEnd::NotFound`], so
/// callers that require a terminator can tell it apart from end-of-file.
pub fn select_region(doc: &Document, spec: &RegionSpec) -> Result<Region, RegionError> {
    let mut begin = None;
    let scan_from = match &spec.select_start {
        Some(start) => {
            for (id, line) in doc.iter() {
                if pattern::full_match(start, line)? {
                    if !spec.include_start && doc.next(id).is_none() {
                        tracing::debug!(
                            target: "edit.region",
                            pattern = %start,
                            "start pattern found an empty region at the end of file"
                        );
                        return Err(RegionError::EmptyAtEnd {
                            pattern: start.clone(),
                        });
                    }
                    begin = Some(id);
                    break;
                }
            }
            let Some(found) = begin else {
                tracing::debug!(
                    target: "edit.region",
                    pattern = %start,
                    "start pattern not found when selecting edit region"
                );
                return Err(RegionError::StartNotFound {
                    pattern: start.clone(),
                });
            };
            doc.next(found)
        }
        None => doc.first(),
    };

    let end = match &spec.select_end {
        Some(end_pattern) => {
            let mut end = RegionEnd::NotFound;
            for id in doc.run(scan_from, None) {
                let line = doc.get(id).unwrap_or_default();
                if pattern::full_match(end_pattern, line)? {
                    end = RegionEnd::Line(id);
                    break;
                }
            }
            end
        }
        None => RegionEnd::EndOfDocument,
    };

    Ok(Region {
        begin,
        end,
        include_start: spec.include_start,
        include_end: spec.include_end,
    })
}
