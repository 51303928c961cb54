//! Line insertion.
//!
//! Insertion is where convergence is hardest: before adding anything the
//! operator decides whether the payload is already present, either anywhere
//! in the region or, for block-preserving sources, right next to the
//! insertion point.

use super::{resolve_region, EditError, EditReport, OpContext};
use crate::chunk::{self, MatchMode};
use crate::document::{Document, LineId};
use crate::pattern;
use crate::region::Region;
use crate::whitespace::{self, PolicySet};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Where the inserted text comes from and how duplicates are judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertSource {
    /// The promiser text; each line is inserted unless already in the region.
    #[default]
    Literal,
    /// Lines read from the file named by the promiser.
    File,
    /// Like `File`, but the block is kept together and only compared with
    /// its neighbourhood.
    FilePreserveBlock,
    /// Literal block compared only with its neighbourhood.
    PreserveBlock,
    /// Literal lines inserted without any duplicate check.
    PreserveAllLines,
}

impl InsertSource {
    pub fn is_file(self) -> bool {
        matches!(self, InsertSource::File | InsertSource::FilePreserveBlock)
    }

    pub fn preserves_block(self) -> bool {
        matches!(
            self,
            InsertSource::PreserveBlock | InsertSource::FilePreserveBlock
        )
    }

    pub fn allows_duplicates(self) -> bool {
        self == InsertSource::PreserveAllLines
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    First,
    #[default]
    Last,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Before,
    #[default]
    After,
}

/// Line used as the reference point for an insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub pattern: String,
    pub pick: Pick,
}

/// Parameters of one insertion.
#[derive(Debug, Clone)]
pub struct Insertion<'a> {
    /// Literal text, or the source path for file sources.
    pub promiser: &'a str,
    pub source: InsertSource,
    pub anchor: Option<&'a Anchor>,
    pub placement: Placement,
    pub policies: &'a PolicySet,
    /// Expand variables in lines read from a source file.
    pub expand_vars: bool,
}

/// Position new lines are spliced at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertionPoint {
    Head,
    After(LineId),
}

impl InsertionPoint {
    fn after(id: Option<LineId>) -> Self {
        id.map_or(InsertionPoint::Head, InsertionPoint::After)
    }
}

pub fn insert_lines(
    doc: &mut Document,
    ctx: &OpContext<'_>,
    insertion: &Insertion<'_>,
) -> Result<EditReport, EditError> {
    check_options(insertion)?;

    let region = resolve_region(doc, ctx.region, true)?;
    let payload = load_payload(ctx, insertion)?;
    let mut report = EditReport::default();

    if payload.is_empty() {
        return Ok(report);
    }

    let run = region.lines(doc);
    let (point, anchor) = locate(doc, &region, &run, insertion)?;

    let block = payload.join("\n");
    let source = insertion.source;

    if !source.allows_duplicates() {
        let already = if source.preserves_block() && anchor.is_some() {
            neighbour_matches(doc, &block, payload.len(), anchor, insertion.placement)?
        } else {
            let terminator = region.terminator(doc);
            chunk::find_in_run(doc, &block, &run, terminator, MatchMode::Exact)?.is_some()
        };
        if already {
            tracing::debug!(
                target: "edit.insert",
                promiser = insertion.promiser,
                "promised chunk exists within the selected region"
            );
            return Ok(report);
        }
    }

    let check_each_line = !source.preserves_block() && !source.allows_duplicates();
    let mut cursor = point;

    for line in &payload {
        if !ctx.selector.selects(line)? {
            continue;
        }
        if check_each_line && whitespace::is_present_in(doc, line, &run, insertion.policies)? {
            tracing::debug!(target: "edit.insert", line = %line, "promised line exists within the region");
            continue;
        }

        let inserted = match cursor {
            InsertionPoint::Head => Some(doc.push_front(line.as_str())),
            InsertionPoint::After(prev) => doc.insert_after(prev, line.as_str()),
        };
        let Some(inserted) = inserted else {
            break;
        };
        tracing::info!(target: "edit.insert", line = %line, "inserted the promised line");
        report.edits += 1;
        cursor = InsertionPoint::After(inserted);
    }

    Ok(report)
}

fn check_options(insertion: &Insertion<'_>) -> Result<(), EditError> {
    if insertion.policies.has_conflict() {
        return Err(EditError::ValidationConflict(
            "exact_match cannot be combined with other whitespace policies".into(),
        ));
    }
    if insertion.source == InsertSource::PreserveBlock && !insertion.policies.is_exact() {
        return Err(EditError::ValidationConflict(
            "whitespace policies cannot be used with a preserve_block source".into(),
        ));
    }
    Ok(())
}

/// Payload lines: the literal promiser split on newlines, or the content of
/// the source file.
fn load_payload(ctx: &OpContext<'_>, insertion: &Insertion<'_>) -> Result<Vec<String>, EditError> {
    if !insertion.source.is_file() {
        return Ok(insertion.promiser.split('\n').map(String::from).collect());
    }

    let path = Path::new(insertion.promiser);
    if path.is_dir() {
        tracing::error!(target: "edit.insert", path = %path.display(), "could not insert lines from a directory");
        return Err(EditError::SourceIsDirectory {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path).map_err(|e| EditError::SourceIo {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut lines = Vec::new();
    for raw in crate::io::split_lines(&content) {
        let line = if insertion.expand_vars {
            ctx.vars.expand(&raw)
        } else {
            raw
        };
        // Expansion may introduce line breaks.
        lines.extend(line.split('\n').map(String::from));
    }
    Ok(lines)
}

/// Resolve the insertion point and, when an anchor is configured, the
/// anchor line itself.
fn locate(
    doc: &Document,
    region: &Region,
    run: &[LineId],
    insertion: &Insertion<'_>,
) -> Result<(InsertionPoint, Option<LineId>), EditError> {
    if doc.is_empty() {
        return Ok((InsertionPoint::Head, None));
    }

    let Some(anchor) = insertion.anchor else {
        let point = match (insertion.placement, run.first(), run.last()) {
            (Placement::Before, Some(first), _) => InsertionPoint::after(doc.prev(*first)),
            (Placement::After, _, Some(last)) => InsertionPoint::After(*last),
            _ => InsertionPoint::after(region.start_slot(doc)),
        };
        return Ok((point, None));
    };

    let mut found = None;
    for id in run {
        let line = doc.get(*id).unwrap_or_default();
        if pattern::full_match(&anchor.pattern, line)? {
            found = Some(*id);
            if anchor.pick == Pick::First {
                break;
            }
        }
    }

    let Some(line) = found else {
        tracing::error!(
            target: "edit.insert",
            pattern = %anchor.pattern,
            "could not select a locator matching the pattern"
        );
        return Err(EditError::AnchorNotFound {
            pattern: anchor.pattern.clone(),
        });
    };

    let point = match insertion.placement {
        Placement::Before => InsertionPoint::after(doc.prev(line)),
        Placement::After => InsertionPoint::After(line),
    };
    Ok((point, Some(line)))
}

/// Compare `block` with the lines directly after the anchor, or the
/// `len` lines directly before it.
fn neighbour_matches(
    doc: &Document,
    block: &str,
    len: usize,
    anchor: Option<LineId>,
    placement: Placement,
) -> Result<bool, EditError> {
    let Some(anchor) = anchor else {
        return Ok(false);
    };

    let start = match placement {
        Placement::After => doc.next(anchor),
        Placement::Before => {
            let mut start = Some(anchor);
            for _ in 0..len {
                start = start.and_then(|id| doc.prev(id));
            }
            start
        }
    };
    let Some(start) = start else {
        return Ok(false);
    };

    let terminator = match placement {
        Placement::Before => Some(anchor),
        Placement::After => None,
    };
    Ok(chunk::match_region(doc, block, start, terminator, MatchMode::Exact)? > 0)
}
