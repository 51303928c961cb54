//! Line deletion.

use super::{resolve_region, EditError, EditReport, OpContext};
use crate::chunk::{self, MatchMode};
use crate::document::Document;

/// Delete every line (or multi-line run) in the region that matches
/// `pattern`, or with `not_matching`, every single line that does not.
///
/// The region's lines are collected before anything is removed, so removing
/// one match never shifts the scan.
pub fn delete_lines(
    doc: &mut Document,
    ctx: &OpContext<'_>,
    pattern: &str,
    not_matching: bool,
) -> Result<EditReport, EditError> {
    if not_matching && pattern.contains('\n') {
        return Err(EditError::ValidationConflict(
            "a multi-line deletion pattern cannot be combined with not_matching".into(),
        ));
    }

    let region = resolve_region(doc, ctx.region, true)?;
    let terminator = region.terminator(doc);
    let mut report = EditReport::default();

    for id in region.lines(doc) {
        let Some(line) = doc.get(id) else {
            // Already removed as part of an earlier multi-line match.
            continue;
        };
        if !ctx.selector.selects(line)? {
            continue;
        }

        let matched = chunk::match_region(doc, pattern, id, terminator, MatchMode::Regex)?;
        let remove = match (not_matching, matched) {
            (false, 0) => 0,
            (false, n) => n,
            (true, 0) => 1,
            (true, _) => 0,
        };

        let mut cursor = Some(id);
        for _ in 0..remove {
            let Some(current) = cursor else { break };
            cursor = doc.next(current);
            if let Some(text) = doc.remove(current) {
                tracing::info!(target: "edit.delete", line = %text, "deleted the promised line");
                report.edits += 1;
            }
        }
    }

    if !report.changed() {
        tracing::debug!(target: "edit.delete", pattern, "no lines to delete");
    }
    Ok(report)
}
