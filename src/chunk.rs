//! Chunk matching: compare a possibly multi-line block against consecutive
//! document lines.

use crate::document::{Document, LineId};
use crate::pattern::{self, PatternError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Literal string equality per line.
    Exact,
    /// Each block line is a regex that must match the whole document line.
    Regex,
}

/// Match `chunk` line-for-line starting at `anchor`.
///
/// Returns the number of document lines consumed, or `0` when the block does
/// not match. The match fails if the document runs out before the block does
/// or if it would consume `terminator`.
pub fn match_region(
    doc: &Document,
    chunk: &str,
    anchor: LineId,
    terminator: Option<LineId>,
    mode: MatchMode,
) -> Result<usize, PatternError> {
    let mut cursor = Some(anchor);
    let mut lines = 0;

    for candidate in chunk.split('\n') {
        let Some(id) = cursor else {
            return Ok(0);
        };
        if Some(id) == terminator {
            return Ok(0);
        }
        let Some(line) = doc.get(id) else {
            return Ok(0);
        };

        let matched = match mode {
            MatchMode::Exact => candidate == line,
            MatchMode::Regex => pattern::full_match(candidate, line)?,
        };
        if !matched {
            return Ok(0);
        }

        lines += 1;
        cursor = doc.next(id);
    }

    Ok(lines)
}

/// Scan every start position in `run` for `chunk`; returns the first hit.
pub fn find_in_run(
    doc: &Document,
    chunk: &str,
    run: &[LineId],
    terminator: Option<LineId>,
    mode: MatchMode,
) -> Result<Option<(LineId, usize)>, PatternError> {
    for id in run {
        let matched = match_region(doc, chunk, *id, terminator, mode)?;
        if matched > 0 {
            return Ok(Some((*id, matched)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(doc: &Document) -> Vec<LineId> {
        doc.iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn test_single_line_exact() {
        let doc = Document::from_lines(["a", "b"]);
        let ids = ids(&doc);
        assert_eq!(match_region(&doc, "b", ids[1], None, MatchMode::Exact).unwrap(), 1);
        assert_eq!(match_region(&doc, "a", ids[1], None, MatchMode::Exact).unwrap(), 0);
    }

    #[test]
    fn test_multi_line_block() {
        let doc = Document::from_lines(["x", "a", "b", "c"]);
        let ids = ids(&doc);
        assert_eq!(
            match_region(&doc, "a\nb", ids[1], None, MatchMode::Exact).unwrap(),
            2
        );
        assert_eq!(
            match_region(&doc, "a\nc", ids[1], None, MatchMode::Exact).unwrap(),
            0
        );
    }

    #[test]
    fn test_runs_out_of_document() {
        let doc = Document::from_lines(["a", "b"]);
        let ids = ids(&doc);
        assert_eq!(
            match_region(&doc, "b\nc", ids[1], None, MatchMode::Exact).unwrap(),
            0
        );
    }

    #[test]
    fn test_terminator_is_never_consumed() {
        let doc = Document::from_lines(["a", "b", "END"]);
        let ids = ids(&doc);
        assert_eq!(
            match_region(&doc, "b\nEND", ids[1], Some(ids[2]), MatchMode::Exact).unwrap(),
            0
        );
        assert_eq!(
            match_region(&doc, "b\nEND", ids[1], None, MatchMode::Exact).unwrap(),
            2
        );
    }

    #[test]
    fn test_regex_mode_matches_full_lines() {
        let doc = Document::from_lines(["# one", "# two", "code"]);
        let ids = ids(&doc);
        assert_eq!(
            match_region(&doc, "#.*\n#.*", ids[0], None, MatchMode::Regex).unwrap(),
            2
        );
        assert_eq!(match_region(&doc, "#", ids[0], None, MatchMode::Regex).unwrap(), 0);
    }

    #[test]
    fn test_find_in_run() {
        let doc = Document::from_lines(["a", "b", "c", "b"]);
        let ids = ids(&doc);
        let hit = find_in_run(&doc, "b\nc", &ids, None, MatchMode::Exact).unwrap();
        assert_eq!(hit, Some((ids[1], 2)));
        assert_eq!(
            find_in_run(&doc, "z", &ids, None, MatchMode::Exact).unwrap(),
            None
        );
    }
}
