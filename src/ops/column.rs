//! Column (field) editing of delimited lines such as `/etc/passwd` or
//! `/etc/group`.

use super::{resolve_region, EditError, EditReport, OpContext};
use crate::document::Document;
use crate::pattern;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOperation {
    Set,
    #[default]
    Append,
    Prepend,
    Delete,
    /// Insert the value if missing, then sort the entries.
    Alphanum,
}

/// Parameters of one field edit.
#[derive(Debug, Clone)]
pub struct ColumnEdit<'a> {
    /// Lines to edit; must match the whole line.
    pub select_line: &'a str,
    /// Regex separating fields.
    pub separator: &'a str,
    /// 1-based field index.
    pub field: usize,
    /// Splits a field into a list of values.
    pub value_separator: Option<char>,
    pub value: &'a str,
    pub operation: FieldOperation,
    /// Pad short lines with empty fields instead of failing.
    pub extend_fields: bool,
}

/// A line cut into fields, keeping the exact separator text between them.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fields {
    values: Vec<String>,
    separators: Vec<String>,
}

impl Fields {
    fn split(separator: &str, line: &str) -> Result<Option<Self>, EditError> {
        let mut values = Vec::new();
        let mut separators = Vec::new();
        let mut last = 0;

        for (start, end) in pattern::find_all(separator, line)? {
            if start == end {
                continue;
            }
            values.push(line[last..start].to_string());
            separators.push(line[start..end].to_string());
            last = end;
        }

        if separators.is_empty() {
            return Ok(None);
        }
        values.push(line[last..].to_string());
        Ok(Some(Self { values, separators }))
    }

    fn extend_to(&mut self, count: usize) {
        let filler = self.separators.first().cloned().unwrap_or_default();
        while self.values.len() < count {
            self.separators.push(filler.clone());
            self.values.push(String::new());
        }
    }

    fn join(&self) -> String {
        let mut out = String::new();
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                out.push_str(&self.separators[i - 1]);
            }
            out.push_str(value);
        }
        out
    }
}

/// Apply `operation` to the list of values held in one field.
fn edit_list(field: &str, sep: char, value: &str, operation: FieldOperation) -> String {
    let mut list: Vec<String> = if field.is_empty() {
        Vec::new()
    } else {
        field.split(sep).map(String::from).collect()
    };

    let present = list.iter().any(|entry| entry == value);
    match operation {
        FieldOperation::Delete => list.retain(|entry| entry != value),
        FieldOperation::Set => {
            let already = (list.len() == 1 && list[0] == value) || (list.is_empty() && value.is_empty());
            if !already {
                list = vec![value.to_string()];
            }
        }
        FieldOperation::Prepend => {
            if !present {
                list.insert(0, value.to_string());
            }
        }
        FieldOperation::Append => {
            if !present {
                list.push(value.to_string());
            }
        }
        FieldOperation::Alphanum => {
            if !present {
                list.insert(0, value.to_string());
            }
            list.sort();
        }
    }

    list.join(&sep.to_string())
}

fn edit_field(field: &str, edit: &ColumnEdit<'_>) -> String {
    match (edit.value_separator, edit.operation) {
        (Some(sep), operation) => edit_list(field, sep, edit.value, operation),
        (None, FieldOperation::Delete) => String::new(),
        (None, _) => edit.value.to_string(),
    }
}

/// Edit field `edit.field` of every region line fully matching
/// `edit.select_line`.
pub fn edit_column(
    doc: &mut Document,
    ctx: &OpContext<'_>,
    edit: &ColumnEdit<'_>,
) -> Result<EditReport, EditError> {
    if edit.field == 0 {
        return Err(EditError::ValidationConflict(
            "field numbers start at 1".into(),
        ));
    }
    if edit.separator.is_empty() {
        return Err(EditError::ValidationConflict(
            "a field separator is required".into(),
        ));
    }

    let region = resolve_region(doc, ctx.region, false)?;
    let mut report = EditReport::default();
    let mut selected = false;

    for id in region.lines(doc) {
        let Some(line) = doc.get(id) else {
            continue;
        };
        if !ctx.selector.selects(line)? || !pattern::full_match(edit.select_line, line)? {
            continue;
        }
        selected = true;

        let Some(mut fields) = Fields::split(edit.separator, line)? else {
            tracing::error!(
                target: "edit.column",
                separator = edit.separator,
                line = %line,
                "field separator not found in line"
            );
            return Err(EditError::NoFieldSeparator {
                separator: edit.separator.to_string(),
                line: line.to_string(),
            });
        };

        if fields.values.len() < edit.field {
            if !edit.extend_fields {
                return Err(EditError::InsufficientFields {
                    found: fields.values.len(),
                    wanted: edit.field,
                });
            }
            fields.extend_to(edit.field);
        }

        let index = edit.field - 1;
        fields.values[index] = edit_field(&fields.values[index], edit);

        let rewritten = fields.join();
        if rewritten != line {
            tracing::info!(
                target: "edit.column",
                field = edit.field,
                before = %line,
                after = %rewritten,
                "edited field"
            );
            doc.set(id, rewritten);
            report.edits += 1;
        }
    }

    if !selected {
        return Err(EditError::NoLineToEdit {
            pattern: edit.select_line.to_string(),
        });
    }
    Ok(report)
}
