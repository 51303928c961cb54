use crate::expand::Context;
use crate::io::{BackupPolicy, LoadOptions, DEFAULT_MAX_FILE_SIZE};
use crate::ops::{Anchor, FieldOperation, InsertSource, Occurrences, Pick, Placement};
use crate::pattern;
use crate::region::RegionSpec;
use crate::selector::SelectorSpec;
use crate::whitespace::{PolicySet, WhitespacePolicy};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// A bundle of edit promises for one file.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct EditBundle {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub edit_defaults: EditDefaults,
    #[serde(default)]
    pub vars: Vec<VarPromise>,
    #[serde(default)]
    pub classes: Vec<ClassPromise>,
    #[serde(default)]
    pub delete_lines: Vec<DeletePromise>,
    #[serde(default)]
    pub field_edits: Vec<FieldEditPromise>,
    #[serde(default)]
    pub insert_lines: Vec<InsertPromise>,
    #[serde(default)]
    pub replace_patterns: Vec<ReplacePromise>,
    #[serde(default)]
    pub reports: Vec<ReportPromise>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Target file; may be supplied on the command line instead.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EditDefaults {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub empty_before_use: bool,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub backup: BackupPolicy,
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

impl Default for EditDefaults {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            empty_before_use: false,
            create: false,
            backup: BackupPolicy::None,
        }
    }
}

impl EditDefaults {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            max_file_size: self.max_file_size,
            empty_before_use: self.empty_before_use,
            create: self.create,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VarPromise {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Defines a class when all configured conditions hold.
#[derive(Debug, Deserialize, Clone)]
pub struct ClassPromise {
    pub name: String,
    /// Some document line fully matches this pattern.
    #[serde(default)]
    pub line_matching: Option<String>,
    /// Every listed class is defined.
    #[serde(default)]
    pub and: Option<Vec<String>>,
    /// At least one listed class is defined.
    #[serde(default)]
    pub or: Option<Vec<String>>,
    /// The named class is not defined.
    #[serde(default)]
    pub not: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeletePromise {
    pub promiser: String,
    #[serde(default)]
    pub not_matching: bool,
    #[serde(default)]
    pub if_class: Option<String>,
    #[serde(default)]
    pub region: RegionSpec,
    #[serde(flatten)]
    pub selector: SelectorSpec,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Location {
    #[serde(default)]
    pub line_matching: Option<String>,
    #[serde(default)]
    pub first_last: Pick,
    #[serde(default)]
    pub before_after: Placement,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InsertPromise {
    pub promiser: String,
    #[serde(default)]
    pub source: InsertSource,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub whitespace_policy: Vec<WhitespacePolicy>,
    #[serde(default)]
    pub expand_vars: bool,
    #[serde(default)]
    pub if_class: Option<String>,
    #[serde(default)]
    pub region: RegionSpec,
    #[serde(flatten)]
    pub selector: SelectorSpec,
}

impl InsertPromise {
    pub fn anchor(&self) -> Option<Anchor> {
        self.location.line_matching.as_ref().map(|pattern| Anchor {
            pattern: pattern.clone(),
            pick: self.location.first_last,
        })
    }

    pub fn policies(&self) -> PolicySet {
        self.whitespace_policy.iter().copied().collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplacePromise {
    pub promiser: String,
    pub replace_with: String,
    #[serde(default)]
    pub occurrences: Occurrences,
    #[serde(default)]
    pub if_class: Option<String>,
    #[serde(default)]
    pub region: RegionSpec,
    #[serde(flatten)]
    pub selector: SelectorSpec,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FieldEditPromise {
    pub promiser: String,
    pub field_separator: String,
    pub select_field: usize,
    #[serde(default)]
    pub value_separator: Option<String>,
    #[serde(default)]
    pub field_value: String,
    #[serde(default)]
    pub field_operation: FieldOperation,
    #[serde(default)]
    pub extend_fields: bool,
    #[serde(default)]
    pub if_class: Option<String>,
    #[serde(default)]
    pub region: RegionSpec,
    #[serde(flatten)]
    pub selector: SelectorSpec,
}

impl FieldEditPromise {
    pub fn value_separator_char(&self) -> Option<char> {
        self.value_separator.as_deref().and_then(|s| s.chars().next())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportPromise {
    pub text: String,
    #[serde(default)]
    pub if_class: Option<String>,
}

impl EditBundle {
    /// Number of promises across every category.
    pub fn promise_count(&self) -> usize {
        self.vars.len()
            + self.classes.len()
            + self.delete_lines.len()
            + self.field_edits.len()
            + self.insert_lines.len()
            + self.replace_patterns.len()
            + self.reports.len()
    }

    /// File to edit: `override_path` when given, else `meta.file`.
    pub fn target(&self, override_path: Option<&Path>) -> Option<PathBuf> {
        override_path
            .map(Path::to_path_buf)
            .or_else(|| self.meta.file.clone())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.promise_count() == 0 {
            issues.push(ValidationIssue::EmptyBundle);
        }

        if let Some(file) = &self.meta.file {
            if !file.is_absolute() {
                issues.push(ValidationIssue::InvalidCombo {
                    promise: None,
                    message: format!("target file '{}' must be an absolute path", file.display()),
                });
            }
        }

        // Static variables let patterns that reference them be checked now.
        let mut context = Context::new();
        for var in &self.vars {
            if var.name.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    promise: None,
                    field: "vars.name",
                });
            } else {
                context.define_var(var.name.clone(), var.value.clone());
            }
        }
        let mut checker = PatternChecker {
            context,
            issues: &mut issues,
        };

        for class in &self.classes {
            if class.name.trim().is_empty() {
                checker.issues.push(ValidationIssue::MissingField {
                    promise: None,
                    field: "classes.name",
                });
            }
            let label = format!("classes '{}'", class.name);
            checker.check(&label, class.line_matching.as_deref());
        }

        for promise in &self.delete_lines {
            let label = format!("delete_lines '{}'", promise.promiser);
            checker.require(&label, &promise.promiser, "promiser");
            for line in promise.promiser.split('\n') {
                checker.check(&label, Some(line));
            }
            if promise.not_matching && promise.promiser.contains('\n') {
                checker.combo(
                    &label,
                    "a multi-line promiser cannot be combined with not_matching",
                );
            }
            checker.common(&label, &promise.region, &promise.selector);
        }

        for promise in &self.field_edits {
            let label = format!("field_edits '{}'", promise.promiser);
            checker.require(&label, &promise.promiser, "promiser");
            checker.check(&label, Some(&promise.promiser));
            if promise.field_separator.is_empty() {
                checker.issues.push(ValidationIssue::MissingField {
                    promise: Some(label.clone()),
                    field: "field_separator",
                });
            } else {
                checker.check(&label, Some(&promise.field_separator));
            }
            if promise.select_field == 0 {
                checker.combo(&label, "select_field starts at 1");
            }
            if let Some(sep) = &promise.value_separator {
                if sep.chars().count() != 1 {
                    checker.combo(&label, "value_separator must be a single character");
                }
            }
            checker.common(&label, &promise.region, &promise.selector);
        }

        for promise in &self.insert_lines {
            let label = format!("insert_lines '{}'", promise.promiser);
            checker.require(&label, &promise.promiser, "promiser");
            checker.check(&label, promise.location.line_matching.as_deref());
            let policies = promise.policies();
            if policies.has_conflict() {
                checker.combo(
                    &label,
                    "exact_match cannot be combined with other whitespace policies",
                );
            }
            if promise.source == InsertSource::PreserveBlock && !policies.is_exact() {
                checker.combo(
                    &label,
                    "whitespace policies cannot be combined with a preserve_block source",
                );
            }
            if promise.expand_vars && !promise.source.is_file() {
                checker.combo(&label, "expand_vars only applies to file sources");
            }
            checker.common(&label, &promise.region, &promise.selector);
        }

        for promise in &self.replace_patterns {
            let label = format!("replace_patterns '{}'", promise.promiser);
            checker.require(&label, &promise.promiser, "promiser");
            checker.check(&label, Some(&promise.promiser));
            checker.common(&label, &promise.region, &promise.selector);
        }

        for report in &self.reports {
            if report.text.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    promise: None,
                    field: "reports.text",
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

struct PatternChecker<'a> {
    context: Context,
    issues: &'a mut Vec<ValidationIssue>,
}

impl PatternChecker<'_> {
    fn require(&mut self, label: &str, value: &str, field: &'static str) {
        if value.trim().is_empty() {
            self.issues.push(ValidationIssue::MissingField {
                promise: Some(label.to_string()),
                field,
            });
        }
    }

    fn combo(&mut self, label: &str, message: &str) {
        self.issues.push(ValidationIssue::InvalidCombo {
            promise: Some(label.to_string()),
            message: message.to_string(),
        });
    }

    /// Check regex syntax once known variables are expanded. Patterns still
    /// holding references resolved only at edit time are checked then.
    fn check(&mut self, label: &str, pattern: Option<&str>) {
        let Some(pattern) = pattern else {
            return;
        };
        let expanded = self.context.snapshot().expand(pattern);
        if expanded.contains("$(") || expanded.contains("${") {
            return;
        }
        if let Err(e) = pattern::validate(&expanded) {
            self.issues.push(ValidationIssue::InvalidPattern {
                promise: Some(label.to_string()),
                pattern: e.pattern,
                message: e.message,
            });
        }
    }

    fn common(&mut self, label: &str, region: &RegionSpec, selector: &SelectorSpec) {
        self.check(label, region.select_start.as_deref());
        self.check(label, region.select_end.as_deref());
        for problem in selector.conflicts() {
            self.combo(label, problem);
        }
        for pattern in selector.resolve().patterns() {
            self.check(label, Some(pattern));
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyBundle,
    MissingField {
        promise: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        promise: Option<String>,
        message: String,
    },
    InvalidPattern {
        promise: Option<String>,
        pattern: String,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyBundle => write!(f, "edit bundle contains no promises"),
            ValidationIssue::MissingField { promise, field } => match promise {
                Some(label) => write!(f, "promise {label} missing required field '{field}'"),
                None => write!(f, "promise missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { promise, message } => match promise {
                Some(label) => write!(f, "promise {label} has invalid configuration: {message}"),
                None => write!(f, "invalid bundle configuration: {message}"),
            },
            ValidationIssue::InvalidPattern {
                promise,
                pattern,
                message,
            } => match promise {
                Some(label) => write!(f, "promise {label} has invalid pattern '{pattern}': {message}"),
                None => write!(f, "invalid pattern '{pattern}': {message}"),
            },
        }
    }
}
