//! Edit session: load a file, apply a bundle of promises, save if changed.
//!
//! Promises run in a fixed category order, repeated for [`PASSES`] passes so
//! that variables and classes defined by one promise are visible to promises
//! evaluated later in the same run. Every edit promise takes an advisory
//! lock first; an unavailable lock skips the promise without touching the
//! document.

use crate::config::{
    ClassPromise, DeletePromise, EditBundle, FieldEditPromise, InsertPromise, ReplacePromise,
};
use crate::document::Document;
use crate::expand::{Context, Snapshot};
use crate::io::{self, BackupPolicy, IoError, LoadOptions, NewlineMode};
use crate::lock::{LockError, LockKey, LockManager, LockPolicy};
use crate::ops::{self, ColumnEdit, EditError, EditReport, Insertion, OpContext};
use crate::pattern;
use crate::region::RegionSpec;
use crate::selector::SelectorSpec;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of passes over the promise categories.
pub const PASSES: usize = 3;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("another edit of '{}' is in progress", path.display())]
    Busy { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Vars,
    Classes,
    DeleteLines,
    FieldEdits,
    InsertLines,
    ReplacePatterns,
    Reports,
}

impl Category {
    /// Evaluation order within one pass.
    pub const ORDER: [Category; 7] = [
        Category::Vars,
        Category::Classes,
        Category::DeleteLines,
        Category::FieldEdits,
        Category::InsertLines,
        Category::ReplacePatterns,
        Category::Reports,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Vars => "vars",
            Category::Classes => "classes",
            Category::DeleteLines => "delete_lines",
            Category::FieldEdits => "field_edits",
            Category::InsertLines => "insert_lines",
            Category::ReplacePatterns => "replace_patterns",
            Category::Reports => "reports",
        }
    }

    /// Operation name used in lock keys.
    fn lock_name(self) -> &'static str {
        match self {
            Category::DeleteLines => "deleteline",
            Category::FieldEdits => "column",
            Category::InsertLines => "insertline",
            Category::ReplacePatterns => "replace",
            Category::Reports => "report",
            Category::Vars | Category::Classes => "",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one promise.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PromiseOutcome should be checked for success/failure"]
pub enum PromiseOutcome {
    /// Already in the promised state.
    Kept,
    /// The document was changed to keep the promise.
    Repaired { edits: usize },
    /// Kept or repaired, with advisory warnings.
    Warned { edits: usize, warnings: Vec<String> },
    /// Abandoned for this run; the document is otherwise intact.
    Interrupted { reason: String },
    /// The promise itself is unusable.
    Failed { reason: String },
    /// Not evaluated (class guard or lock).
    Skipped { reason: String },
}

impl PromiseOutcome {
    fn from_result(result: Result<EditReport, EditError>) -> Self {
        match result {
            Ok(report) if !report.warnings.is_empty() => PromiseOutcome::Warned {
                edits: report.edits,
                warnings: report.warnings,
            },
            Ok(report) if report.changed() => PromiseOutcome::Repaired {
                edits: report.edits,
            },
            Ok(_) => PromiseOutcome::Kept,
            Err(e) if e.is_interruption() => PromiseOutcome::Interrupted {
                reason: e.to_string(),
            },
            Err(e) => PromiseOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PromiseOutcome::Interrupted { .. } | PromiseOutcome::Failed { .. }
        )
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, PromiseOutcome::Skipped { .. })
    }
}

impl fmt::Display for PromiseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromiseOutcome::Kept => write!(f, "kept"),
            PromiseOutcome::Repaired { edits } => write!(f, "repaired ({edits} edits)"),
            PromiseOutcome::Warned { edits, warnings } => {
                write!(f, "repaired with warnings ({edits} edits): {}", warnings.join("; "))
            }
            PromiseOutcome::Interrupted { reason } => write!(f, "interrupted: {reason}"),
            PromiseOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            PromiseOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// Final outcome of one promise across all passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromiseRecord {
    pub category: Category,
    pub promiser: String,
    /// Pass (1-based) that produced the outcome.
    pub pass: usize,
    pub outcome: PromiseOutcome,
}

/// Aggregated results of applying a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleReport {
    pub records: Vec<PromiseRecord>,
    /// Expanded text of report promises, in evaluation order.
    pub reports: Vec<String>,
    /// Cross-promise diagnostics such as anchor collisions.
    pub diagnostics: Vec<String>,
    pub edits: usize,
}

impl BundleReport {
    pub fn count(&self, predicate: impl Fn(&PromiseOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(&r.outcome)).count()
    }

    pub fn has_failures(&self) -> bool {
        self.records.iter().any(|r| r.outcome.is_failure())
    }
}

/// Remembers which insert promise anchored on which pattern in which file,
/// so colliding anchors can be reported. Owned by the caller and shared
/// across sessions of one run; never affects edits.
#[derive(Debug, Default)]
pub struct AnchorRegistry {
    seen: HashMap<(PathBuf, String), String>,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `promiser` anchoring on `pattern`; returns a warning when a
    /// different promise already uses the same anchor in `file`.
    pub fn observe(&mut self, file: &Path, pattern: &str, promiser: &str) -> Option<String> {
        let key = (file.to_path_buf(), pattern.to_string());
        match self.seen.get(&key) {
            Some(owner) if owner != promiser => Some(format!(
                "insert_lines '{promiser}' anchors on '{pattern}', already used by '{owner}' in {}; \
                 the resulting order may not be what you expect",
                file.display()
            )),
            Some(_) => None,
            None => {
                self.seen.insert(key, promiser.to_string());
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loaded,
    Editing,
    Unchanged,
    Saved,
    Failed,
}

/// What [`EditSession::finish`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "SessionOutcome tells whether the file was written"]
pub enum SessionOutcome {
    /// No edits, or edits that cancelled out.
    Unchanged,
    Saved { edits: usize, rendered: String },
    /// Dry run: the file would have been written with `rendered`.
    WouldEdit { edits: usize, rendered: String },
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Unchanged | SessionOutcome::WouldEdit { .. } => SessionState::Unchanged,
            SessionOutcome::Saved { .. } => SessionState::Saved,
        }
    }
}

/// One file's load, edit, compare, save cycle.
#[derive(Debug)]
pub struct EditSession {
    path: PathBuf,
    doc: Document,
    newline: NewlineMode,
    edits: usize,
    state: SessionState,
    backup: BackupPolicy,
    context: Context,
}

impl EditSession {
    /// Load `path` into a new session.
    pub fn load(path: &Path, options: &LoadOptions) -> Result<Self, SessionError> {
        let (doc, newline) = io::load_lines(path, options)?;
        let mut session = Self::from_document(path, doc, newline);
        if options.empty_before_use && !io::reread_lines(path)?.is_empty() {
            session.edits = 1;
        }
        tracing::debug!(target: "edit.session", path = %path.display(), "edit session loaded");
        Ok(session)
    }

    /// Session over an in-memory document that will be compared with, and
    /// saved to, `path`.
    pub fn from_document(path: &Path, doc: Document, newline: NewlineMode) -> Self {
        Self {
            path: path.to_path_buf(),
            doc,
            newline,
            edits: 0,
            state: SessionState::Loaded,
            backup: BackupPolicy::None,
            context: Context::new(),
        }
    }

    pub fn with_backup(mut self, backup: BackupPolicy) -> Self {
        self.backup = backup;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn newline(&self) -> NewlineMode {
        self.newline
    }

    /// Total edits recorded so far; never decreases.
    pub fn edits(&self) -> usize {
        self.edits
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Evaluate every promise of `bundle` against the document.
    pub fn apply(
        &mut self,
        bundle: &EditBundle,
        locks: &mut dyn LockManager,
        anchors: &mut AnchorRegistry,
    ) -> Result<BundleReport, SessionError> {
        let master = LockKey::master(&self.path);
        let Some(handle) = locks.acquire(&master, &LockPolicy::bundle())? else {
            return Err(SessionError::Busy {
                path: self.path.clone(),
            });
        };

        self.state = SessionState::Editing;
        self.context
            .define_var("edit.filename", self.path.display().to_string());

        let mut report = BundleReport::default();
        let mut outcomes: BTreeMap<(Category, usize), PromiseRecord> = BTreeMap::new();

        for pass in 1..=PASSES {
            tracing::debug!(target: "edit.session", pass, "starting pass");
            for category in Category::ORDER {
                self.run_category(
                    category,
                    pass,
                    bundle,
                    locks,
                    anchors,
                    &mut outcomes,
                    &mut report,
                );
            }
        }

        locks.release(handle)?;

        report.records = outcomes.into_values().collect();
        report.edits = self.edits;
        for record in &report.records {
            log_outcome(record);
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_category(
        &mut self,
        category: Category,
        pass: usize,
        bundle: &EditBundle,
        locks: &mut dyn LockManager,
        anchors: &mut AnchorRegistry,
        outcomes: &mut BTreeMap<(Category, usize), PromiseRecord>,
        report: &mut BundleReport,
    ) {
        let count = match category {
            Category::Vars => bundle.vars.len(),
            Category::Classes => bundle.classes.len(),
            Category::DeleteLines => bundle.delete_lines.len(),
            Category::FieldEdits => bundle.field_edits.len(),
            Category::InsertLines => bundle.insert_lines.len(),
            Category::ReplacePatterns => bundle.replace_patterns.len(),
            Category::Reports => bundle.reports.len(),
        };

        for ordinal in 0..count {
            let snapshot = self.context.snapshot();
            let (promiser, outcome) = match category {
                Category::Vars => {
                    let var = &bundle.vars[ordinal];
                    let value = snapshot.expand(&var.value);
                    self.context.define_var(var.name.clone(), value);
                    (var.name.clone(), PromiseOutcome::Kept)
                }
                Category::Classes => {
                    let class = &bundle.classes[ordinal];
                    (class.name.clone(), self.eval_class(class, &snapshot))
                }
                Category::Reports => {
                    let promise = &bundle.reports[ordinal];
                    let outcome = if !guard_holds(&promise.if_class, &snapshot) {
                        PromiseOutcome::Skipped {
                            reason: "class guard not satisfied".into(),
                        }
                    } else {
                        let key = LockKey::promise(
                            category.lock_name(),
                            &promise.text,
                            &self.path,
                            Some(ordinal),
                        );
                        self.locked(locks, &key, |_| {
                            let text = snapshot.expand(&promise.text);
                            tracing::info!(target: "edit.session", report = %text, "report");
                            report.reports.push(text);
                            Ok(EditReport::default())
                        })
                    };
                    (promise.text.clone(), outcome)
                }
                Category::DeleteLines => {
                    let promise = &bundle.delete_lines[ordinal];
                    (
                        promise.promiser.clone(),
                        self.run_delete(promise, &snapshot, locks),
                    )
                }
                Category::FieldEdits => {
                    let promise = &bundle.field_edits[ordinal];
                    (
                        promise.promiser.clone(),
                        self.run_column(promise, &snapshot, locks),
                    )
                }
                Category::InsertLines => {
                    let promise = &bundle.insert_lines[ordinal];
                    if let Some(anchor) = &promise.location.line_matching {
                        if let Some(warning) = anchors.observe(&self.path, anchor, &promise.promiser)
                        {
                            tracing::warn!(target: "edit.session", "{warning}");
                            if !report.diagnostics.contains(&warning) {
                                report.diagnostics.push(warning);
                            }
                        }
                    }
                    (
                        promise.promiser.clone(),
                        self.run_insert(promise, ordinal, &snapshot, locks),
                    )
                }
                Category::ReplacePatterns => {
                    let promise = &bundle.replace_patterns[ordinal];
                    (
                        promise.promiser.clone(),
                        self.run_replace(promise, &snapshot, locks),
                    )
                }
            };

            let record = PromiseRecord {
                category,
                promiser,
                pass,
                outcome,
            };
            // A skip never hides the result of an earlier pass.
            match outcomes.get(&(category, ordinal)) {
                Some(previous) if !previous.outcome.is_skipped() && record.outcome.is_skipped() => {}
                _ => {
                    outcomes.insert((category, ordinal), record);
                }
            }
        }
    }

    fn eval_class(&mut self, class: &ClassPromise, snapshot: &Snapshot) -> PromiseOutcome {
        let mut holds = true;

        if let Some(pattern) = &class.line_matching {
            let pattern = snapshot.expand(pattern);
            let mut found = false;
            for (_, line) in self.doc.iter() {
                match pattern::full_match(&pattern, line) {
                    Ok(true) => {
                        found = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        return PromiseOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            holds &= found;
        }
        if let Some(all) = &class.and {
            holds &= all.iter().all(|c| snapshot.is_defined(c));
        }
        if let Some(any) = &class.or {
            holds &= any.iter().any(|c| snapshot.is_defined(c));
        }
        if let Some(negated) = &class.not {
            holds &= !snapshot.is_defined(negated);
        }

        if holds && self.context.define_class(class.name.clone()) {
            tracing::debug!(target: "edit.session", class = %class.name, "class defined");
        }
        PromiseOutcome::Kept
    }

    /// Run `op` under `key`, folding its result into an outcome and the
    /// session's edit counter.
    fn locked<F>(&mut self, locks: &mut dyn LockManager, key: &LockKey, op: F) -> PromiseOutcome
    where
        F: FnOnce(&mut Document) -> Result<EditReport, EditError>,
    {
        let handle = match locks.acquire(key, &LockPolicy::promise()) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                return PromiseOutcome::Skipped {
                    reason: "lock unavailable".into(),
                }
            }
            Err(e) => {
                return PromiseOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let result = op(&mut self.doc);
        match &result {
            Ok(report) => self.edits += report.edits,
            Err(e) => self.edits += e.applied_edits(),
        }
        let outcome = PromiseOutcome::from_result(result);

        if let Err(e) = locks.release(handle) {
            tracing::warn!(target: "edit.lock", key = key.as_str(), error = %e, "could not release lock");
        }
        outcome
    }

    /// Guard, selector validation and lock around an edit operator.
    #[allow(clippy::too_many_arguments)]
    fn guarded<F>(
        &mut self,
        locks: &mut dyn LockManager,
        category: Category,
        promiser: &str,
        ordinal: Option<usize>,
        if_class: &Option<String>,
        region: &RegionSpec,
        selector: &SelectorSpec,
        snapshot: &Snapshot,
        op: F,
    ) -> PromiseOutcome
    where
        F: FnOnce(&mut Document, &OpContext<'_>) -> Result<EditReport, EditError>,
    {
        if !guard_holds(if_class, snapshot) {
            return PromiseOutcome::Skipped {
                reason: "class guard not satisfied".into(),
            };
        }
        let conflicts = selector.conflicts();
        if !conflicts.is_empty() {
            return PromiseOutcome::Failed {
                reason: EditError::ValidationConflict(conflicts.join("; ")).to_string(),
            };
        }

        let key = LockKey::promise(category.lock_name(), promiser, &self.path, ordinal);
        let region = expand_region(region, snapshot);
        let selector = selector.resolve();
        self.locked(locks, &key, |doc| {
            let ctx = OpContext {
                region: &region,
                selector: &selector,
                vars: snapshot,
            };
            op(doc, &ctx)
        })
    }

    fn run_delete(
        &mut self,
        promise: &DeletePromise,
        snapshot: &Snapshot,
        locks: &mut dyn LockManager,
    ) -> PromiseOutcome {
        let pattern = snapshot.expand(&promise.promiser);
        self.guarded(
            locks,
            Category::DeleteLines,
            &pattern,
            None,
            &promise.if_class,
            &promise.region,
            &promise.selector,
            snapshot,
            |doc, ctx| ops::delete_lines(doc, ctx, &pattern, promise.not_matching),
        )
    }

    fn run_column(
        &mut self,
        promise: &FieldEditPromise,
        snapshot: &Snapshot,
        locks: &mut dyn LockManager,
    ) -> PromiseOutcome {
        let select_line = snapshot.expand(&promise.promiser);
        let value = snapshot.expand(&promise.field_value);
        let edit = ColumnEdit {
            select_line: &select_line,
            separator: &promise.field_separator,
            field: promise.select_field,
            value_separator: promise.value_separator_char(),
            value: &value,
            operation: promise.field_operation,
            extend_fields: promise.extend_fields,
        };
        self.guarded(
            locks,
            Category::FieldEdits,
            &select_line,
            None,
            &promise.if_class,
            &promise.region,
            &promise.selector,
            snapshot,
            |doc, ctx| ops::edit_column(doc, ctx, &edit),
        )
    }

    fn run_insert(
        &mut self,
        promise: &InsertPromise,
        ordinal: usize,
        snapshot: &Snapshot,
        locks: &mut dyn LockManager,
    ) -> PromiseOutcome {
        let promiser = snapshot.expand(&promise.promiser);
        let anchor = promise.anchor().map(|mut anchor| {
            anchor.pattern = snapshot.expand(&anchor.pattern);
            anchor
        });
        let policies = promise.policies();
        let insertion = Insertion {
            promiser: &promiser,
            source: promise.source,
            anchor: anchor.as_ref(),
            placement: promise.location.before_after,
            policies: &policies,
            expand_vars: promise.expand_vars,
        };
        let ordinal = promise.source.allows_duplicates().then_some(ordinal);

        self.guarded(
            locks,
            Category::InsertLines,
            &promiser,
            ordinal,
            &promise.if_class,
            &promise.region,
            &promise.selector,
            snapshot,
            |doc, ctx| ops::insert_lines(doc, ctx, &insertion),
        )
    }

    fn run_replace(
        &mut self,
        promise: &ReplacePromise,
        snapshot: &Snapshot,
        locks: &mut dyn LockManager,
    ) -> PromiseOutcome {
        let pattern = snapshot.expand(&promise.promiser);
        self.guarded(
            locks,
            Category::ReplacePatterns,
            &pattern,
            None,
            &promise.if_class,
            &promise.region,
            &promise.selector,
            snapshot,
            |doc, ctx| {
                ops::replace_patterns(doc, ctx, &pattern, &promise.replace_with, promise.occurrences)
            },
        )
    }

    /// End the session. Edits are compared with the file as it is now on
    /// disk and written only if the content differs. With `dry_run` nothing
    /// is written.
    pub fn finish(mut self, dry_run: bool) -> Result<SessionOutcome, SessionError> {
        if self.edits == 0 {
            self.state = SessionState::Unchanged;
            tracing::debug!(target: "edit.session", path = %self.path.display(), "no edits, nothing to save");
            return Ok(SessionOutcome::Unchanged);
        }

        let current = io::reread_lines(&self.path)?;
        if self.doc.lines_eq(&current) {
            self.state = SessionState::Unchanged;
            tracing::info!(
                target: "edit.session",
                path = %self.path.display(),
                edits = self.edits,
                "edits cancelled out, file unchanged"
            );
            return Ok(SessionOutcome::Unchanged);
        }

        let rendered = io::render(&self.doc, self.newline);
        if dry_run {
            tracing::warn!(
                target: "edit.session",
                path = %self.path.display(),
                edits = self.edits,
                "should edit file but only a warning was promised"
            );
            return Ok(SessionOutcome::WouldEdit {
                edits: self.edits,
                rendered,
            });
        }

        if let Err(e) = io::save_lines(&self.path, &self.doc, self.newline, self.backup) {
            self.state = SessionState::Failed;
            tracing::error!(target: "edit.session", path = %self.path.display(), error = %e, "unable to save file");
            return Err(e.into());
        }
        self.state = SessionState::Saved;
        Ok(SessionOutcome::Saved {
            edits: self.edits,
            rendered,
        })
    }
}

fn guard_holds(if_class: &Option<String>, snapshot: &Snapshot) -> bool {
    if_class
        .as_deref()
        .map_or(true, |class| snapshot.is_defined(class))
}

fn expand_region(spec: &RegionSpec, snapshot: &Snapshot) -> RegionSpec {
    RegionSpec {
        select_start: spec.select_start.as_deref().map(|p| snapshot.expand(p)),
        select_end: spec.select_end.as_deref().map(|p| snapshot.expand(p)),
        ..spec.clone()
    }
}

fn log_outcome(record: &PromiseRecord) {
    let category = record.category.as_str();
    let promiser = record.promiser.as_str();
    match &record.outcome {
        PromiseOutcome::Kept => {
            tracing::debug!(target: "edit.session", category, promiser, "no changes needed")
        }
        PromiseOutcome::Repaired { edits } => {
            tracing::info!(target: "edit.session", category, promiser, edits, "promise repaired")
        }
        PromiseOutcome::Warned { edits, .. } => {
            tracing::warn!(target: "edit.session", category, promiser, edits, "warnings while keeping promise")
        }
        PromiseOutcome::Interrupted { reason } => {
            tracing::error!(target: "edit.session", category, promiser, %reason, "promise interrupted")
        }
        PromiseOutcome::Failed { reason } => {
            tracing::error!(target: "edit.session", category, promiser, %reason, "promise failed")
        }
        PromiseOutcome::Skipped { reason } => {
            tracing::debug!(target: "edit.session", category, promiser, %reason, "promise skipped")
        }
    }
}
