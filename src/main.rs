use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use convergent_edit::config::load_from_path;
use convergent_edit::{
    AnchorRegistry, BundleReport, Category, EditBundle, EditSession, LockDb, LockManager,
    MemoryLocks, PromiseOutcome, SessionError, SessionOutcome,
};
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "convergent-edit")]
#[command(about = "Convergent, idempotent editing of line-oriented files", long_about = None)]
#[command(version)]
struct Cli {
    /// Show debug diagnostics
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Edit bundle to apply
    #[arg(short, long, conflicts_with = "bundles", required_unless_present = "bundles")]
    bundle: Option<PathBuf>,

    /// Directory of edit bundles (*.toml), applied in name order
    #[arg(long)]
    bundles: Option<PathBuf>,

    /// File to edit, overriding `meta.file` of every bundle
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply edit bundles to their target files
    Apply {
        #[command(flatten)]
        target: Target,

        /// Dry run - evaluate promises without writing files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Directory holding the lock database (default ~/.convergent-edit)
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Keep locks in memory for this run only
        #[arg(long)]
        no_lock_db: bool,
    },

    /// Report whether target files are converged, without writing
    Check {
        #[command(flatten)]
        target: Target,

        /// Show unified diff of pending changes
        #[arg(short, long)]
        diff: bool,
    },

    /// List the promises of an edit bundle
    List {
        #[arg(short, long)]
        bundle: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Apply {
            target,
            dry_run,
            diff,
            state_dir,
            no_lock_db,
        } => {
            let mut locks: Box<dyn LockManager> = if no_lock_db || dry_run {
                Box::new(MemoryLocks::new())
            } else {
                let dir = match state_dir {
                    Some(dir) => dir,
                    None => LockDb::default_dir()?,
                };
                Box::new(LockDb::open(&dir)?)
            };
            cmd_apply(&target, locks.as_mut(), dry_run, diff)
        }

        Commands::Check { target, diff } => cmd_check(&target, diff),

        Commands::List { bundle } => cmd_list(&bundle),
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Helper: Resolve the bundle files named on the command line.
fn discover_bundles(target: &Target) -> Result<Vec<PathBuf>> {
    if let Some(path) = &target.bundle {
        return Ok(vec![path.clone()]);
    }
    let Some(dir) = &target.bundles else {
        anyhow::bail!("either --bundle or --bundles is required");
    };

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No .toml edit bundles found in {}", dir.display());
    }
    Ok(files)
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (edited)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn one_line(promiser: &str) -> String {
    promiser.replace('\n', "\\n")
}

#[derive(Default)]
struct Totals {
    repaired: usize,
    kept: usize,
    skipped: usize,
    failed: usize,
    changed_files: usize,
}

impl Totals {
    fn add(&mut self, report: &BundleReport) {
        for record in &report.records {
            if record.category == Category::Vars || record.category == Category::Classes {
                continue;
            }
            let label = format!("{} '{}'", record.category, one_line(&record.promiser));
            match &record.outcome {
                PromiseOutcome::Kept => {
                    println!("{} {}: kept", "⊙".yellow(), label);
                    self.kept += 1;
                }
                PromiseOutcome::Repaired { edits } => {
                    println!("{} {}: repaired ({} edits)", "✓".green(), label, edits);
                    self.repaired += 1;
                }
                PromiseOutcome::Warned { edits, warnings } => {
                    println!("{} {}: repaired ({} edits)", "✓".green(), label, edits);
                    for warning in warnings {
                        println!("  {}", format!("warning: {warning}").yellow());
                    }
                    self.repaired += 1;
                }
                PromiseOutcome::Skipped { reason } => {
                    println!("{} {}: skipped ({})", "⊘".cyan(), label, reason);
                    self.skipped += 1;
                }
                PromiseOutcome::Interrupted { reason } | PromiseOutcome::Failed { reason } => {
                    eprintln!("{} {}: {}", "✗".red(), label, reason);
                    self.failed += 1;
                }
            }
        }
        for diagnostic in &report.diagnostics {
            println!("  {}", diagnostic.yellow());
        }
        for text in &report.reports {
            println!("  {} {}", "report:".bold(), text);
        }
    }

    fn print(&self, dry_run: bool) {
        println!("{}", "Summary:".bold());
        println!("  {} repaired", format!("{}", self.repaired).green());
        println!("  {} kept", format!("{}", self.kept).yellow());
        println!("  {} skipped", format!("{}", self.skipped).cyan());
        println!("  {} failed", format!("{}", self.failed).red());
        let verb = if dry_run { "would change" } else { "changed" };
        println!("  {} files {}", self.changed_files, verb);
    }
}

/// Load, apply and finish one bundle against its target file.
fn run_bundle(
    bundle_file: &Path,
    target: &Target,
    locks: &mut dyn LockManager,
    anchors: &mut AnchorRegistry,
    dry_run: bool,
    show_diff: bool,
    totals: &mut Totals,
) -> Result<()> {
    let bundle: EditBundle = load_from_path(bundle_file)?;
    let Some(path) = bundle.target(target.file.as_deref()) else {
        anyhow::bail!(
            "{} names no target file; set meta.file or pass --file",
            bundle_file.display()
        );
    };

    let before = if show_diff {
        fs::read_to_string(&path).unwrap_or_default()
    } else {
        String::new()
    };

    let mut session = EditSession::load(&path, &bundle.edit_defaults.load_options())
        .with_context(|| format!("failed to load {}", path.display()))?
        .with_backup(bundle.edit_defaults.backup);

    let report = match session.apply(&bundle, locks, anchors) {
        Ok(report) => report,
        Err(SessionError::Busy { path }) => {
            println!(
                "{} {}: another edit is in progress, skipping",
                "⊘".cyan(),
                path.display()
            );
            totals.skipped += 1;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    totals.add(&report);

    match session.finish(dry_run)? {
        SessionOutcome::Unchanged => {
            println!("  {}", format!("{} unchanged", path.display()).dimmed());
        }
        SessionOutcome::WouldEdit { edits, rendered } => {
            println!(
                "{} {}: would edit ({} edits)",
                "⊙".yellow(),
                path.display(),
                edits
            );
            totals.changed_files += 1;
            if show_diff {
                display_diff(&path, &before, &rendered);
            }
        }
        SessionOutcome::Saved { edits, rendered } => {
            println!(
                "{} {}: saved ({} edits)",
                "✓".green(),
                path.display(),
                edits
            );
            totals.changed_files += 1;
            if show_diff {
                display_diff(&path, &before, &rendered);
            }
        }
    }
    Ok(())
}

fn run_all(
    target: &Target,
    locks: &mut dyn LockManager,
    dry_run: bool,
    show_diff: bool,
) -> Result<Totals> {
    let bundle_files = discover_bundles(target)?;
    let mut anchors = AnchorRegistry::new();
    let mut totals = Totals::default();

    for bundle_file in bundle_files {
        println!("Loading edit bundle from {}...", bundle_file.display());
        if let Err(e) = run_bundle(
            &bundle_file,
            target,
            locks,
            &mut anchors,
            dry_run,
            show_diff,
            &mut totals,
        ) {
            eprintln!("{} {}: {:#}", "✗".red(), bundle_file.display(), e);
            totals.failed += 1;
        }
        println!();
    }
    Ok(totals)
}

fn cmd_apply(
    target: &Target,
    locks: &mut dyn LockManager,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    if dry_run {
        println!("{}", "[DRY RUN - no files will be written]".cyan());
    }
    let totals = run_all(target, locks, dry_run, show_diff)?;
    totals.print(dry_run);

    if totals.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_check(target: &Target, show_diff: bool) -> Result<()> {
    println!("{}", "Checking convergence...".bold());
    let mut locks = MemoryLocks::new();
    let totals = run_all(target, &mut locks, true, show_diff)?;
    totals.print(true);

    if totals.failed > 0 || totals.changed_files > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(bundle_file: &Path) -> Result<()> {
    let bundle = load_from_path(bundle_file)?;

    let name = if bundle.meta.name.is_empty() {
        bundle_file.display().to_string()
    } else {
        bundle.meta.name.clone()
    };
    println!("{}", name.bold());
    if let Some(description) = &bundle.meta.description {
        println!("{}", description.dimmed());
    }
    match bundle.target(None) {
        Some(path) => println!("Target: {}", path.display()),
        None => println!("Target: {}", "(set with --file)".dimmed()),
    }
    println!("{} promises", bundle.promise_count());
    println!();

    let sections: [(Category, Vec<String>); 7] = [
        (
            Category::Vars,
            bundle
                .vars
                .iter()
                .map(|v| format!("{} = {}", v.name, v.value))
                .collect(),
        ),
        (
            Category::Classes,
            bundle.classes.iter().map(|c| c.name.clone()).collect(),
        ),
        (
            Category::DeleteLines,
            bundle.delete_lines.iter().map(|p| one_line(&p.promiser)).collect(),
        ),
        (
            Category::FieldEdits,
            bundle
                .field_edits
                .iter()
                .map(|p| format!("{} (field {})", p.promiser, p.select_field))
                .collect(),
        ),
        (
            Category::InsertLines,
            bundle.insert_lines.iter().map(|p| one_line(&p.promiser)).collect(),
        ),
        (
            Category::ReplacePatterns,
            bundle
                .replace_patterns
                .iter()
                .map(|p| format!("{} -> {}", p.promiser, p.replace_with))
                .collect(),
        ),
        (
            Category::Reports,
            bundle.reports.iter().map(|p| one_line(&p.text)).collect(),
        ),
    ];

    for (category, entries) in sections {
        if entries.is_empty() {
            continue;
        }
        println!("{} ({})", category.as_str().bold(), entries.len());
        for entry in entries {
            println!("  - {}", entry);
        }
    }

    Ok(())
}
