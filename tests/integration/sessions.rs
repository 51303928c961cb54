use convergent_edit::io::IoError;
use convergent_edit::{
    load_from_str, AnchorRegistry, BundleReport, EditSession, LoadOptions, LockDb, LockManager,
    MemoryLocks, PromiseOutcome, SessionError, SessionOutcome,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn run_with(
    path: &Path,
    bundle: &str,
    locks: &mut dyn LockManager,
) -> (BundleReport, SessionOutcome) {
    let bundle = load_from_str(bundle).expect("bundle");
    let mut session = EditSession::load(path, &bundle.edit_defaults.load_options())
        .expect("load")
        .with_backup(bundle.edit_defaults.backup);
    let report = session
        .apply(&bundle, locks, &mut AnchorRegistry::new())
        .expect("apply");
    (report, session.finish(false).expect("finish"))
}

fn run(path: &Path, bundle: &str) -> (BundleReport, SessionOutcome) {
    run_with(path, bundle, &mut MemoryLocks::new())
}

#[test]
fn test_file_source_with_variables() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("motd.src");
    fs::write(&source, "Welcome to $(site)\nAuthorized use only\n").unwrap();
    let target = dir.path().join("motd");
    fs::write(&target, "").unwrap();

    let bundle = format!(
        r#"
[[vars]]
name = "site"
value = "lab"

[[insert_lines]]
promiser = '{}'
source = "file"
expand_vars = true
"#,
        source.display()
    );

    let (report, _) = run(&target, &bundle);
    assert_eq!(report.edits, 2);
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "Welcome to lab\nAuthorized use only\n"
    );

    let (report, outcome) = run(&target, &bundle);
    assert_eq!(report.edits, 0);
    assert_eq!(outcome, SessionOutcome::Unchanged);
}

#[test]
fn test_directory_source_fails_only_its_promise() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("conf");
    fs::write(&target, "a\n").unwrap();

    let bundle = format!(
        r#"
[[insert_lines]]
promiser = '{}'
source = "file"

[[insert_lines]]
promiser = "b"
"#,
        dir.path().display()
    );

    let (report, _) = run(&target, &bundle);
    assert_eq!(report.count(PromiseOutcome::is_failure), 1);
    let failed = report
        .records
        .iter()
        .find(|r| r.outcome.is_failure())
        .unwrap();
    assert!(failed.outcome.to_string().contains("directory"));
    assert_eq!(fs::read_to_string(&target).unwrap(), "a\nb\n");
}

#[test]
fn test_non_convergent_replacement_is_interrupted() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("conf");
    fs::write(&target, "level=1\n").unwrap();

    let bundle = r#"
[[replace_patterns]]
promiser = "level"
replace_with = "level-level"
"#;
    let (report, outcome) = run(&target, bundle);
    assert!(matches!(
        report.records[0].outcome,
        PromiseOutcome::Interrupted { .. }
    ));
    assert_eq!(outcome, SessionOutcome::Unchanged);
    assert_eq!(fs::read_to_string(&target).unwrap(), "level=1\n");
}

#[test]
fn test_lock_database_spans_runs() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let target = dir.path().join("hosts");
    fs::write(&target, "127.0.0.1 localhost\n").unwrap();
    let bundle = r#"
[[insert_lines]]
promiser = "10.0.0.1 gateway"
"#;

    let (report, _) = run_with(&target, bundle, &mut LockDb::open(&state).unwrap());
    assert_eq!(report.edits, 1);
    assert!(state.join("locks.json").exists());

    // Undo the edit by hand; a second run inside the window leaves it alone.
    fs::write(&target, "127.0.0.1 localhost\n").unwrap();
    let (report, outcome) = run_with(&target, bundle, &mut LockDb::open(&state).unwrap());
    assert!(report.records[0].outcome.is_skipped());
    assert_eq!(outcome, SessionOutcome::Unchanged);

    // Without the shared database the promise runs again.
    let (report, _) = run(&target, bundle);
    assert_eq!(report.edits, 1);
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "127.0.0.1 localhost\n10.0.0.1 gateway\n"
    );
}

#[test]
fn test_empty_before_use_rebuilds_file() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("resolv.conf");
    fs::write(&target, "nameserver 8.8.8.8\nsearch old\n").unwrap();
    let bundle = r#"
[edit_defaults]
empty_before_use = true

[[insert_lines]]
promiser = "nameserver 10.0.0.53"
"#;
    let (report, _) = run(&target, bundle);
    assert_eq!(report.edits, 2);
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "nameserver 10.0.0.53\n"
    );

    // Same content rebuilt from scratch is not rewritten.
    let (_, outcome) = run(&target, bundle);
    assert_eq!(outcome, SessionOutcome::Unchanged);
}

#[test]
fn test_create_missing_file() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("new.conf");
    let bundle = r#"
[edit_defaults]
create = true

[[insert_lines]]
promiser = "enabled=true"
"#;
    let (_, outcome) = run(&target, bundle);
    assert!(matches!(outcome, SessionOutcome::Saved { edits: 1, .. }));
    assert_eq!(fs::read_to_string(&target).unwrap(), "enabled=true\n");
}

#[test]
fn test_missing_file_without_create_fails_to_load() {
    let dir = TempDir::new().unwrap();
    let err = EditSession::load(&dir.path().join("absent"), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, SessionError::Io(IoError::Io { .. })));
}

#[test]
fn test_single_backup_keeps_previous_content() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("fstab");
    fs::write(&target, "/dev/sda1 / ext4 defaults 0 1\n").unwrap();
    let bundle = r#"
[edit_defaults]
backup = "single"

[[insert_lines]]
promiser = "tmpfs /tmp tmpfs defaults 0 0"
"#;
    run(&target, bundle);
    assert_eq!(
        fs::read_to_string(dir.path().join("fstab.cf-before-edit")).unwrap(),
        "/dev/sda1 / ext4 defaults 0 1\n"
    );
}

#[test]
fn test_crlf_is_preserved() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("win.ini");
    fs::write(&target, "[boot]\r\nshell=old\r\n").unwrap();
    let bundle = r#"
[[replace_patterns]]
promiser = "^shell=old$"
replace_with = "shell=new"
"#;
    run(&target, bundle);
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "[boot]\r\nshell=new\r\n"
    );
}

#[test]
fn test_relative_path_is_rejected() {
    let err = EditSession::load(Path::new("etc/hosts"), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, SessionError::Io(IoError::RelativePath(_))));
}

#[test]
fn test_size_limit_is_enforced() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("big");
    fs::write(&target, "x".repeat(64)).unwrap();
    let options = LoadOptions {
        max_file_size: 16,
        ..LoadOptions::default()
    };
    let err = EditSession::load(&target, &options).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Io(IoError::TooLarge { size: 64, limit: 16, .. })
    ));
}

#[test]
fn test_region_scoped_edits() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("app.ini");
    fs::write(
        &target,
        "[main]\ndebug=true\n# keep\n[extra]\ndebug=true\n# keep\n",
    )
    .unwrap();
    let bundle = r##"
[[delete_lines]]
promiser = "#.*"
[delete_lines.region]
select_start = "\\[main\\]"
select_end = "\\[.*\\]"

[[replace_patterns]]
promiser = "^debug=true$"
replace_with = "debug=false"
[replace_patterns.region]
select_start = "\\[main\\]"
select_end = "\\[.*\\]"

[[insert_lines]]
promiser = "log=info"
[insert_lines.region]
select_start = "\\[main\\]"
select_end = "\\[.*\\]"
"##;
    let (report, _) = run(&target, bundle);
    assert_eq!(report.edits, 3);
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "[main]\ndebug=false\nlog=info\n[extra]\ndebug=true\n# keep\n"
    );
}

#[test]
fn test_missing_region_end_interrupts_insertion() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("app.ini");
    fs::write(&target, "[main]\na=1\n").unwrap();
    let bundle = r#"
[[insert_lines]]
promiser = "b=2"
[insert_lines.region]
select_start = "\\[main\\]"
select_end = "\\[.*\\]"
"#;
    let (report, outcome) = run(&target, bundle);
    assert!(matches!(
        report.records[0].outcome,
        PromiseOutcome::Interrupted { .. }
    ));
    assert_eq!(outcome, SessionOutcome::Unchanged);

    let tolerant = format!("{bundle}select_end_match_eof = true\n");
    let (report, _) = run(&target, &tolerant);
    assert_eq!(report.edits, 1);
    assert_eq!(fs::read_to_string(&target).unwrap(), "[main]\na=1\nb=2\n");
}
