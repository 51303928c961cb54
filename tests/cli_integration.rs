//! Integration tests for the command-line interface: apply, check and list.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to create a scratch directory with a target file and a bundle for it
fn setup_bundle_dir() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("sshd_config");
    fs::write(&target, "Port 22\nPermitRootLogin yes\n").unwrap();

    let bundles = dir.path().join("bundles");
    fs::create_dir(&bundles).unwrap();
    fs::write(
        bundles.join("10-sshd.toml"),
        format!(
            r#"[meta]
name = "sshd"
file = '{}'

[[replace_patterns]]
promiser = "^PermitRootLogin yes$"
replace_with = "PermitRootLogin no"

[[insert_lines]]
promiser = "Banner /etc/issue"
"#,
            target.display()
        ),
    )
    .unwrap();

    (dir, target)
}

fn convergent_edit(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_convergent-edit"))
        .args(args)
        .output()
        .unwrap()
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_apply_help() {
    let output = convergent_edit(&["apply", "--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Apply edit bundles"));
}

#[test]
fn test_apply_then_converged() {
    let (dir, target) = setup_bundle_dir();
    let bundles = dir.path().join("bundles");

    let output = convergent_edit(&["apply", "--bundles", path_arg(&bundles), "--no-lock-db"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains("Loading edit bundle"));
    assert!(stdout.contains("Summary:"));
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "Port 22\nPermitRootLogin no\nBanner /etc/issue\n"
    );

    let output = convergent_edit(&["check", "--bundles", path_arg(&bundles)]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("0 files would change"));
}

#[test]
fn test_dry_run_does_not_write() {
    let (dir, target) = setup_bundle_dir();
    let bundle = dir.path().join("bundles/10-sshd.toml");

    let output = convergent_edit(&["apply", "--bundle", path_arg(&bundle), "--dry-run", "--diff"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("DRY RUN"));
    assert!(stdout.contains("would edit"));
    assert!(stdout.contains("+Banner /etc/issue"));
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "Port 22\nPermitRootLogin yes\n"
    );
}

#[test]
fn test_check_reports_pending_edits() {
    let (dir, _) = setup_bundle_dir();
    let bundle = dir.path().join("bundles/10-sshd.toml");

    let output = convergent_edit(&["check", "--bundle", path_arg(&bundle)]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_file_override_and_lock_db() {
    let (dir, _) = setup_bundle_dir();
    let bundle = dir.path().join("bundles/10-sshd.toml");
    let other = dir.path().join("other_config");
    fs::write(&other, "PermitRootLogin yes\n").unwrap();
    let state = dir.path().join("state");

    let output = convergent_edit(&[
        "apply",
        "--bundle",
        path_arg(&bundle),
        "--file",
        path_arg(&other),
        "--state-dir",
        path_arg(&state),
    ]);
    assert!(output.status.success());
    assert_eq!(
        fs::read_to_string(&other).unwrap(),
        "PermitRootLogin no\nBanner /etc/issue\n"
    );
    assert!(state.join("locks.json").exists());
}

#[test]
fn test_failed_promise_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("conf");
    fs::write(&target, "a\n").unwrap();
    let bundle = dir.path().join("bad.toml");
    fs::write(
        &bundle,
        "[[insert_lines]]\npromiser = \"x\"\nlocation = { line_matching = \"missing\" }\n",
    )
    .unwrap();

    let output = convergent_edit(&[
        "apply",
        "--bundle",
        path_arg(&bundle),
        "--file",
        path_arg(&target),
        "--no-lock-db",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing"));
}

#[test]
fn test_invalid_bundle_is_reported() {
    let dir = TempDir::new().unwrap();
    let bundle = dir.path().join("bad.toml");
    fs::write(&bundle, "[[replace_patterns]]\npromiser = \"(\"\nreplace_with = \"x\"\n").unwrap();

    let output = convergent_edit(&["apply", "--bundle", path_arg(&bundle), "--no-lock-db"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid edit bundle"));
}

#[test]
fn test_list_promises() {
    let (dir, _) = setup_bundle_dir();
    let bundle = dir.path().join("bundles/10-sshd.toml");

    let output = convergent_edit(&["list", "--bundle", path_arg(&bundle)]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sshd"));
    assert!(stdout.contains("2 promises"));
    assert!(stdout.contains("replace_patterns"));
    assert!(stdout.contains("Banner /etc/issue"));
}
