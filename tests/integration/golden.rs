use convergent_edit::{
    load_from_path, AnchorRegistry, BundleReport, EditBundle, EditSession, MemoryLocks,
    PromiseOutcome, SessionOutcome,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn load_fixture(name: &str) -> String {
    fs::read_to_string(format!("tests/fixtures/{name}"))
        .unwrap_or_else(|err| panic!("failed to load fixture {name}: {err}"))
}

fn bundle_fixture(name: &str) -> EditBundle {
    load_from_path(format!("tests/fixtures/{name}")).expect("bundle fixture")
}

fn run(path: &Path, bundle: &EditBundle) -> (BundleReport, SessionOutcome) {
    let mut session =
        EditSession::load(path, &bundle.edit_defaults.load_options()).expect("load");
    let report = session
        .apply(bundle, &mut MemoryLocks::new(), &mut AnchorRegistry::new())
        .expect("apply");
    (report, session.finish(false).expect("finish"))
}

#[test]
fn sshd_hardening_matches_fixture() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sshd_config");
    fs::write(&path, load_fixture("sshd_config.input")).unwrap();
    let bundle = bundle_fixture("sshd_hardening.toml");

    let (report, outcome) = run(&path, &bundle);

    assert!(!report.has_failures(), "{:?}", report.records);
    assert_eq!(report.edits, 6);
    assert!(matches!(outcome, SessionOutcome::Saved { edits: 6, .. }));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        load_fixture("sshd_config.expected")
    );
    assert_eq!(
        report.reports,
        vec![format!("hardened {}", path.display())]
    );
}

#[test]
fn sshd_hardening_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sshd_config");
    fs::write(&path, load_fixture("sshd_config.expected")).unwrap();
    let bundle = bundle_fixture("sshd_hardening.toml");

    let (report, outcome) = run(&path, &bundle);

    assert_eq!(report.edits, 0);
    assert_eq!(outcome, SessionOutcome::Unchanged);
    assert_eq!(
        report.count(|o| matches!(o, PromiseOutcome::Repaired { .. })),
        0
    );
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        load_fixture("sshd_config.expected")
    );
}

#[test]
fn group_members_match_fixture() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("group");
    fs::write(&path, load_fixture("group.input")).unwrap();
    let bundle = bundle_fixture("group_members.toml");

    let (report, _) = run(&path, &bundle);
    assert_eq!(report.edits, 2);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        load_fixture("group.expected")
    );

    let (report, outcome) = run(&path, &bundle);
    assert_eq!(report.edits, 0);
    assert_eq!(outcome, SessionOutcome::Unchanged);
}
