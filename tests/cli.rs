//! End-to-end tests for the `gsync` binary.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use gsync::model::{Entry, LocalizedText, Record, RecordId, RecordKind, RecordType, Sense, Tag};
use gsync::storage::{RecordSource, SqliteStorage};
use tempfile::TempDir;

struct Stores {
    dir: TempDir,
    source: PathBuf,
    target: PathBuf,
}

impl Stores {
    fn new(records: &[Record]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.db");
        let target = dir.path().join("target.db");
        let mut store = SqliteStorage::open(&source).unwrap();
        for record in records {
            store.insert_record(record).unwrap();
        }
        drop(SqliteStorage::open(&target).unwrap());
        Self { dir, source, target }
    }

    fn cmd(&self, args: &[&str]) -> Command {
        let mut cmd = Command::cargo_bin("gsync").unwrap();
        cmd.env("GSYNC_CONFIG", self.dir.path().join("missing-config.json"))
            .env("GSYNC_ACTOR", "tester")
            .env_remove("GSYNC_SOURCE")
            .env_remove("GSYNC_TARGET")
            .env("NO_COLOR", "1")
            .args(args)
            .arg("--source")
            .arg(&self.source)
            .arg("--target")
            .arg(&self.target);
        cmd
    }

    fn target_count(&self, record_type: RecordType) -> usize {
        SqliteStorage::open_read_only(&self.target)
            .unwrap()
            .all(record_type)
            .unwrap()
            .len()
    }
}

fn entry(form: &str) -> Record {
    Record::new(RecordKind::Entry(Entry {
        lexeme_form: LocalizedText::new().with("en", form),
        ..Entry::default()
    }))
}

fn sense(gloss: &str, owner: &Record, pos: Option<RecordId>) -> Record {
    Record::new(RecordKind::Sense(Sense {
        gloss: LocalizedText::new().with("en", gloss),
        part_of_speech: pos,
        ..Sense::default()
    }))
    .owned_by(owner.id, "senses")
}

fn tag(name: &str) -> Record {
    Record::new(RecordKind::Tag(Tag {
        name: LocalizedText::new().with("en", name),
        ..Tag::default()
    }))
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn gsync() -> Command {
    let mut cmd = Command::cargo_bin("gsync").unwrap();
    cmd.env("NO_COLOR", "1");
    cmd
}

fn exists(path: &Path) -> bool {
    path.try_exists().unwrap()
}

#[test]
fn init_creates_store_and_refuses_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("new.db");

    gsync().args(["init"]).arg(&path).assert().success();
    assert!(exists(&path));

    gsync().args(["init", "--json"]).arg(&path).assert().code(2);
    gsync().args(["init", "--force"]).arg(&path).assert().success();
}

#[test]
fn compare_reports_new_records_as_json() {
    let run = entry("run");
    let stores = Stores::new(&[run.clone(), entry("walk")]);

    let output = stores
        .cmd(&["compare", "--json", "--type", "entry"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    let changes = json["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|c| c["change_type"] == "NEW"));
    assert_eq!(stores.target_count(RecordType::Entry), 0);
}

#[test]
fn sync_creates_records_then_is_idempotent() {
    let stores = Stores::new(&[entry("run"), entry("walk")]);

    stores.cmd(&["sync", "-t", "entry"]).assert().code(0);
    assert_eq!(stores.target_count(RecordType::Entry), 2);

    let output = stores
        .cmd(&["compare", "--json", "-t", "entry"])
        .output()
        .unwrap();
    let json = stdout_json(&output);
    assert!(json["changes"]
        .as_array()
        .unwrap()
        .iter()
        .all(|c| c["change_type"] == "UNCHANGED"));
}

#[test]
fn dry_run_writes_nothing() {
    let stores = Stores::new(&[entry("run")]);

    let output = stores
        .cmd(&["sync", "--dry-run", "--json", "-t", "entry"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["dry_run"], true);
    assert_eq!(stores.target_count(RecordType::Entry), 0);
}

#[test]
fn import_carries_subtree_and_reference() {
    let verb = tag("verb");
    let run = entry("run");
    let to_run = sense("to run", &run, Some(verb.id));
    let stores = Stores::new(&[verb, run.clone(), to_run, entry("unrelated")]);

    stores
        .cmd(&["import", "-t", "entry", "--seed", &run.id.to_string()])
        .assert()
        .code(0);

    assert_eq!(stores.target_count(RecordType::Entry), 1);
    assert_eq!(stores.target_count(RecordType::Sense), 1);
    assert_eq!(stores.target_count(RecordType::Tag), 1);
}

#[test]
fn import_blocked_by_dangling_reference_exits_4() {
    let run = entry("run");
    let dangling = sense("to run", &run, Some(RecordId::generate()));
    let stores = Stores::new(&[run.clone(), dangling]);

    let output = stores
        .cmd(&["import", "--json", "-t", "entry", "-s", &run.id.to_string()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(stdout_json(&output)["blocked"], true);
    assert_eq!(stores.target_count(RecordType::Entry), 0);
}

#[test]
fn import_unknown_seed_exits_3() {
    let stores = Stores::new(&[entry("run")]);
    stores
        .cmd(&["import", "-t", "entry", "-s", &RecordId::generate().to_string()])
        .assert()
        .code(3);
}

#[test]
fn unknown_resolver_is_a_config_error() {
    let stores = Stores::new(&[entry("run")]);

    let output = stores
        .cmd(&["sync", "-t", "entry", "--resolver", "bogus"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));

    // stderr is not a terminal under test, so errors are structured
    let err: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["error"]["code"], "UNKNOWN_RESOLVER");
    assert_eq!(stores.target_count(RecordType::Entry), 0);
}

#[test]
fn select_imports_only_matching_records() {
    let stores = Stores::new(&[entry("run"), entry("walk"), entry("Running")]);

    stores
        .cmd(&["select", "-t", "entry", "--where", "lexeme_form=RUN"])
        .assert()
        .code(0);
    assert_eq!(stores.target_count(RecordType::Entry), 1);
}

#[test]
fn report_file_is_markdown() {
    let stores = Stores::new(&[entry("run")]);
    let report = stores.dir.path().join("sync-report.md");

    stores
        .cmd(&["sync", "--quiet", "-t", "entry", "--report", report.to_str().unwrap()])
        .assert()
        .success()
        .stdout("");

    let content = std::fs::read_to_string(&report).unwrap();
    assert!(content.starts_with("# Sync report: entry"));
    assert!(content.contains("- Status: **success**"));
}

#[test]
fn version_prints_name() {
    let output = gsync().arg("version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("gsync version"));
}
