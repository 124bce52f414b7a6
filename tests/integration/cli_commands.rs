#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use assert_cmd::cargo::cargo_bin_cmd;
use burrow::db::{Database, DatabaseOptions, FileKind};
use burrow::primitives::stream::BufferedStream;
use burrow::primitives::wal::{Log, LogOptions};
use burrow::storage::ColumnInfo;
use burrow::types::{BurrowError, DataType, IndexId, TableId, Value};
use serde_json::Value as Json;
use tempfile::TempDir;

fn seed(dir: &Path) -> burrow::types::Result<()> {
    let mut db = Database::open(dir, DatabaseOptions::unsynced())?;
    db.create_table(
        TableId(1),
        "users",
        vec![ColumnInfo::id(), ColumnInfo::new("name", DataType::String)],
    )?;
    db.create_index(TableId(1), IndexId(2), &[1])?;
    db.batch(|db| {
        let t = db.table_mut(TableId(1)).ok_or(BurrowError::NotFound("table"))?;
        for name in ["ada", "grace", "alan"] {
            t.insert(&[Value::Int(0), Value::str(name)], None)?;
        }
        Ok(())
    })?;
    db.close()
}

fn setup() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    seed(dir.path()).expect("seed database");
    dir
}

fn crash_with_committed_write(dir: &Path) {
    let log = Arc::new(Log::open(dir, LogOptions { sync: false }).expect("open log"));
    let mut stream = BufferedStream::open(
        Arc::clone(&log),
        dir,
        FileKind::Table(TableId(9)).file_id(),
        64,
        false,
    )
    .expect("open stream");
    stream.write(b"\x01payload").expect("write");
    assert!(log.commit().expect("commit"));
}

fn json_output(args: &[&str], dir: &Path) -> Json {
    let output = cargo_bin_cmd!("burrow")
        .args(["--format", "json"])
        .args(args)
        .arg(dir)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn files_classifies_the_directory() {
    let dir = setup();
    let json = json_output(&["files"], dir.path());
    let kinds: Vec<&str> = json["files"]
        .as_array()
        .expect("files array")
        .iter()
        .filter_map(|f| f["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"string pool"));
    assert!(kinds.contains(&"table 1"));
    assert!(kinds.contains(&"index 2"));
    assert_eq!(json["unknown"].as_array().map(Vec::len), Some(0));
}

#[test]
fn log_then_recover_replays_the_commit() {
    let dir = setup();
    crash_with_committed_write(dir.path());

    let log = json_output(&["log"], dir.path());
    assert_eq!(log["committed_transactions"], 1);
    assert_eq!(log["uncommitted_entries"], 0);
    assert_eq!(log["entries"][0]["kind"], "write");
    assert_eq!(log["entries"][0]["file"], 22);

    let recovered = json_output(&["recover"], dir.path());
    assert_eq!(recovered["recovery"]["transactions"], 1);
    assert_eq!(recovered["recovery"]["entries_applied"], 1);
    let table9 = dir.path().join("22");
    assert_eq!(fs::read(table9).expect("replayed file"), b"\x01payload");

    let log = json_output(&["log"], dir.path());
    assert_eq!(log["entries"].as_array().map(Vec::len), Some(0));
}

#[test]
fn verify_index_reports_counts() {
    let dir = setup();
    let json = json_output(
        &["verify-index", "--index", "2", "--types", "string"],
        dir.path(),
    );
    assert_eq!(json["success"], true);
    assert_eq!(json["counts"]["records"], 3);
    assert_eq!(json["key_types"][0], "string");
}

#[test]
fn verify_missing_index_fails() {
    let dir = setup();
    cargo_bin_cmd!("burrow")
        .args(["verify-index", "--index", "40", "--types", "int"])
        .arg(dir.path())
        .assert()
        .failure();
}

#[test]
fn missing_directory_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("burrow")
        .arg("files")
        .arg(dir.path().join("nope"))
        .assert()
        .code(1);
}

#[test]
fn config_show_applies_profiles() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        "[profiles.fast]\nsynchronous = \"off\"\nbuffer_size = 8192\n",
    )
    .expect("write config");
    let output = cargo_bin_cmd!("burrow")
        .args(["--format", "json", "--profile", "fast", "--config"])
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Json = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["effective"]["synchronous"], "off");
    assert_eq!(json["effective"]["buffer_size"], 8192);
    assert_eq!(json["profiles"][0]["name"], "fast");
}

#[test]
fn text_output_mentions_recovery() {
    let dir = setup();
    crash_with_committed_write(dir.path());
    let output = cargo_bin_cmd!("burrow")
        .args(["--color", "never", "recover"])
        .arg(dir.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("Recovery"));
    assert!(text.contains("transactions: 1"));
}
