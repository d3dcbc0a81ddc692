// ABOUTME: Integration tests for the sqlite-db-transfer command line
// ABOUTME: Covers help-on-misuse, file-to-file copies, merges, and failure exit codes

use assert_cmd::Command;
use predicates::prelude::*;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

const HELP_HEADLINE: &str = "Transfer one SQLite database to another.";

fn create_cli_command() -> Command {
    Command::cargo_bin("sqlite-db-transfer").unwrap()
}

fn create_source_db(dir: &Path) -> PathBuf {
    let path = dir.join("source.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob');",
    )
    .unwrap();
    path
}

fn user_ids(path: &Path) -> Vec<i64> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id").unwrap();
    let ids = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<i64>, _>>()
        .unwrap();
    ids
}

#[test]
fn test_no_arguments_prints_help() {
    create_cli_command()
        .assert()
        .success()
        .stdout(predicate::str::contains(HELP_HEADLINE))
        .stdout(predicate::str::contains("sqlite-db-transfer <SOURCE> <DEST>"));
}

#[test]
fn test_one_argument_prints_help() {
    create_cli_command()
        .arg("only.db")
        .assert()
        .success()
        .stdout(predicate::str::contains(HELP_HEADLINE));
}

#[test]
fn test_three_arguments_print_help() {
    let temp_dir = tempfile::tempdir().unwrap();
    let dest = temp_dir.path().join("never.db");

    create_cli_command()
        .arg("a.db")
        .arg(&dest)
        .arg("c.db")
        .assert()
        .success()
        .stdout(predicate::str::contains(HELP_HEADLINE));

    assert!(!dest.exists());
}

#[test]
fn test_help_flag_is_not_special() {
    create_cli_command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(HELP_HEADLINE));
}

#[test]
fn test_copies_into_new_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = create_source_db(temp_dir.path());
    let dest = temp_dir.path().join("dest.db");

    create_cli_command()
        .arg(&source)
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains(HELP_HEADLINE).not());

    assert_eq!(user_ids(&dest), vec![1, 2]);
}

#[test]
fn test_merges_into_existing_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = create_source_db(temp_dir.path());
    let dest = temp_dir.path().join("dest.db");
    {
        let conn = Connection::open(&dest).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO users VALUES (7, 'Grace');",
        )
        .unwrap();
    }

    create_cli_command().arg(&source).arg(&dest).assert().success();

    assert_eq!(user_ids(&dest), vec![1, 2, 7]);
}

#[test]
fn test_memory_designator_is_a_file_path() {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = create_source_db(temp_dir.path());

    create_cli_command()
        .current_dir(temp_dir.path())
        .arg(&source)
        .arg(":memory:")
        .assert()
        .success();

    assert_eq!(user_ids(&temp_dir.path().join(":memory:")), vec![1, 2]);
}

#[test]
fn test_collision_exits_non_zero() {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = create_source_db(temp_dir.path());
    let dest = temp_dir.path().join("dest.db");

    create_cli_command().arg(&source).arg(&dest).assert().success();

    create_cli_command()
        .arg(&source)
        .arg(&dest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_unopenable_destination_exits_non_zero() {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = create_source_db(temp_dir.path());

    create_cli_command()
        .arg(&source)
        .arg("/nonexistent/dir/dest.db")
        .assert()
        .failure();
}

#[test]
fn test_leading_double_dash_is_not_an_escape() {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = create_source_db(temp_dir.path());
    let dest = temp_dir.path().join("dest.db");

    create_cli_command()
        .arg("--")
        .arg(&source)
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains(HELP_HEADLINE));

    assert!(!dest.exists());
}

#[test]
fn test_trailing_double_dash_is_a_destination() {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = create_source_db(temp_dir.path());

    create_cli_command()
        .current_dir(temp_dir.path())
        .arg(&source)
        .arg("--")
        .assert()
        .success()
        .stdout(predicate::str::contains(HELP_HEADLINE).not());

    assert_eq!(user_ids(&temp_dir.path().join("--")), vec![1, 2]);
}

#[test]
fn test_config_file_from_environment() {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = create_source_db(temp_dir.path());
    let dest = temp_dir.path().join("dest.db");
    let config = temp_dir.path().join("connect.toml");
    std::fs::write(&config, "busy_timeout_ms = 250\nisolation_level = \"immediate\"\n").unwrap();

    create_cli_command()
        .env("SQLITE_DB_TRANSFER_CONFIG", &config)
        .arg(&source)
        .arg(&dest)
        .assert()
        .success();

    assert_eq!(user_ids(&dest), vec![1, 2]);
}

#[test]
fn test_invalid_config_file_exits_non_zero() {
    let temp_dir = tempfile::tempdir().unwrap();
    let source = create_source_db(temp_dir.path());
    let dest = temp_dir.path().join("dest.db");
    let config = temp_dir.path().join("connect.toml");
    std::fs::write(&config, "isolation_level = \"serializable\"\n").unwrap();

    create_cli_command()
        .env("SQLITE_DB_TRANSFER_CONFIG", &config)
        .arg(&source)
        .arg(&dest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("connect.toml"));

    assert!(!dest.exists());
}
