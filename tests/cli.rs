use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("geoprompt").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: geoprompt <COMMAND>"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("models"));
}

#[test]
fn test_cli_start_help() {
    let mut cmd = Command::cargo_bin("geoprompt").unwrap();
    cmd.arg("start")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: geoprompt start"))
        .stdout(predicate::str::contains("--port <PORT>"))
        .stdout(predicate::str::contains("--model <MODEL>"))
        .stdout(predicate::str::contains("--stream"));
}

#[test]
fn test_cli_start_rejects_unknown_model() {
    let mut cmd = Command::cargo_bin("geoprompt").unwrap();
    cmd.args(["start", "--model", "gpt-2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown model 'gpt-2'"));
}

#[test]
fn test_cli_extract_reads_last_block_from_stdin() {
    let input = "First try:\n```\nX=\n```\nBetter:\n```\nA(0,0)\n\n  B(1,0)  \nPolygon[A,B]\n```\n";
    let mut cmd = Command::cargo_bin("geoprompt").unwrap();
    cmd.arg("extract")
        .write_stdin(input)
        .assert()
        .success()
        .stdout("A(0,0)\nB(1,0)\nPolygon[A,B]\n");
}

#[test]
fn test_cli_extract_without_block_prints_nothing() {
    let mut cmd = Command::cargo_bin("geoprompt").unwrap();
    cmd.arg("extract")
        .write_stdin("no commands here")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_cli_models_lists_known_ids() {
    let mut cmd = Command::cargo_bin("geoprompt").unwrap();
    cmd.arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("gpt-4o-mini"))
        .stdout(predicate::str::contains("deepseek-chat"));
}
