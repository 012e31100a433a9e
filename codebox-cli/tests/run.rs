//! End-to-end tests for the `codebox run` entry point.
//!
//! These drive the built binary in insecure mode so they work on hosts
//! without nsjail; the jailed path is covered by the library's own suite.

use assert_cmd::Command;
use predicates::prelude::*;

fn codebox() -> Command {
    Command::cargo_bin("codebox").expect("binary builds")
}

#[test]
fn run_executes_a_project_and_prints_json() {
    let project = r#"{
        "sources": { "hello.txt": "olá" },
        "commands": [
            { "command": "/bin/echo 1 2 3", "timeout": 1.0 },
            { "command": "/bin/cat hello.txt", "timeout": 1.0 }
        ]
    }"#;

    let assert = codebox()
        .args(["run", "--insecure"])
        .write_stdin(project)
        .assert()
        .success();

    let responses: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("stdout is JSON");
    assert_eq!(responses.as_array().map(|a| a.len()), Some(2));
    assert_eq!(responses[0]["stdout"], "1 2 3\n");
    assert_eq!(responses[0]["exit_code"], 0);
    assert_eq!(responses[1]["stdout"], "olá");
}

#[test]
fn timeouts_surface_in_the_response_not_the_exit_status() {
    let project = r#"{
        "sources": {},
        "commands": [ { "command": "/bin/sleep 1", "timeout": 0.1 } ]
    }"#;

    let assert = codebox()
        .args(["run", "--insecure"])
        .write_stdin(project)
        .assert()
        .success();

    let responses: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("stdout is JSON");
    assert_eq!(responses[0]["exit_code"], -1);
    assert_eq!(responses[0]["stderr"], "Timeout Error. Exceeded 0.1s");
}

#[test]
fn malformed_project_json_fails_loudly() {
    codebox()
        .args(["run", "--insecure"])
        .write_stdin("not a project")
        .assert()
        .failure()
        .stderr(predicate::str::contains("parsing project JSON"));
}

#[test]
fn path_escapes_are_rejected() {
    let project = r#"{
        "sources": { "../../../etc/passwd": "x" },
        "commands": [ { "command": "/bin/echo nope", "timeout": 1.0 } ]
    }"#;

    let assert = codebox()
        .args(["run", "--insecure"])
        .write_stdin(project)
        .assert()
        .success();

    let responses: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("stdout is JSON");
    assert_eq!(responses.as_array().map(|a| a.len()), Some(1));
    assert_eq!(responses[0]["stderr"], "Invalid file path: /etc/passwd");
    assert_eq!(responses[0]["exit_code"], -1);
}
