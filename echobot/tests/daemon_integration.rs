//! Integration tests for the echobot binary

use assert_cmd::Command;
use libechobot::Database;
use mockito::Matcher;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Write a config pointing every file into a temp dir and the API at `base_url`
fn setup_test_env(base_url: &str, keywords: &str) -> (TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().display().to_string().replace('\\', "/");
    let config_path = temp_dir.path().join("config.toml");

    let config_content = format!(
        r#"
[database]
path = "{root}/echobot.db"

[api]
base_url = "{base_url}"
bearer_token = "test-token"

[files]
offset = "{root}/offset"
blocked_users = "{root}/blocked_users.txt"
blocked_phrases = "{root}/blocked_phrases.txt"
event_log = "{root}/events.jsonl"
scratch_dir = "{root}/scratch"

[watcher]
keywords = {keywords}
check_interval = 1

[retry]
error_interval = 1

[stats]
enabled = false
"#
    );
    fs::write(&config_path, config_content).unwrap();

    (temp_dir, config_path.to_str().unwrap().to_string())
}

#[test]
fn test_help_lists_flags() {
    let mut cmd = Command::cargo_bin("echobot").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--no-weather"))
        .stdout(predicate::str::contains("EXIT CODES"));
}

#[test]
fn test_missing_config_is_a_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    let mut cmd = Command::cargo_bin("echobot").unwrap();
    cmd.env_remove("ECHOBOT_BEARER_TOKEN")
        .arg("--config")
        .arg(&missing)
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_empty_keywords_rejected() {
    let (_temp_dir, config_path) = setup_test_env("http://127.0.0.1:9", "[]");

    let mut cmd = Command::cargo_bin("echobot").unwrap();
    cmd.env_remove("ECHOBOT_BEARER_TOKEN")
        .arg("--config")
        .arg(&config_path)
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("watcher.keywords"));
}

#[test]
fn test_invalid_log_format_rejected() {
    let mut cmd = Command::cargo_bin("echobot").unwrap();
    cmd.arg("--log-format")
        .arg("xml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log format"));
}

#[tokio::test]
async fn test_once_retweets_and_checkpoints() {
    let mut server = mockito::Server::new_async().await;
    let (temp_dir, config_path) = setup_test_env(&server.url(), r#"["magadan"]"#);
    fs::write(temp_dir.path().join("offset"), "100\n").unwrap();
    fs::write(temp_dir.path().join("blocked_users.txt"), "spammer\n").unwrap();

    let _me = server
        .mock("GET", "/2/users/me")
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_body(r#"{"data":{"id":"1","username":"echobot","name":"Echo"}}"#)
        .create_async()
        .await;
    let _search = server
        .mock("GET", "/2/tweets/search/recent")
        .match_query(Matcher::UrlEncoded("since_id".into(), "100".into()))
        .with_status(200)
        .with_body(
            r#"{
                "data": [
                    {"id":"102","text":"magadan evening","author_id":"6","created_at":"2024-03-11T18:00:00.000Z","lang":"ru"},
                    {"id":"101","text":"magadan morning","author_id":"5","created_at":"2024-03-11T08:00:00.000Z","lang":"ru"}
                ],
                "includes": {"users": [
                    {"id":"5","username":"local","name":"Local"},
                    {"id":"6","username":"spammer","name":"Spam"}
                ]},
                "meta": {"result_count": 2}
            }"#,
        )
        .create_async()
        .await;
    let retweet = server
        .mock("POST", "/2/users/1/retweets")
        .match_body(Matcher::PartialJsonString(r#"{"tweet_id":"101"}"#.to_string()))
        .with_status(200)
        .with_body(r#"{"data":{"retweeted":true}}"#)
        .expect(1)
        .create_async()
        .await;

    let mut cmd = Command::cargo_bin("echobot").unwrap();
    cmd.env_remove("ECHOBOT_BEARER_TOKEN")
        .arg("--config")
        .arg(&config_path)
        .arg("--once")
        .assert()
        .success();

    retweet.assert_async().await;
    let offset = fs::read_to_string(temp_dir.path().join("offset")).unwrap();
    assert_eq!(offset.trim(), "102");

    let db = Database::new(temp_dir.path().join("echobot.db").to_str().unwrap())
        .await
        .unwrap();
    let records = db.recent_retweets(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].item_id, 101);
    assert_eq!(records[0].user_handle, "local");

    let events = fs::read_to_string(temp_dir.path().join("events.jsonl")).unwrap();
    assert!(events.contains("blacklisted_user"));
}
