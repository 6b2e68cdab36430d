//! Watcher cycles against the mock API with on-disk state

use libechobot::api::mock::{item, MockApi};
use libechobot::config::Config;
use libechobot::events::EventLog;
use libechobot::shutdown;
use libechobot::types::Account;
use libechobot::{watcher, Database};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

struct Env {
    dir: TempDir,
    config: Config,
    api: MockApi,
    db: Database,
}

impl Env {
    async fn new(excluded_languages: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().display().to_string().replace('\\', "/");
        let config = Config::from_toml(&format!(
            r#"
[database]
path = "{root}/echobot.db"

[api]
bearer_token = "token"

[files]
offset = "{root}/state/offset"
blocked_users = "{root}/blocked_users.txt"
blocked_phrases = "{root}/blocked_phrases.txt"
event_log = "{root}/events.jsonl"
scratch_dir = "{root}/scratch"

[watcher]
keywords = ["magadan", "магадан"]
check_interval = 1
excluded_languages = {excluded_languages}

[retry]
error_interval = 1
"#
        ))
        .unwrap();
        let db = Database::new(&config.database.path).await.unwrap();
        let api = MockApi::new(Account {
            id: 1,
            handle: "echobot".to_string(),
        });
        Self {
            dir,
            config,
            api,
            db,
        }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn worker(&self) -> libechobot::engine::PollWorker<watcher::SearchFeed> {
        watcher::build(
            &self.config,
            Arc::new(self.api.clone()),
            self.db.clone(),
            1,
            EventLog::new(self.path("events.jsonl")),
        )
    }

    fn offset(&self) -> String {
        fs::read_to_string(self.path("state/offset"))
            .unwrap()
            .trim()
            .to_string()
    }
}

#[tokio::test]
async fn test_full_cycle_filters_and_checkpoints() {
    let env = Env::new(r#"["ar"]"#).await;
    fs::create_dir_all(env.path("state")).unwrap();
    fs::write(env.path("state/offset"), "100\n").unwrap();
    fs::write(env.path("blocked_users.txt"), "spammer\n66\n").unwrap();
    fs::write(env.path("blocked_phrases.txt"), "casino\n").unwrap();

    let mut reshare = item(104, 5, "local", "RT magadan harbour");
    reshare.reshare_of = Some(90);
    let mut arabic = item(106, 7, "far", "magadan");
    arabic.lang = Some("ar".to_string());

    env.api.push_items(vec![
        item(107, 5, "local", "Магадан, утро"),
        arabic,
        item(105, 66, "someone", "magadan news"),
        reshare,
        item(103, 8, "spammer", "magadan deals"),
        item(102, 9, "guest", "magadan casino night"),
        item(101, 1, "echobot", "magadan weather"),
        item(99, 5, "local", "old magadan post"),
    ]);

    let (_trigger, shutdown) = shutdown::channel();
    let mut worker = env.worker();
    let report = worker.run_cycle(&shutdown).await.unwrap().unwrap();

    // The bot's own post and the already-seen one are never fetched
    assert_eq!(report.fetched, 6);
    assert_eq!(report.acted, 1);
    assert_eq!(report.skipped, 5);
    assert_eq!(env.api.retweeted(), vec![107]);
    assert_eq!(env.offset(), "107");

    let records = env.db.recent_retweets(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].item_id, 107);

    let events = fs::read_to_string(env.path("events.jsonl")).unwrap();
    let reasons: Vec<String> = events
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value
                .get("reason")
                .and_then(|r| r.as_str())
                .unwrap_or("acted")
                .to_string()
        })
        .collect();
    assert_eq!(
        reasons,
        vec![
            "blacklisted_word",
            "blacklisted_user",
            "already_retweeted",
            "blacklisted_user",
            "excluded_language",
            "acted",
        ]
    );
}

#[tokio::test]
async fn test_reshare_by_blocked_author_reports_reshare_only() {
    let env = Env::new("[]").await;
    fs::write(env.path("blocked_users.txt"), "spammer\n").unwrap();
    fs::create_dir_all(env.path("state")).unwrap();
    fs::write(env.path("state/offset"), "1").unwrap();

    let mut reshare = item(2, 8, "spammer", "RT magadan");
    reshare.reshare_of = Some(1);
    env.api.push_items(vec![reshare]);

    let (_trigger, shutdown) = shutdown::channel();
    env.worker().run_cycle(&shutdown).await.unwrap();

    let events = fs::read_to_string(env.path("events.jsonl")).unwrap();
    assert!(events.contains("already_retweeted"));
    assert!(!events.contains("blacklisted_user"));
}

#[tokio::test]
async fn test_restart_resumes_from_checkpoint() {
    let env = Env::new("[]").await;
    env.api.push_items(vec![item(10, 5, "local", "magadan")]);
    let (_trigger, shutdown) = shutdown::channel();

    // No checkpoint yet: the newest match only seeds it
    env.worker().run_cycle(&shutdown).await.unwrap();
    assert_eq!(env.offset(), "10");
    assert!(env.api.retweeted().is_empty());

    env.api.push_items(vec![item(11, 5, "local", "magadan"), item(12, 6, "other", "магадан")]);
    let report = env.worker().run_cycle(&shutdown).await.unwrap().unwrap();
    assert_eq!(report.acted, 2);

    // A fresh worker sees nothing new
    let report = env.worker().run_cycle(&shutdown).await.unwrap().unwrap();
    assert_eq!(report.fetched, 0);
    assert_eq!(env.api.retweeted(), vec![11, 12]);
    assert_eq!(env.offset(), "12");
}

#[tokio::test]
async fn test_garbage_checkpoint_is_rediscovered() {
    let env = Env::new("[]").await;
    fs::create_dir_all(env.path("state")).unwrap();
    fs::write(env.path("state/offset"), "not a number\n").unwrap();
    env.api.push_items(vec![item(50, 5, "local", "magadan")]);
    env.api.fail_next("discover_latest", 1);

    let (_trigger, shutdown) = shutdown::channel();
    env.worker().run_cycle(&shutdown).await.unwrap();

    assert_eq!(env.offset(), "50");
}

#[tokio::test]
async fn test_rejected_retweet_is_skipped_and_not_recorded() {
    let env = Env::new("[]").await;
    fs::create_dir_all(env.path("state")).unwrap();
    fs::write(env.path("state/offset"), "1").unwrap();
    env.api.push_items(vec![item(2, 5, "local", "magadan"), item(3, 5, "local", "magadan")]);
    env.api.reject_retweet(2);

    let (_trigger, shutdown) = shutdown::channel();
    let report = env.worker().run_cycle(&shutdown).await.unwrap().unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(env.offset(), "3");
    let records = env.db.recent_retweets(10).await.unwrap();
    assert_eq!(records.iter().map(|r| r.item_id).collect::<Vec<_>>(), vec![3]);
}
