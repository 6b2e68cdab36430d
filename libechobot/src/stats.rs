//! Weekly follower and retweet summary

use async_trait::async_trait;
use chrono::{Days, NaiveDateTime, NaiveTime};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::RemoteApi;
use crate::config::Config;
use crate::db::Database;
use crate::engine::{Clock, ScheduledTask, ScheduledWorker, Weekly};
use crate::error::Result;
use crate::events::{Decision, EventLog};
use crate::retry::{retry_forever, RetryPolicy};
use crate::shutdown::Shutdown;
use crate::types::StatsSnapshot;

pub const WORKER_NAME: &str = "stats";

/// Followers gained and lost between two snapshots
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FollowerDelta {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl FollowerDelta {
    /// Both sides are empty when there is nothing to compare against
    pub fn between(old: Option<&BTreeSet<String>>, new: &BTreeSet<String>) -> Self {
        match old {
            Some(old) => Self {
                added: new.difference(old).cloned().collect(),
                removed: old.difference(new).cloned().collect(),
            },
            None => Self::default(),
        }
    }
}

pub fn compose_stats(total: usize, delta: &FollowerDelta, retweets: i64, hashtag: &str) -> String {
    let mut text = String::from("Статистика прошедшей недели:\n\n");
    text.push_str(&format!("Всего фолловеров: {}\n", total));
    if !delta.added.is_empty() {
        text.push_str(&format!("Новых: {}\n", delta.added.len()));
    }
    if !delta.removed.is_empty() {
        text.push_str(&format!("Отписавшихся: {}\n", delta.removed.len()));
    }
    text.push_str(&format!("\nВсего ретвитов: {}\n", retweets));
    text.push('\n');
    text.push_str(hashtag);
    text
}

pub struct StatsTask {
    api: Arc<dyn RemoteApi>,
    db: Database,
    own_id: u64,
    hashtag: String,
    retry: RetryPolicy,
    events: EventLog,
}

impl StatsTask {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        db: Database,
        own_id: u64,
        hashtag: impl Into<String>,
        retry: RetryPolicy,
        events: EventLog,
    ) -> Self {
        Self {
            api,
            db,
            own_id,
            hashtag: hashtag.into(),
            retry,
            events,
        }
    }
}

#[async_trait]
impl ScheduledTask for StatsTask {
    fn name(&self) -> &str {
        "weekly stats"
    }

    async fn fire(&self, now: NaiveDateTime, shutdown: &Shutdown) -> Result<()> {
        let today = now.date();
        if self.db.get_stats(today).await?.is_some() {
            info!(worker = WORKER_NAME, %today, "Stats already have been posted today");
            return Ok(());
        }

        info!(worker = WORKER_NAME, "Getting followers list");
        let api = &self.api;
        let own_id = self.own_id;
        let Some(followers) =
            retry_forever(&self.retry, shutdown, "follower ids", move || api.follower_ids(own_id)).await
        else {
            return Ok(());
        };

        // Today's snapshot marks the day as served, so it is stored last
        let week_ago = today - Days::new(7);
        let old = self.db.get_stats(week_ago).await?;
        if old.is_none() {
            info!(worker = WORKER_NAME, %week_ago, "There is no snapshot from a week ago");
        }
        let delta = FollowerDelta::between(old.as_ref().map(|s| &s.followers), &followers);

        let from = week_ago.and_time(NaiveTime::MIN);
        let until = today.and_time(NaiveTime::MIN);
        let retweets = self.db.count_retweets_between(from, until).await?;
        let text = compose_stats(followers.len(), &delta, retweets, &self.hashtag);

        let snapshot = StatsSnapshot {
            date: today,
            followers,
        };
        self.db.save_stats(&snapshot).await?;
        info!(worker = WORKER_NAME, followers = snapshot.followers.len(), "Snapshot saved");

        let text_ref = text.as_str();
        if retry_forever(&self.retry, shutdown, "post stats", move || api.post(text_ref))
            .await
            .is_none()
        {
            return Ok(());
        }

        let decision = Decision::Posted {
            kind: "weekly_stats".to_string(),
        };
        if let Err(e) = self.events.record(WORKER_NAME, 0, &decision, &text).await {
            warn!(worker = WORKER_NAME, error = %e, "Failed to append to the event log");
        }
        Ok(())
    }
}

pub fn build(
    config: &Config,
    api: Arc<dyn RemoteApi>,
    db: Database,
    own_id: u64,
    events: EventLog,
    clock: Arc<dyn Clock>,
) -> ScheduledWorker {
    let task = StatsTask::new(
        api,
        db,
        own_id,
        config.stats.hashtag.clone(),
        RetryPolicy::fixed(config.error_interval()),
        events,
    );
    ScheduledWorker::new(WORKER_NAME, clock, config.check_interval()).with_schedule(
        Weekly {
            weekday: config.stats.weekday,
        },
        task,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{item, MockApi};
    use crate::shutdown;
    use crate::types::{Account, ActionRecord};
    use chrono::NaiveDate;
    use std::time::Duration;
    use tempfile::TempDir;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_delta_between_snapshots() {
        let delta = FollowerDelta::between(Some(&set(&["A", "B", "C"])), &set(&["B", "C", "D"]));
        assert_eq!(delta.added, set(&["D"]));
        assert_eq!(delta.removed, set(&["A"]));
    }

    #[test]
    fn test_delta_without_previous_snapshot() {
        let delta = FollowerDelta::between(None, &set(&["B", "C", "D"]));
        assert_eq!(delta, FollowerDelta::default());
    }

    #[test]
    fn test_compose_omits_empty_changes() {
        let text = compose_stats(3, &FollowerDelta::default(), 12, "#AllMagadanWeekly");
        assert_eq!(
            text,
            "Статистика прошедшей недели:\n\nВсего фолловеров: 3\n\nВсего ретвитов: 12\n\n#AllMagadanWeekly"
        );
    }

    #[test]
    fn test_compose_with_changes() {
        let delta = FollowerDelta::between(Some(&set(&["A", "B", "C"])), &set(&["B", "C", "D", "E"]));
        let text = compose_stats(4, &delta, 0, "#weekly");
        assert!(text.contains("Новых: 2\n"));
        assert!(text.contains("Отписавшихся: 1\n"));
        assert!(text.contains("Всего ретвитов: 0\n"));
    }

    async fn setup(dir: &TempDir) -> (MockApi, Database, StatsTask) {
        let db = Database::new(dir.path().join("bot.db").to_str().unwrap())
            .await
            .unwrap();
        let api = MockApi::new(Account {
            id: 1,
            handle: "echobot".to_string(),
        });
        let task = StatsTask::new(
            Arc::new(api.clone()),
            db.clone(),
            1,
            "#AllMagadanWeekly",
            RetryPolicy::fixed(Duration::from_millis(5)),
            EventLog::disabled(),
        );
        (api, db, task)
    }

    fn monday_noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 11)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_weekly_post_counts_last_week() {
        let dir = TempDir::new().unwrap();
        let (api, db, task) = setup(&dir).await;
        api.set_followers(["B", "C", "D"]);
        api.fail_next("follower_ids", 2);
        db.save_stats(&StatsSnapshot {
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            followers: set(&["A", "B", "C"]),
        })
        .await
        .unwrap();

        let at = |d: u32, h: u32| {
            NaiveDate::from_ymd_opt(2024, 3, d)
                .unwrap()
                .and_hms_opt(h, 30, 0)
                .unwrap()
        };
        // Inside the window: March 4 00:30 and March 10 23:30; outside: March 11
        for (i, when) in [at(4, 0), at(10, 23), at(11, 0)].into_iter().enumerate() {
            db.record_retweet(&ActionRecord::new(&item(i as u64 + 1, 5, "a", "x"), when))
                .await
                .unwrap();
        }

        let (_trigger, shutdown) = shutdown::channel();
        task.fire(monday_noon(), &shutdown).await.unwrap();

        let posted = api.posted();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].contains("Всего фолловеров: 3\n"));
        assert!(posted[0].contains("Новых: 1\n"));
        assert!(posted[0].contains("Отписавшихся: 1\n"));
        assert!(posted[0].contains("Всего ретвитов: 2\n"));
        assert!(db
            .get_stats(monday_noon().date())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_second_fire_same_day_does_not_post() {
        let dir = TempDir::new().unwrap();
        let (api, _db, task) = setup(&dir).await;
        api.set_followers(["A"]);

        let (_trigger, shutdown) = shutdown::channel();
        task.fire(monday_noon(), &shutdown).await.unwrap();
        task.fire(monday_noon(), &shutdown).await.unwrap();

        assert_eq!(api.posted().len(), 1);
    }
}
