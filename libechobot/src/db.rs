//! Database operations for echobot

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, Result};
use crate::types::{ActionRecord, StatsSnapshot, DATE_FORMAT, TIMESTAMP_FORMAT};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work for the SQLite URL on every platform
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Insert an action record.
    ///
    /// Returns `false` when a row with the same `retweeted_at` already exists.
    pub async fn record_retweet(&self, record: &ActionRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO retweets (retweeted_at, created_at, user_id, user_handle, user_name, item_id, item_text)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(retweeted_at) DO NOTHING
            "#,
        )
        .bind(&record.retweeted_at)
        .bind(&record.created_at)
        .bind(record.user_id as i64)
        .bind(&record.user_handle)
        .bind(&record.user_name)
        .bind(record.item_id as i64)
        .bind(&record.item_text)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Count retweets with `from <= retweeted_at < until`
    pub async fn count_retweets_between(
        &self,
        from: NaiveDateTime,
        until: NaiveDateTime,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM retweets
            WHERE retweeted_at >= ? AND retweeted_at < ?
            "#,
        )
        .bind(from.format(TIMESTAMP_FORMAT).to_string())
        .bind(until.format(TIMESTAMP_FORMAT).to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count)
    }

    /// Most recent retweets first
    pub async fn recent_retweets(&self, limit: usize) -> Result<Vec<ActionRecord>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT retweeted_at, created_at, user_id, user_handle, user_name, item_id, item_text
            FROM retweets
            ORDER BY retweeted_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| ActionRecord {
                retweeted_at: r.get("retweeted_at"),
                created_at: r.get("created_at"),
                user_id: r.get::<i64, _>("user_id") as u64,
                user_handle: r.get("user_handle"),
                user_name: r.get("user_name"),
                item_id: r.get::<i64, _>("item_id") as u64,
                item_text: r.get("item_text"),
            })
            .collect())
    }

    pub async fn get_stats(&self, date: NaiveDate) -> Result<Option<StatsSnapshot>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT followers FROM stats WHERE date = ?
            "#,
        )
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|(followers,)| StatsSnapshot {
            date,
            followers: StatsSnapshot::split(&followers),
        }))
    }

    /// Store a snapshot; returns `false` if that date already has one
    pub async fn save_stats(&self, snapshot: &StatsSnapshot) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO stats (date, followers)
            VALUES (?, ?)
            ON CONFLICT(date) DO NOTHING
            "#,
        )
        .bind(snapshot.date.format(DATE_FORMAT).to_string())
        .bind(snapshot.joined())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use crate::types::{Author, Item};
    use std::collections::BTreeSet;

    async fn memory_db() -> Database {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        Database { pool }
    }

    fn item(id: u64) -> Item {
        Item {
            id,
            created_at: "2024-03-01T10:00:00Z".to_string(),
            author: Author {
                id: 42,
                handle: "magadan_news".to_string(),
                name: "Magadan News".to_string(),
            },
            text: format!("post {}", id),
            lang: Some("ru".to_string()),
            reshare_of: None,
        }
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_database_initialization_with_invalid_path() {
        #[cfg(unix)]
        let invalid_path = "/tmp/test\0invalid.db";

        #[cfg(windows)]
        let invalid_path = "C:\\invalid<>path\\test.db";

        let result = Database::new(invalid_path).await;
        assert!(matches!(result, Err(BotError::Database(_))));
    }

    #[tokio::test]
    async fn test_database_file_created() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("bot.db");
        let _db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_record_retweet_roundtrip() {
        let db = memory_db().await;
        let record = ActionRecord::new(&item(100), at(1, 12, 0));

        assert!(db.record_retweet(&record).await.unwrap());

        let rows = db.recent_retweets(10).await.unwrap();
        assert_eq!(rows, vec![record]);
    }

    #[tokio::test]
    async fn test_duplicate_retweet_is_ignored() {
        let db = memory_db().await;
        let first = ActionRecord::new(&item(100), at(1, 12, 0));
        let second = ActionRecord::new(&item(101), at(1, 12, 0));

        assert!(db.record_retweet(&first).await.unwrap());
        assert!(!db.record_retweet(&second).await.unwrap());
        assert_eq!(db.recent_retweets(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_count_retweets_between_is_half_open() {
        let db = memory_db().await;
        for (i, ts) in [at(3, 23, 59), at(4, 0, 0), at(7, 15, 30), at(11, 0, 0)]
            .into_iter()
            .enumerate()
        {
            db.record_retweet(&ActionRecord::new(&item(i as u64), ts))
                .await
                .unwrap();
        }

        let count = db.count_retweets_between(at(4, 0, 0), at(11, 0, 0)).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_stats_one_row_per_date() {
        let db = memory_db().await;
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let followers: BTreeSet<String> = ["10", "20"].iter().map(|s| s.to_string()).collect();
        let snapshot = StatsSnapshot { date, followers };

        assert!(db.get_stats(date).await.unwrap().is_none());
        assert!(db.save_stats(&snapshot).await.unwrap());

        let again = StatsSnapshot {
            date,
            followers: BTreeSet::new(),
        };
        assert!(!db.save_stats(&again).await.unwrap());
        assert_eq!(db.get_stats(date).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_concurrent_retweet_writes() {
        let db = memory_db().await;
        let mut handles = vec![];

        for i in 0..3u32 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.record_retweet(&ActionRecord::new(&item(i as u64), at(1, 10, i)))
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }
        assert_eq!(db.recent_retweets(10).await.unwrap().len(), 3);
    }
}
