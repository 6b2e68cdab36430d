//! Weather posts
//!
//! Two schedules share one worker: current conditions every few hours and a
//! next-day forecast in the evening. Both download an XML document, keep a
//! scratch copy of it and post one message per segment.

pub mod feed;
pub mod format;

use async_trait::async_trait;
use chrono::{Days, NaiveDateTime};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::{ForecastFetcher, RemoteApi};
use crate::config::{expand_path, Config};
use crate::engine::{Clock, DailyAt, EveryNHours, ScheduledTask, ScheduledWorker};
use crate::error::{BotError, Result};
use crate::events::{Decision, EventLog};
use crate::retry::{retry_forever, RetryPolicy};
use crate::shutdown::Shutdown;

pub const WORKER_NAME: &str = "weather";

/// Upper bound on the wake-up interval so minute-zero windows are not missed
const MAX_TICK: Duration = Duration::from_secs(30);

/// What both weather tasks need
#[derive(Clone)]
pub struct WeatherContext {
    pub api: Arc<dyn RemoteApi>,
    pub fetcher: Arc<dyn ForecastFetcher>,
    pub scratch_dir: PathBuf,
    pub hashtag: String,
    pub retry: RetryPolicy,
    pub events: EventLog,
}

impl WeatherContext {
    /// Download `url`, retrying until it succeeds, and keep a copy as `file`
    async fn download(&self, url: &str, file: &str, shutdown: &Shutdown) -> Result<Option<String>> {
        info!(worker = WORKER_NAME, url, "Loading weather data");
        let fetcher = &self.fetcher;
        let Some(body) = retry_forever(&self.retry, shutdown, "weather feed", move || fetcher.fetch(url)).await
        else {
            return Ok(None);
        };
        feed::save_copy(&self.scratch_dir, file, &body).await?;
        Ok(Some(body))
    }

    /// Returns `false` if stop was requested before the post went out
    async fn publish(&self, kind: &str, text: &str, shutdown: &Shutdown) -> bool {
        let api = &self.api;
        if retry_forever(&self.retry, shutdown, "post weather", move || api.post(text))
            .await
            .is_none()
        {
            return false;
        }

        let decision = Decision::Posted {
            kind: kind.to_string(),
        };
        if let Err(e) = self.events.record(WORKER_NAME, 0, &decision, &text).await {
            warn!(worker = WORKER_NAME, error = %e, "Failed to append to the event log");
        }
        true
    }
}

/// Conditions right now, from the hour-by-hour feed
pub struct ConditionsTask {
    ctx: WeatherContext,
    url: String,
}

impl ConditionsTask {
    pub fn new(ctx: WeatherContext, url: impl Into<String>) -> Self {
        Self {
            ctx,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ScheduledTask for ConditionsTask {
    fn name(&self) -> &str {
        "current weather"
    }

    async fn fire(&self, _now: NaiveDateTime, shutdown: &Shutdown) -> Result<()> {
        let Some(body) = self.ctx.download(&self.url, feed::HOURLY_FILE, shutdown).await? else {
            return Ok(());
        };
        let current = feed::parse_current(&body)?;
        let text = format::current_message(&current, &self.ctx.hashtag);
        self.ctx.publish("current_weather", &text, shutdown).await;
        Ok(())
    }
}

/// Tomorrow's daytime and night segments, from the multi-day feed
pub struct ForecastTask {
    ctx: WeatherContext,
    url: String,
}

impl ForecastTask {
    pub fn new(ctx: WeatherContext, url: impl Into<String>) -> Self {
        Self {
            ctx,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ScheduledTask for ForecastTask {
    fn name(&self) -> &str {
        "tomorrow forecast"
    }

    async fn fire(&self, now: NaiveDateTime, shutdown: &Shutdown) -> Result<()> {
        let Some(body) = self.ctx.download(&self.url, feed::DAILY_FILE, shutdown).await? else {
            return Ok(());
        };
        let all = feed::parse(&body)?;

        let tomorrow = now.date() + Days::new(1);
        let day = feed::select(&all, tomorrow, feed::PERIOD_DAY)
            .ok_or_else(|| BotError::Weather(format!("no daytime segment for {}", tomorrow)))?;
        let night = feed::select(&all, tomorrow, feed::PERIOD_NIGHT)
            .ok_or_else(|| BotError::Weather(format!("no night segment for {}", tomorrow)))?;

        let day_text = format::day_message(day, &self.ctx.hashtag);
        if !self.ctx.publish("forecast_day", &day_text, shutdown).await {
            return Ok(());
        }
        let night_text = format::night_message(night, &self.ctx.hashtag);
        self.ctx.publish("forecast_night", &night_text, shutdown).await;
        Ok(())
    }
}

pub fn build(
    config: &Config,
    api: Arc<dyn RemoteApi>,
    fetcher: Arc<dyn ForecastFetcher>,
    events: EventLog,
    clock: Arc<dyn Clock>,
) -> ScheduledWorker {
    let ctx = WeatherContext {
        api,
        fetcher,
        scratch_dir: expand_path(&config.files.scratch_dir),
        hashtag: config.weather.hashtag.clone(),
        retry: RetryPolicy::fixed(config.error_interval()),
        events,
    };
    let tick = config.check_interval().min(MAX_TICK);

    ScheduledWorker::new(WORKER_NAME, clock, tick)
        .with_schedule(
            EveryNHours {
                hours: config.weather.every_hours,
            },
            ConditionsTask::new(ctx.clone(), config.weather.hourly_url.clone()),
        )
        .with_schedule(
            DailyAt {
                hour: config.weather.evening_hour,
            },
            ForecastTask::new(ctx, config.weather.daily_url.clone()),
        )
}
