//! Clock-triggered tasks
//!
//! A [`ScheduledWorker`] wakes up periodically, asks each of its
//! [`Trigger`]s whether the current time falls into a firing window and runs
//! the matching [`ScheduledTask`] at most once per window. The last window a
//! schedule fired for is kept in memory, so a restart inside a window may fire
//! again; tasks that must not repeat check the store themselves.

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDateTime, Timelike, Weekday};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::shutdown::Shutdown;

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// When a task is due
pub trait Trigger: Send + Sync {
    /// Start of the firing window containing `now`, or `None` outside any window
    fn window(&self, now: NaiveDateTime) -> Option<NaiveDateTime>;
}

fn top_of_minute(now: NaiveDateTime) -> Option<NaiveDateTime> {
    now.with_second(0).and_then(|t| t.with_nanosecond(0))
}

/// The whole of one weekday
#[derive(Debug, Clone, Copy)]
pub struct Weekly {
    pub weekday: Weekday,
}

impl Trigger for Weekly {
    fn window(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if now.weekday() != self.weekday {
            return None;
        }
        now.date().and_hms_opt(0, 0, 0)
    }
}

/// Minute zero of every hour divisible by `hours`
#[derive(Debug, Clone, Copy)]
pub struct EveryNHours {
    pub hours: u32,
}

impl Trigger for EveryNHours {
    fn window(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.hours == 0 || now.hour() % self.hours != 0 || now.minute() != 0 {
            return None;
        }
        top_of_minute(now)
    }
}

/// Minute zero of one hour every day
#[derive(Debug, Clone, Copy)]
pub struct DailyAt {
    pub hour: u32,
}

impl Trigger for DailyAt {
    fn window(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if now.hour() != self.hour || now.minute() != 0 {
            return None;
        }
        top_of_minute(now)
    }
}

/// Work run when a trigger fires
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &str;

    /// Do the work for the window starting at `now`.
    ///
    /// Remote calls inside are retried until they succeed or stop is
    /// requested; an `Err` is a local failure and the window is retried on
    /// the next tick.
    async fn fire(&self, now: NaiveDateTime, shutdown: &Shutdown) -> Result<()>;
}

struct Schedule {
    trigger: Box<dyn Trigger>,
    task: Box<dyn ScheduledTask>,
    last_fired: Option<NaiveDateTime>,
}

pub struct ScheduledWorker {
    name: String,
    clock: Arc<dyn Clock>,
    schedules: Vec<Schedule>,
    tick: Duration,
}

impl ScheduledWorker {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>, tick: Duration) -> Self {
        Self {
            name: name.into(),
            clock,
            schedules: Vec::new(),
            tick,
        }
    }

    pub fn with_schedule(
        mut self,
        trigger: impl Trigger + 'static,
        task: impl ScheduledTask + 'static,
    ) -> Self {
        self.schedules.push(Schedule {
            trigger: Box::new(trigger),
            task: Box::new(task),
            last_fired: None,
        });
        self
    }

    /// Fire every schedule whose window is open and not yet served.
    ///
    /// Returns how many tasks completed.
    pub async fn tick(&mut self, shutdown: &Shutdown) -> usize {
        let now = self.clock.now();
        let mut fired = 0;

        for schedule in &mut self.schedules {
            if shutdown.is_requested() {
                break;
            }
            let Some(window) = schedule.trigger.window(now) else {
                continue;
            };
            if schedule.last_fired == Some(window) {
                continue;
            }

            info!(worker = %self.name, task = schedule.task.name(), %window, "Task due");
            match schedule.task.fire(now, shutdown).await {
                Ok(()) => {
                    schedule.last_fired = Some(window);
                    fired += 1;
                }
                Err(e) => {
                    error!(worker = %self.name, task = schedule.task.name(), error = %e, "Task failed");
                }
            }
        }

        fired
    }

    pub async fn run(mut self, shutdown: Shutdown) -> Result<()> {
        info!(worker = %self.name, schedules = self.schedules.len(), "Worker started");

        loop {
            let fired = self.tick(&shutdown).await;
            if fired > 0 {
                debug!(worker = %self.name, fired, "Tick finished");
            }
            if shutdown.sleep(self.tick).await {
                break;
            }
        }

        info!(worker = %self.name, "Worker stopped");
        Ok(())
    }
}
