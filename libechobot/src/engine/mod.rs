//! Generic worker engines
//!
//! Both bot loops are instances of one of two shapes: a poll-filter-act
//! cycle over a remote feed ([`poll`]) or tasks fired by wall-clock windows
//! ([`schedule`]).

pub mod poll;
pub mod schedule;

pub use poll::{Action, CycleReport, Feed, Filter, PollWorker};
pub use schedule::{
    Clock, DailyAt, EveryNHours, LocalClock, ManualClock, ScheduledTask, ScheduledWorker, Trigger,
    Weekly,
};
