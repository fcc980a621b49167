//! Worker runtime: the scheduler loop that drives both pipelines.

pub mod scheduler;

pub use scheduler::{Scheduler, TickReport, spawn_scheduler};
