//! Shared utilities and common types for the farmhand scheduler.
//!
//! This crate provides functionality used across all other crates:
//! - First-run time and cron expression parsing
//! - Tick conversion for persisted durations

pub mod schedule;
pub mod ticks;

pub use schedule::{CronError, CronSchedule, FirstRunTime};
