//! Domain layer for the farmhand scheduler.
//!
//! This crate contains:
//! - Domain models (server roles, runtime levels, job descriptors, locks, leadership claims)
//! - Coordination services (delay calculation, main-dom election, role classification)
//! - The job catalogue abstraction

pub mod models;
pub mod services;
