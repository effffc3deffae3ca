//! Persistence layer for the farmhand scheduler.
//!
//! This crate contains:
//! - Database connection management and migrations
//! - The scope coordinator (nestable units of work over one transaction)
//! - Entity definitions (database row mappings)
//! - Repository implementations, including the named lock store
//! - Database-backed implementations of the domain coordination traits

pub mod bootstrap;
pub mod db;
pub mod entities;
pub mod job_catalog;
pub mod main_dom_lock;
pub mod metrics;
pub mod repositories;
pub mod scope;
pub mod topology;

pub use job_catalog::PgJobCatalog;
pub use main_dom_lock::SqlMainDomLock;
pub use repositories::{DistributedLockRepository, LockError};
pub use scope::{
    IsolationLevel, NotificationMode, Scope, ScopeError, ScopeNotification, ScopeOutcome,
    ScopeProvider,
};
pub use topology::DatabaseElectionProbe;
