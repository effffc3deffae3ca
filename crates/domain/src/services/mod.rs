//! Coordination services for the farmhand scheduler.

pub mod delay;
pub mod job_catalog;
pub mod main_dom;
pub mod server_role;

pub use delay::get_delay;
pub use job_catalog::{CatalogError, InMemoryJobCatalog, JobCatalog};
pub use main_dom::{LocalMainDomLock, MainDom, MainDomError, MainDomLock, ReleaseCallback};
pub use server_role::{ProbeError, ServerRoleClassifier, ServerRoleSettings, TopologyProbe};
