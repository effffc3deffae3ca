//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod job_descriptor;
pub mod lock;
pub mod main_dom_claim;
pub mod server_registration;

pub use job_descriptor::JobDescriptorEntity;
pub use lock::LockEntity;
pub use main_dom_claim::MainDomClaimEntity;
pub use server_registration::ServerRegistrationEntity;
