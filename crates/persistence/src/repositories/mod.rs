//! Repository implementations for database operations.

pub mod job_descriptor;
pub mod lock;
pub mod main_dom_claim;
pub mod server_registration;

pub use job_descriptor::JobDescriptorRepository;
pub use lock::{DistributedLockRepository, LockError};
pub use main_dom_claim::MainDomClaimRepository;
pub use server_registration::ServerRegistrationRepository;
