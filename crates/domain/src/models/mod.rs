//! Domain models for the farmhand scheduler.

pub mod job;
pub mod leadership;
pub mod lock;
pub mod runtime;
pub mod server_role;

pub use job::{JobDescriptor, RoleRequirement};
pub use leadership::{LeadershipClaim, MainDomState};
pub use lock::{LockId, LockMode, WELL_KNOWN_LOCKS};
pub use runtime::{RuntimeLevel, RuntimeState};
pub use server_role::ServerRole;
