//! Authentication and listing authorization

pub mod middleware;
#[cfg(test)]
mod middleware_tests;
pub mod ownership;
pub mod password;
pub mod policy;
pub mod sessions;
pub mod store;

pub use middleware::{require_auth, AuthError};
pub use ownership::{
    ListingGuard, ListingWrite, MemoryOwnershipDirectory, OwnershipDirectory, PgOwnershipDirectory,
};
pub use password::{hash_password, verify_password};
pub use policy::{authorize, AgentAffiliation, Decision, DenyReason, ListingAction, OwnerChain};
pub use sessions::{hash_token, strip_bearer, IssuedSession, SessionResolver};
pub use store::{CredentialStore, MemoryCredentialStore, PgCredentialStore, UserRecord};
