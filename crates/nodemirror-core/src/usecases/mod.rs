//! Use cases (interactors) for nodemirror
//!
//! This module contains the application use cases that orchestrate
//! domain entities and port interfaces. Use cases are thin coordinators
//! that delegate business rules to domain methods and I/O to ports.
//!
//! ## Use Cases
//!
//! - [`SessionManager`] - Authorization, token renewal, endpoint discovery, session persistence
//! - [`NodeRepository`] - Path resolution, tree queries, remote mutations with write-through

pub mod node_locks;
pub mod node_repository;
pub mod session_manager;

#[cfg(test)]
pub(crate) mod test_support;

pub use node_locks::{NodeLockGuard, NodeLocks};
pub use node_repository::{AppliedChange, NodeRepository};
pub use session_manager::{Credential, SessionManager};
