//! Domain entities and business logic
//!
//! This module contains the core domain types for nodemirror:
//! - Newtypes for remote identifiers and cursors
//! - The cached `Node` and its kind/status enums
//! - The persisted `Session` with its token bundle and endpoints
//! - Edge reconciliation planning
//! - Structured outcomes and the error taxonomy

pub mod edge;
pub mod errors;
pub mod newtypes;
pub mod node;
pub mod outcome;
pub mod session;

// Re-export commonly used types
pub use edge::EdgePlan;
pub use errors::{DomainError, MirrorError};
pub use newtypes::*;
pub use node::{Node, NodeKind, NodeStatus};
pub use outcome::{AuthorizeOutcome, NodeOutcome};
pub use session::{
    authorization_code_from_callback, validate_expires_in, Endpoints, Session, TokenBundle,
    DEFAULT_EXPIRES_IN_SECS, MAX_EXPIRES_IN_SECS,
};
