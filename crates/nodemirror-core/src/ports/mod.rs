//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ICacheStore`] - Local node/edge/session persistence (SQLite, PostgreSQL, sled)
//! - [`IAuthProvider`] - OAuth code exchange and token refresh
//! - [`IRemoteService`] - Endpoint discovery, change feed, node mutations, content

pub mod auth_provider;
pub mod cache_store;
pub mod remote_service;

pub use auth_provider::IAuthProvider;
pub use cache_store::{ICacheStore, NodeFilter};
pub use remote_service::{
    AuthHandle, ByteRange, ChangePart, ChangeRequest, IRemoteService, RemoteResponse,
};
