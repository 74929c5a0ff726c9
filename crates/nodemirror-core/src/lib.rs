//! nodemirror Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Node`, `Session`, `TokenBundle`, `EdgePlan`
//! - **Use cases** - `SessionManager`, `NodeRepository`
//! - **Port definitions** - Traits for adapters: `ICacheStore`, `IAuthProvider`, `IRemoteService`
//! - **Configuration** - YAML configuration with validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement.
//! Use cases orchestrate domain entities through port interfaces.

pub mod config;
pub mod domain;
pub mod ports;
pub mod retry;
pub mod usecases;
