//! Integration tests for nodemirror-remote
//!
//! Uses wiremock to simulate the remote object store and its token
//! endpoints, and verifies the adapters end to end.

mod common;

mod test_auth;
mod test_changes;
mod test_content;
mod test_mutations;
