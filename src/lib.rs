//! Multisite reconciliation agent for the RADOS gateway.
//!
//! This crate keeps the georeplication topology of an object-storage gateway
//! cluster convergent with its declared configuration: realms, zonegroups,
//! zones, gateway users, and inter-zone sync policies. Each site runs one
//! leader-elected control agent; the leader is the only agent that mutates
//! remote topology state.
//!
//! # Architecture
//!
//! Reconciliation is an observe-diff-act loop. Every entry point re-derives
//! the current state from the remote topology store and the inbound relation
//! data, applies the minimal set of idempotent mutations, and reports a
//! single "mutated" signal that drives exactly one coordinated service
//! restart per mutating pass. Followers never mutate remote state; they
//! observe the leader's restart nonce and restart their own gateway once per
//! nonce change.
//!
//! # Modules
//!
//! - [`admin`] - Administrative interface client (radosgw-admin operations)
//! - [`config`] - Site configuration (realm/zonegroup/zone names, sync policy)
//! - [`reconciler`] - Reconciliation entry points and convergence logic
//! - [`relation`] - Handshake records exchanged between primary and secondary
//! - [`restart`] - Mutation tracking and restart/nonce coordination
//! - [`leader`] - Leader-scoped replicated key/value store
//! - [`service`] - Gateway service lifecycle (restart, pause, config render)
//! - [`retry`] - Bounded retry with exponential backoff
//! - [`error`] - Error types for the agent

#![deny(missing_docs)]

pub mod admin;
pub mod config;
pub mod error;
pub mod leader;
pub mod reconciler;
pub mod relation;
pub mod restart;
pub mod retry;
pub mod service;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralizing these here keeps the reconciler, the CLI and the test fixtures
// in agreement.

/// Name of the dedicated system user whose credentials drive inter-site sync.
///
/// Created once by the primary site and bound to the master zone; its keys
/// are shared with secondary sites through the relation handshake.
pub const MULTISITE_SYSTEM_USER: &str = "multisite-sync";

/// Identifier of the zonegroup-level sync policy group managed by this agent.
pub const DEFAULT_SYNC_GROUP_ID: &str = "default";

/// How many times list operations are retried when a just-created entity is
/// not yet visible in the remote store.
pub const LIST_RETRY_ATTEMPTS: u32 = 5;
