//! Storage layer for gsync.
//!
//! The sync engine only talks to stores through the traits in [`store`].
//! [`sqlite`] provides the concrete implementation with:
//! - Read-only opening for source stores
//! - Transaction discipline for each record write
//! - Audit events for history
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - SQLite record store
//! - [`store`] - CRUD traits consumed by the engine

pub mod events;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use sqlite::{MutationContext, SqliteStorage};
pub use store::{RecordSource, RecordStore};
