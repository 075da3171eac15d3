//! # Gauntlet Database Crate
//!
//! The durable queue the pipeline stages communicate through. A strategy's status
//! column is its queue position and, together with the claim columns, its ownership
//! token.
//!
//! ## Public API
//!
//! - `StrategyStore`: the store contract every stage is written against.
//! - `KlineStore`: read access to historical bars.
//! - `DbRepository`: the PostgreSQL implementation (`sqlx`).
//! - `MemoryStore`: an in-process implementation with identical semantics.
//! - `connect` / `run_migrations`: pool setup and schema management.
//! - `DbError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod memory;
pub mod repository;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::MemoryStore;
pub use repository::DbRepository;
pub use store::{KlineStore, StrategyStore, ROTATOR_ACTOR};
