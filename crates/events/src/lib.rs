//! # Gauntlet Events
//!
//! This crate defines the in-process event structures the pipeline broadcasts when
//! strategies move between stages, when generation is paused or resumed, and when
//! the rotator commits a plan.
//!
//! As a Layer 0 crate, it depends only on `core-types`. Events are informational:
//! the durable store stays the source of truth, so a dropped event loses nothing.

// Declare the modules that make up this crate.
pub mod bus;
pub mod error;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use bus::{next_event, spawn_logger, EventBus};
pub use error::EventsError;
pub use messages::{EventEnvelope, PipelineEvent};
