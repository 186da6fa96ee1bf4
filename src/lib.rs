//! processmanager - Orchestration instance lifecycle and scheduling engine
//!
//! Tracks runs of long-running business processes for an energy-market
//! data hub. The engine owns the process descriptions, the instance and
//! step state machines, and the commands that create instances. Step
//! execution belongs to an external execution substrate that reports back
//! through the progress surface.
//!
//! # Modules
//!
//! - `domain`: Descriptions, instances, lifecycles, identities
//! - `core`: Synchronizer, commands, recurring planner, queries, progress
//! - `persistence`: Repository trait with SQLite and in-memory stores
//! - `adapters`: Execution substrate seam and the JSONL outbox
//! - `processes`: The process modules this host declares
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Persist the declared descriptions
//! processmanager sync
//!
//! # Start a calculation
//! processmanager start Brs_023_027_v1 --input-file calculation.json
//!
//! # Plan recurring instances for the next window
//! processmanager plan
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod processes;

// Re-export main types at crate root for convenience
pub use core::{
    DescriptionSynchronizer, EngineSettings, OrchestrationInstanceManager,
    OrchestrationInstanceProgress, OrchestrationInstanceQueries, RecurringPlanner,
    SynchronizationState,
};
pub use domain::{
    OperatingIdentity, OrchestrationDescription, OrchestrationDescriptionUniqueName,
    OrchestrationInstance, OrchestrationInstanceId,
};
pub use error::{OrchestrationError, Result};
