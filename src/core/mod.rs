//! Core orchestration logic.
//!
//! This module contains:
//! - Registry: description synchronization and readiness
//! - Commands: start, schedule, cancel and activation
//! - Scheduler: recurring planning
//! - Query: instance search
//! - Progress: lifecycle callbacks for the execution substrate

pub mod clock;
pub mod commands;
pub mod progress;
pub mod query;
pub mod registry;
pub mod scheduler;
pub mod settings;

// Re-export commonly used types
pub use clock::{Clock, FixedClock, SystemClock};
pub use commands::OrchestrationInstanceManager;
pub use progress::OrchestrationInstanceProgress;
pub use query::OrchestrationInstanceQueries;
pub use registry::{
    BreakingChangeReport, DescriptionSynchronizer, ReadinessReport, SynchronizationOutcome,
    SynchronizationState,
};
pub use scheduler::{PlanningOutcome, RecurringPlanner};
pub use settings::EngineSettings;
