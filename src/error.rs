//! Error taxonomy for the orchestration engine.
//!
//! Every failure a caller may want to branch on has its own variant.
//! Storage failures other than the uniqueness violations are passed
//! through unchanged.

use thiserror::Error;

use crate::domain::{OrchestrationDescriptionUniqueName, OrchestrationInstanceId};

/// Errors returned by the engine
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("orchestration description not found: {0}")]
    DescriptionNotFound(OrchestrationDescriptionUniqueName),

    #[error("orchestration description {0} is under development and cannot be used in this environment")]
    UnderDevelopmentNotAllowed(OrchestrationDescriptionUniqueName),

    #[error("input does not match the parameter definition of {unique_name}: {}", violations.join("; "))]
    ParameterShapeMismatch {
        unique_name: OrchestrationDescriptionUniqueName,
        violations: Vec<String>,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("an orchestration instance with idempotency key '{0}' already exists")]
    DuplicateIdempotencyKey(String),

    #[error("breaking changes detected: {}", reports.iter().map(|r| r.to_string()).collect::<Vec<_>>().join("; "))]
    BreakingChangeDetected {
        reports: Vec<crate::core::BreakingChangeReport>,
    },

    #[error("orchestration description {0} does not allow scheduling")]
    CannotBeScheduled(OrchestrationDescriptionUniqueName),

    #[error("run at {0} is not in the future")]
    RunAtNotInFuture(chrono::DateTime<chrono::Utc>),

    #[error("step {sequence} not found in orchestration instance {instance_id}")]
    StepNotFound {
        instance_id: OrchestrationInstanceId,
        sequence: u32,
    },

    #[error("step {0} cannot be skipped")]
    StepCannotBeSkipped(u32),

    #[error("orchestration instance not found: {0}")]
    InstanceNotFound(OrchestrationInstanceId),

    #[error("{unique_name} already has a recurring instance scheduled at {run_at}")]
    DuplicateScheduledRun {
        unique_name: OrchestrationDescriptionUniqueName,
        run_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("orchestration instance {0} was modified concurrently")]
    ConcurrencyConflict(OrchestrationInstanceId),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("invalid orchestration description {unique_name}: {reason}")]
    InvalidDescription {
        unique_name: OrchestrationDescriptionUniqueName,
        reason: String,
    },

    #[error("hand-off of orchestration instance {instance_id} to the execution substrate failed: {reason}")]
    HandOff {
        instance_id: OrchestrationInstanceId,
        reason: String,
    },

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("storage task did not complete: {0}")]
    StorageTask(#[from] tokio::task::JoinError),
}

impl OrchestrationError {
    /// A rejected lifecycle transition. Callers re-read state instead of
    /// treating this as corruption.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    /// A uniqueness constraint resolved a race in favour of another writer.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Self::DuplicateIdempotencyKey(_) | Self::DuplicateScheduledRun { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
