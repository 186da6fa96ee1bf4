//! Instance and step lifecycle state machines.
//!
//! Instance: `Pending -> Queued | Scheduled -> Running -> Terminated`,
//! plus `Scheduled -> Terminated(UserCanceled)` for cancellation.
//!
//! Step: `Pending -> Running -> Terminated`, plus
//! `Pending -> Terminated(Skipped)`.
//!
//! Every transition checks its source state first, so a retried call after
//! a crash is rejected with `InvalidTransition` instead of being applied
//! twice.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::OperatingIdentity;
use crate::error::{OrchestrationError, Result};

/// Coarse state of an orchestration instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationInstanceLifecycleState {
    Pending,
    Queued,
    Scheduled,
    Running,
    Terminated,
}

impl OrchestrationInstanceLifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Terminated => "terminated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "scheduled" => Some(Self::Scheduled),
            "running" => Some(Self::Running),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl fmt::Display for OrchestrationInstanceLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a terminated orchestration instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationInstanceTerminationState {
    Succeeded,
    Failed,
    UserCanceled,
}

impl OrchestrationInstanceTerminationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::UserCanceled => "user_canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "user_canceled" => Some(Self::UserCanceled),
            _ => None,
        }
    }
}

impl fmt::Display for OrchestrationInstanceTerminationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an orchestration instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationInstanceLifecycle {
    state: OrchestrationInstanceLifecycleState,
    termination_state: Option<OrchestrationInstanceTerminationState>,
    created_by: OperatingIdentity,
    canceled_by: Option<OperatingIdentity>,
    created_at: DateTime<Utc>,
    scheduled_to_run_at: Option<DateTime<Utc>>,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    terminated_at: Option<DateTime<Utc>>,
}

impl OrchestrationInstanceLifecycle {
    /// A new lifecycle in `Pending`. `run_at` decides whether the next
    /// state is `Queued` or `Scheduled`.
    pub fn new(
        created_by: OperatingIdentity,
        run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: OrchestrationInstanceLifecycleState::Pending,
            termination_state: None,
            created_by,
            canceled_by: None,
            created_at: now,
            scheduled_to_run_at: run_at,
            queued_at: None,
            started_at: None,
            terminated_at: None,
        }
    }

    pub fn state(&self) -> OrchestrationInstanceLifecycleState {
        self.state
    }

    pub fn termination_state(&self) -> Option<OrchestrationInstanceTerminationState> {
        self.termination_state
    }

    pub fn created_by(&self) -> &OperatingIdentity {
        &self.created_by
    }

    pub fn canceled_by(&self) -> Option<&OperatingIdentity> {
        self.canceled_by.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn scheduled_to_run_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_to_run_at
    }

    pub fn queued_at(&self) -> Option<DateTime<Utc>> {
        self.queued_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn terminated_at(&self) -> Option<DateTime<Utc>> {
        self.terminated_at
    }

    pub fn is_terminated(&self) -> bool {
        self.state == OrchestrationInstanceLifecycleState::Terminated
    }

    /// `Pending -> Queued`, only for instances without a `run_at`
    pub fn transition_to_queued(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != OrchestrationInstanceLifecycleState::Pending
            || self.scheduled_to_run_at.is_some()
        {
            return Err(self.invalid(OrchestrationInstanceLifecycleState::Queued.as_str()));
        }
        self.state = OrchestrationInstanceLifecycleState::Queued;
        self.queued_at = Some(now);
        Ok(())
    }

    /// `Pending -> Scheduled`, only for instances with a `run_at`
    pub fn transition_to_scheduled(&mut self) -> Result<()> {
        if self.state != OrchestrationInstanceLifecycleState::Pending
            || self.scheduled_to_run_at.is_none()
        {
            return Err(self.invalid(OrchestrationInstanceLifecycleState::Scheduled.as_str()));
        }
        self.state = OrchestrationInstanceLifecycleState::Scheduled;
        Ok(())
    }

    /// `Queued | Scheduled -> Running`
    pub fn transition_to_running(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            OrchestrationInstanceLifecycleState::Queued
            | OrchestrationInstanceLifecycleState::Scheduled => {
                self.state = OrchestrationInstanceLifecycleState::Running;
                self.started_at = Some(now);
                Ok(())
            }
            _ => Err(self.invalid(OrchestrationInstanceLifecycleState::Running.as_str())),
        }
    }

    /// `Running -> Terminated(Succeeded | Failed)`
    pub fn transition_to_terminated(
        &mut self,
        outcome: OrchestrationInstanceTerminationState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state != OrchestrationInstanceLifecycleState::Running
            || outcome == OrchestrationInstanceTerminationState::UserCanceled
        {
            return Err(self.invalid(&format!("terminated({})", outcome)));
        }
        self.state = OrchestrationInstanceLifecycleState::Terminated;
        self.termination_state = Some(outcome);
        self.terminated_at = Some(now);
        Ok(())
    }

    /// `Scheduled -> Terminated(UserCanceled)`
    pub fn transition_to_user_canceled(
        &mut self,
        canceled_by: OperatingIdentity,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state != OrchestrationInstanceLifecycleState::Scheduled {
            return Err(self.invalid("terminated(user_canceled)"));
        }
        self.state = OrchestrationInstanceLifecycleState::Terminated;
        self.termination_state = Some(OrchestrationInstanceTerminationState::UserCanceled);
        self.canceled_by = Some(canceled_by);
        self.terminated_at = Some(now);
        Ok(())
    }

    fn invalid(&self, to: &str) -> OrchestrationError {
        OrchestrationError::InvalidTransition {
            from: self.describe(),
            to: to.to_string(),
        }
    }

    fn describe(&self) -> String {
        match self.termination_state {
            Some(outcome) => format!("{}({})", self.state, outcome),
            None => self.state.to_string(),
        }
    }
}

/// Coarse state of a step instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepInstanceLifecycleState {
    Pending,
    Running,
    Terminated,
}

impl fmt::Display for StepInstanceLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// Outcome of a terminated step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepInstanceTerminationState {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for StepInstanceTerminationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed => f.write_str("failed"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// Lifecycle of a step instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInstanceLifecycle {
    state: StepInstanceLifecycleState,
    termination_state: Option<StepInstanceTerminationState>,
    started_at: Option<DateTime<Utc>>,
    terminated_at: Option<DateTime<Utc>>,
}

impl Default for StepInstanceLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl StepInstanceLifecycle {
    pub fn new() -> Self {
        Self {
            state: StepInstanceLifecycleState::Pending,
            termination_state: None,
            started_at: None,
            terminated_at: None,
        }
    }

    pub fn state(&self) -> StepInstanceLifecycleState {
        self.state
    }

    pub fn termination_state(&self) -> Option<StepInstanceTerminationState> {
        self.termination_state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn terminated_at(&self) -> Option<DateTime<Utc>> {
        self.terminated_at
    }

    pub fn is_skipped(&self) -> bool {
        self.termination_state == Some(StepInstanceTerminationState::Skipped)
    }

    /// `Pending -> Running`
    pub fn transition_to_running(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != StepInstanceLifecycleState::Pending {
            return Err(self.invalid("running".to_string()));
        }
        self.state = StepInstanceLifecycleState::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// `Running -> Terminated(any)` or `Pending -> Terminated(Skipped)`.
    /// Skippability is checked by the owning step.
    pub fn transition_to_terminated(
        &mut self,
        outcome: StepInstanceTerminationState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let allowed = match self.state {
            StepInstanceLifecycleState::Running => true,
            StepInstanceLifecycleState::Pending => {
                outcome == StepInstanceTerminationState::Skipped
            }
            StepInstanceLifecycleState::Terminated => false,
        };
        if !allowed {
            return Err(self.invalid(format!("terminated({})", outcome)));
        }
        self.state = StepInstanceLifecycleState::Terminated;
        self.termination_state = Some(outcome);
        self.terminated_at = Some(now);
        Ok(())
    }

    fn invalid(&self, to: String) -> OrchestrationError {
        let from = match self.termination_state {
            Some(outcome) => format!("{}({})", self.state, outcome),
            None => self.state.to_string(),
        };
        OrchestrationError::InvalidTransition { from, to }
    }
}
