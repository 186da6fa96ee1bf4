//! Callback surface for the execution substrate.
//!
//! Each call reads the instance, applies one transition to the copy and
//! commits it with the read `row_version`. The new state is returned only
//! after the commit succeeded. A stale copy fails with
//! `ConcurrencyConflict`; a repeated transition fails with
//! `InvalidTransition`. Both are safe to handle by re-reading.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use super::clock::Clock;
use crate::domain::{
    OrchestrationInstance, OrchestrationInstanceId, OrchestrationInstanceTerminationState,
    StepInstanceTerminationState,
};
use crate::error::{OrchestrationError, Result};
use crate::persistence::{OrchestrationRepository, UnitOfWork};

pub struct OrchestrationInstanceProgress {
    repository: Arc<dyn OrchestrationRepository>,
    clock: Arc<dyn Clock>,
}

impl OrchestrationInstanceProgress {
    pub fn new(repository: Arc<dyn OrchestrationRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// `Queued | Scheduled -> Running`
    #[instrument(skip(self))]
    pub async fn transition_to_running(
        &self,
        id: OrchestrationInstanceId,
    ) -> Result<OrchestrationInstance> {
        let result = self
            .update(id, |instance, now| {
                instance.lifecycle_mut().transition_to_running(now)
            })
            .await;
        match &result {
            Ok(_) => info!("Orchestration instance running"),
            Err(e) if e.is_invalid_transition() => warn!(error = %e, "Duplicate activation rejected"),
            Err(_) => {}
        }
        result
    }

    /// `Running -> Terminated(outcome)`
    #[instrument(skip(self))]
    pub async fn transition_to_terminated(
        &self,
        id: OrchestrationInstanceId,
        outcome: OrchestrationInstanceTerminationState,
    ) -> Result<OrchestrationInstance> {
        let instance = self
            .update(id, |instance, now| {
                instance
                    .lifecycle_mut()
                    .transition_to_terminated(outcome, now)
            })
            .await?;
        info!(%outcome, "Orchestration instance terminated");
        Ok(instance)
    }

    #[instrument(skip(self))]
    pub async fn transition_step_to_running(
        &self,
        id: OrchestrationInstanceId,
        sequence: u32,
    ) -> Result<OrchestrationInstance> {
        self.update(id, |instance, now| {
            instance.transition_step_to_running(sequence, now)
        })
        .await
    }

    /// Terminate a step. With `fail_instance` set, a failed step also
    /// terminates the instance as failed in the same commit.
    #[instrument(skip(self))]
    pub async fn transition_step_to_terminated(
        &self,
        id: OrchestrationInstanceId,
        sequence: u32,
        outcome: StepInstanceTerminationState,
        fail_instance: bool,
    ) -> Result<OrchestrationInstance> {
        self.update(id, |instance, now| {
            instance.transition_step_to_terminated(sequence, outcome, now)?;
            if fail_instance && outcome == StepInstanceTerminationState::Failed {
                instance.lifecycle_mut().transition_to_terminated(
                    OrchestrationInstanceTerminationState::Failed,
                    now,
                )?;
                warn!(sequence, "Step failure terminated the instance");
            }
            Ok(())
        })
        .await
    }

    /// Sequences of the steps decided to be skipped
    pub async fn skip_plan(&self, id: OrchestrationInstanceId) -> Result<Vec<u32>> {
        Ok(self.load(id).await?.skip_plan())
    }

    pub async fn custom_state(&self, id: OrchestrationInstanceId) -> Result<String> {
        Ok(self.load(id).await?.custom_state().to_string())
    }

    pub async fn set_custom_state(
        &self,
        id: OrchestrationInstanceId,
        custom_state: String,
    ) -> Result<OrchestrationInstance> {
        self.update(id, move |instance, _| {
            instance.set_custom_state(custom_state);
            Ok(())
        })
        .await
    }

    pub async fn set_step_custom_state(
        &self,
        id: OrchestrationInstanceId,
        sequence: u32,
        custom_state: String,
    ) -> Result<OrchestrationInstance> {
        self.update(id, move |instance, _| {
            instance.set_step_custom_state(sequence, custom_state)
        })
        .await
    }

    async fn load(&self, id: OrchestrationInstanceId) -> Result<OrchestrationInstance> {
        self.repository
            .get_instance(id)
            .await?
            .ok_or(OrchestrationError::InstanceNotFound(id))
    }

    async fn update<F>(&self, id: OrchestrationInstanceId, apply: F) -> Result<OrchestrationInstance>
    where
        F: FnOnce(&mut OrchestrationInstance, DateTime<Utc>) -> Result<()>,
    {
        let mut instance = self.load(id).await?;
        apply(&mut instance, self.clock.now())?;

        let mut work = UnitOfWork::new();
        work.update_instance(instance.clone());
        self.repository.commit(work).await?;

        instance.set_row_version(instance.row_version() + 1);
        Ok(instance)
    }
}
