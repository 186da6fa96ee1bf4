//! Start, schedule and cancel commands.
//!
//! Every command resolves the target description first. A missing or
//! disabled description is `DescriptionNotFound`, a gated one is
//! `UnderDevelopmentNotAllowed`, and input that does not match the
//! parameter definition is `ParameterShapeMismatch`. Instances are handed
//! to the execution substrate only after they are committed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::clock::Clock;
use super::settings::EngineSettings;
use crate::adapters::ExecutionSubstrate;
use crate::domain::{
    MessageCorrelation, OperatingIdentity, OrchestrationDescription,
    OrchestrationDescriptionUniqueName, OrchestrationInstance, OrchestrationInstanceId,
    OrchestrationInstanceLifecycleState, ParameterValue,
};
use crate::error::{OrchestrationError, Result};
use crate::persistence::{OrchestrationInstanceFilter, OrchestrationRepository, UnitOfWork};

/// Command surface for creating and canceling instances
pub struct OrchestrationInstanceManager {
    repository: Arc<dyn OrchestrationRepository>,
    substrate: Arc<dyn ExecutionSubstrate>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl OrchestrationInstanceManager {
    pub fn new(
        repository: Arc<dyn OrchestrationRepository>,
        substrate: Arc<dyn ExecutionSubstrate>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            repository,
            substrate,
            clock,
            settings,
        }
    }

    /// Create an instance and queue it for immediate execution
    #[instrument(skip(self, identity, input), fields(description = %unique_name))]
    pub async fn start_new_orchestration_instance<P: Serialize + ?Sized>(
        &self,
        identity: OperatingIdentity,
        unique_name: &OrchestrationDescriptionUniqueName,
        input: &P,
        skip_steps_by_sequence: &[u32],
    ) -> Result<OrchestrationInstanceId> {
        let description = self.usable_description(unique_name).await?;
        let instance = self.new_queued_instance(identity, &description, input, skip_steps_by_sequence)?;

        let mut work = UnitOfWork::new();
        work.insert_instance(instance.clone());
        self.repository.commit(work).await?;
        info!(instance_id = %instance.id(), "Orchestration instance queued");

        self.hand_off(&description, &instance).await?;
        Ok(instance.id())
    }

    /// Start from an inbound message. A redelivered message returns the
    /// instance created by the first delivery, handing it off again while
    /// it is still `Queued` so a failed first hand-off is retried.
    #[instrument(
        skip(self, identity, input, correlation),
        fields(description = %unique_name, idempotency_key = %correlation.idempotency_key)
    )]
    pub async fn start_new_orchestration_instance_from_message<P: Serialize + ?Sized>(
        &self,
        identity: OperatingIdentity,
        unique_name: &OrchestrationDescriptionUniqueName,
        input: &P,
        skip_steps_by_sequence: &[u32],
        correlation: MessageCorrelation,
    ) -> Result<OrchestrationInstanceId> {
        if let Some(existing) = self
            .repository
            .find_instance_by_idempotency_key(&correlation.idempotency_key)
            .await?
        {
            info!(instance_id = %existing.id(), "Message already handled");
            self.resume_queued(&existing).await?;
            return Ok(existing.id());
        }

        let description = self.usable_description(unique_name).await?;
        let key = correlation.idempotency_key.clone();
        let instance = self
            .new_queued_instance(identity, &description, input, skip_steps_by_sequence)?
            .with_message_correlation(correlation);

        let mut work = UnitOfWork::new();
        work.insert_instance(instance.clone());
        match self.repository.commit(work).await {
            Ok(()) => {}
            Err(OrchestrationError::DuplicateIdempotencyKey(duplicate)) => {
                // The winning delivery hands its instance off
                warn!(idempotency_key = %duplicate, "Concurrent delivery won the insert, reading its instance");
                return match self.repository.find_instance_by_idempotency_key(&key).await? {
                    Some(existing) => Ok(existing.id()),
                    None => Err(OrchestrationError::DuplicateIdempotencyKey(duplicate)),
                };
            }
            Err(e) => return Err(e),
        }
        info!(instance_id = %instance.id(), "Orchestration instance queued from message");

        self.hand_off(&description, &instance).await?;
        Ok(instance.id())
    }

    /// Create an instance that the substrate activates at `run_at`
    #[instrument(skip(self, identity, input), fields(description = %unique_name))]
    pub async fn schedule_new_orchestration_instance<P: Serialize + ?Sized>(
        &self,
        identity: OperatingIdentity,
        unique_name: &OrchestrationDescriptionUniqueName,
        input: &P,
        run_at: DateTime<Utc>,
        skip_steps_by_sequence: &[u32],
    ) -> Result<OrchestrationInstanceId> {
        let description = self.usable_description(unique_name).await?;
        if !description.can_be_scheduled() {
            return Err(OrchestrationError::CannotBeScheduled(unique_name.clone()));
        }

        let now = self.clock.now();
        if run_at <= now {
            return Err(OrchestrationError::RunAtNotInFuture(run_at));
        }

        let parameter_value = self.parameter_value(&description, input)?;
        let mut instance = OrchestrationInstance::create_from_description(
            identity,
            &description,
            parameter_value,
            skip_steps_by_sequence,
            Some(run_at),
            now,
        )?;
        instance.lifecycle_mut().transition_to_scheduled()?;

        let mut work = UnitOfWork::new();
        work.insert_instance(instance.clone());
        self.repository.commit(work).await?;
        info!(instance_id = %instance.id(), "Orchestration instance scheduled");

        Ok(instance.id())
    }

    /// Cancel an instance that is still waiting for its `run_at`
    #[instrument(skip(self, identity))]
    pub async fn cancel_scheduled_orchestration_instance(
        &self,
        identity: OperatingIdentity,
        instance_id: OrchestrationInstanceId,
    ) -> Result<()> {
        let mut instance = self
            .repository
            .get_instance(instance_id)
            .await?
            .ok_or(OrchestrationError::InstanceNotFound(instance_id))?;

        instance
            .lifecycle_mut()
            .transition_to_user_canceled(identity, self.clock.now())?;

        let mut work = UnitOfWork::new();
        work.update_instance(instance);
        self.repository.commit(work).await?;
        info!("Scheduled orchestration instance canceled");
        Ok(())
    }

    /// Hand every scheduled instance whose `run_at` has passed to the
    /// substrate. The substrate performs `Scheduled -> Running`; an
    /// instance handed off twice is rejected there by the transition guard.
    #[instrument(skip(self))]
    pub async fn activate_due_scheduled_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrchestrationInstanceId>> {
        let filter = OrchestrationInstanceFilter {
            lifecycle_state: Some(OrchestrationInstanceLifecycleState::Scheduled),
            scheduled_at_or_earlier: Some(now),
            ..Default::default()
        };
        let due = self.repository.search_instances(&filter).await?;

        let mut activated = Vec::with_capacity(due.len());
        for instance in due {
            let Some(description) = self.repository.get_description(instance.unique_name()).await?
            else {
                warn!(instance_id = %instance.id(), description = %instance.unique_name(), "Description missing, not activating");
                continue;
            };
            self.hand_off(&description, &instance).await?;
            activated.push(instance.id());
        }

        info!(count = activated.len(), "Activated due scheduled instances");
        Ok(activated)
    }

    /// Hand a redelivered instance off again if the substrate never picked
    /// it up. Anything past `Queued` is already the substrate's.
    async fn resume_queued(&self, existing: &OrchestrationInstance) -> Result<()> {
        if existing.lifecycle().state() != OrchestrationInstanceLifecycleState::Queued {
            return Ok(());
        }
        let description = self
            .repository
            .get_description(existing.unique_name())
            .await?
            .ok_or_else(|| OrchestrationError::DescriptionNotFound(existing.unique_name().clone()))?;

        warn!(instance_id = %existing.id(), "Redelivered message found instance still queued, handing off again");
        self.hand_off(&description, existing).await
    }

    async fn usable_description(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<OrchestrationDescription> {
        let description = self
            .repository
            .get_description(unique_name)
            .await?
            .filter(|d| d.is_enabled())
            .ok_or_else(|| OrchestrationError::DescriptionNotFound(unique_name.clone()))?;

        if description.is_under_development() && !self.settings.allow_under_development {
            return Err(OrchestrationError::UnderDevelopmentNotAllowed(
                unique_name.clone(),
            ));
        }
        Ok(description)
    }

    fn parameter_value<P: Serialize + ?Sized>(
        &self,
        description: &OrchestrationDescription,
        input: &P,
    ) -> Result<ParameterValue> {
        let value = ParameterValue::from_typed(input)?;
        description
            .parameter_definition()
            .conforms(value.as_json())
            .map_err(|violations| OrchestrationError::ParameterShapeMismatch {
                unique_name: description.unique_name().clone(),
                violations,
            })?;
        Ok(value)
    }

    fn new_queued_instance<P: Serialize + ?Sized>(
        &self,
        identity: OperatingIdentity,
        description: &OrchestrationDescription,
        input: &P,
        skip_steps_by_sequence: &[u32],
    ) -> Result<OrchestrationInstance> {
        let parameter_value = self.parameter_value(description, input)?;
        let now = self.clock.now();
        let mut instance = OrchestrationInstance::create_from_description(
            identity,
            description,
            parameter_value,
            skip_steps_by_sequence,
            None,
            now,
        )?;
        instance.lifecycle_mut().transition_to_queued(now)?;
        Ok(instance)
    }

    async fn hand_off(
        &self,
        description: &OrchestrationDescription,
        instance: &OrchestrationInstance,
    ) -> Result<()> {
        self.substrate
            .start_instance(description, instance)
            .await
            .map_err(|e| {
                error!(instance_id = %instance.id(), substrate = self.substrate.name(), error = %e, "Hand-off failed");
                OrchestrationError::HandOff {
                    instance_id: instance.id(),
                    reason: format!("{:#}", e),
                }
            })
    }
}
