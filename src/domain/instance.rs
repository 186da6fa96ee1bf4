//! Orchestration instances: one run of a description.
//!
//! An instance owns its step instances. Steps are created 1:1 from the
//! description at creation time and never renumbered afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::description::OrchestrationDescription;
use super::identifiers::{
    ActorMessageId, IdempotencyKey, MeteringPointId, OrchestrationDescriptionId,
    OrchestrationDescriptionUniqueName, OrchestrationInstanceId, StepInstanceId, TransactionId,
};
use super::identity::OperatingIdentity;
use super::lifecycle::{
    OrchestrationInstanceLifecycle, StepInstanceLifecycle, StepInstanceTerminationState,
};
use super::parameter::ParameterValue;
use crate::error::{OrchestrationError, Result};

/// Correlation data carried by a message-driven start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCorrelation {
    pub idempotency_key: IdempotencyKey,
    pub actor_message_id: ActorMessageId,
    pub transaction_id: TransactionId,
    pub metering_point_id: Option<MeteringPointId>,
}

/// One step of an orchestration instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInstance {
    id: StepInstanceId,
    sequence: u32,
    description: String,
    can_be_skipped: bool,
    lifecycle: StepInstanceLifecycle,
    custom_state: String,
}

impl StepInstance {
    pub fn id(&self) -> StepInstanceId {
        self.id
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn can_be_skipped(&self) -> bool {
        self.can_be_skipped
    }

    pub fn lifecycle(&self) -> &StepInstanceLifecycle {
        &self.lifecycle
    }

    pub fn custom_state(&self) -> &str {
        &self.custom_state
    }

    fn transition_to_terminated(
        &mut self,
        outcome: StepInstanceTerminationState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if outcome == StepInstanceTerminationState::Skipped && !self.can_be_skipped {
            return Err(OrchestrationError::StepCannotBeSkipped(self.sequence));
        }
        self.lifecycle.transition_to_terminated(outcome, now)
    }
}

/// One run of an orchestration description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationInstance {
    id: OrchestrationInstanceId,
    description_id: OrchestrationDescriptionId,
    unique_name: OrchestrationDescriptionUniqueName,
    lifecycle: OrchestrationInstanceLifecycle,
    parameter_value: ParameterValue,
    steps: Vec<StepInstance>,
    custom_state: String,
    idempotency_key: Option<IdempotencyKey>,
    actor_message_id: Option<ActorMessageId>,
    transaction_id: Option<TransactionId>,
    metering_point_id: Option<MeteringPointId>,

    /// Created by the recurring planner for a cron fire time
    #[serde(default)]
    is_recurring_occurrence: bool,

    /// Incremented by the repository on every committed update
    #[serde(default)]
    row_version: u64,
}

impl OrchestrationInstance {
    /// Create a `Pending` instance with one step per step description.
    /// Steps listed in `skip_steps_by_sequence` start out `Skipped`.
    pub fn create_from_description(
        created_by: OperatingIdentity,
        description: &OrchestrationDescription,
        parameter_value: ParameterValue,
        skip_steps_by_sequence: &[u32],
        run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let id = OrchestrationInstanceId::new();
        let steps = description
            .steps()
            .iter()
            .map(|step| StepInstance {
                id: StepInstanceId::new(),
                sequence: step.sequence,
                description: step.description.clone(),
                can_be_skipped: step.can_be_skipped,
                lifecycle: StepInstanceLifecycle::new(),
                custom_state: String::new(),
            })
            .collect();

        let mut instance = Self {
            id,
            description_id: description.id(),
            unique_name: description.unique_name().clone(),
            lifecycle: OrchestrationInstanceLifecycle::new(created_by, run_at, now),
            parameter_value,
            steps,
            custom_state: String::new(),
            idempotency_key: None,
            actor_message_id: None,
            transaction_id: None,
            metering_point_id: None,
            is_recurring_occurrence: false,
            row_version: 0,
        };

        for &sequence in skip_steps_by_sequence {
            if instance.step(sequence).map(|s| s.lifecycle.is_skipped()) == Some(true) {
                continue;
            }
            instance.transition_step_to_terminated(
                sequence,
                StepInstanceTerminationState::Skipped,
                now,
            )?;
        }

        Ok(instance)
    }

    pub fn with_message_correlation(mut self, correlation: MessageCorrelation) -> Self {
        self.idempotency_key = Some(correlation.idempotency_key);
        self.actor_message_id = Some(correlation.actor_message_id);
        self.transaction_id = Some(correlation.transaction_id);
        self.metering_point_id = correlation.metering_point_id;
        self
    }

    pub(crate) fn mark_recurring_occurrence(mut self) -> Self {
        self.is_recurring_occurrence = true;
        self
    }

    pub fn id(&self) -> OrchestrationInstanceId {
        self.id
    }

    pub fn description_id(&self) -> OrchestrationDescriptionId {
        self.description_id
    }

    pub fn unique_name(&self) -> &OrchestrationDescriptionUniqueName {
        &self.unique_name
    }

    pub fn lifecycle(&self) -> &OrchestrationInstanceLifecycle {
        &self.lifecycle
    }

    pub(crate) fn lifecycle_mut(&mut self) -> &mut OrchestrationInstanceLifecycle {
        &mut self.lifecycle
    }

    pub fn parameter_value(&self) -> &ParameterValue {
        &self.parameter_value
    }

    pub fn steps(&self) -> &[StepInstance] {
        &self.steps
    }

    pub fn step(&self, sequence: u32) -> Option<&StepInstance> {
        self.steps.iter().find(|s| s.sequence == sequence)
    }

    pub fn custom_state(&self) -> &str {
        &self.custom_state
    }

    pub fn set_custom_state(&mut self, custom_state: impl Into<String>) {
        self.custom_state = custom_state.into();
    }

    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        self.idempotency_key.as_ref()
    }

    pub fn actor_message_id(&self) -> Option<&ActorMessageId> {
        self.actor_message_id.as_ref()
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn metering_point_id(&self) -> Option<&MeteringPointId> {
        self.metering_point_id.as_ref()
    }

    pub fn run_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.scheduled_to_run_at()
    }

    pub fn is_recurring_occurrence(&self) -> bool {
        self.is_recurring_occurrence
    }

    pub fn row_version(&self) -> u64 {
        self.row_version
    }

    pub(crate) fn set_row_version(&mut self, row_version: u64) {
        self.row_version = row_version;
    }

    /// Sequences of the steps currently marked skipped
    pub fn skip_plan(&self) -> Vec<u32> {
        self.steps
            .iter()
            .filter(|s| s.lifecycle.is_skipped())
            .map(|s| s.sequence)
            .collect()
    }

    pub fn transition_step_to_running(&mut self, sequence: u32, now: DateTime<Utc>) -> Result<()> {
        self.step_mut(sequence)?.lifecycle.transition_to_running(now)
    }

    pub fn transition_step_to_terminated(
        &mut self,
        sequence: u32,
        outcome: StepInstanceTerminationState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.step_mut(sequence)?.transition_to_terminated(outcome, now)
    }

    pub fn set_step_custom_state(
        &mut self,
        sequence: u32,
        custom_state: impl Into<String>,
    ) -> Result<()> {
        self.step_mut(sequence)?.custom_state = custom_state.into();
        Ok(())
    }

    fn step_mut(&mut self, sequence: u32) -> Result<&mut StepInstance> {
        let instance_id = self.id;
        self.steps
            .iter_mut()
            .find(|s| s.sequence == sequence)
            .ok_or(OrchestrationError::StepNotFound {
                instance_id,
                sequence,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lifecycle::StepInstanceLifecycleState;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn description() -> OrchestrationDescription {
        let mut description = OrchestrationDescription::new(
            OrchestrationDescriptionUniqueName::new("Foo", 1),
            true,
            "Foo_V1",
        );
        description.append_step_description("Calculate");
        description.append_skippable_step_description("Notify", "Internal run");
        description.append_step_description("Publish");
        description
    }

    #[test]
    fn test_steps_mirror_description() {
        let description = description();
        let instance = OrchestrationInstance::create_from_description(
            OperatingIdentity::system(),
            &description,
            ParameterValue::default(),
            &[],
            None,
            now(),
        )
        .unwrap();

        let sequences: Vec<u32> = instance.steps().iter().map(|s| s.sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(instance.step(2).unwrap().description(), "Notify");
        assert!(instance.step(2).unwrap().can_be_skipped());
        assert_eq!(instance.description_id(), description.id());
        assert!(instance.skip_plan().is_empty());
    }

    #[test]
    fn test_skip_plan_applied_at_creation() {
        let instance = OrchestrationInstance::create_from_description(
            OperatingIdentity::system(),
            &description(),
            ParameterValue::default(),
            &[2, 2],
            None,
            now(),
        )
        .unwrap();

        assert_eq!(instance.skip_plan(), vec![2]);
        assert_eq!(
            instance.step(1).unwrap().lifecycle().state(),
            StepInstanceLifecycleState::Pending
        );
    }

    #[test]
    fn test_skipping_a_required_step_fails() {
        let result = OrchestrationInstance::create_from_description(
            OperatingIdentity::system(),
            &description(),
            ParameterValue::default(),
            &[1],
            None,
            now(),
        );
        assert!(matches!(result, Err(OrchestrationError::StepCannotBeSkipped(1))));

        let result = OrchestrationInstance::create_from_description(
            OperatingIdentity::system(),
            &description(),
            ParameterValue::default(),
            &[9],
            None,
            now(),
        );
        assert!(matches!(
            result,
            Err(OrchestrationError::StepNotFound { sequence: 9, .. })
        ));
    }

    #[test]
    fn test_correlation_and_custom_state() {
        let mut instance = OrchestrationInstance::create_from_description(
            OperatingIdentity::system(),
            &description(),
            ParameterValue::default(),
            &[],
            None,
            now(),
        )
        .unwrap()
        .with_message_correlation(MessageCorrelation {
            idempotency_key: IdempotencyKey::new("msg-1"),
            actor_message_id: ActorMessageId::new("actor-msg-1"),
            transaction_id: TransactionId::new("tx-1"),
            metering_point_id: Some(MeteringPointId::new("571313000000000001")),
        });

        instance.set_custom_state("{\"attempt\":1}");
        instance.set_step_custom_state(3, "queued-for-publish").unwrap();

        assert_eq!(instance.idempotency_key().unwrap().as_str(), "msg-1");
        assert_eq!(instance.custom_state(), "{\"attempt\":1}");
        assert_eq!(instance.step(3).unwrap().custom_state(), "queued-for-publish");
        assert!(instance.set_step_custom_state(4, "x").is_err());
    }
}
