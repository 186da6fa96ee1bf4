//! Recurring planner.
//!
//! Runs on an external timer. Each run computes the cron fire times of
//! every recurring description inside `[now, now + look_ahead]`, subtracts
//! the fire times already covered by an instance, and schedules the rest
//! under the system identity. Running it repeatedly over the same window
//! creates nothing new.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::settings::EngineSettings;
use crate::domain::{
    OperatingIdentity, OrchestrationDescription, OrchestrationDescriptionUniqueName,
    OrchestrationInstance, OrchestrationInstanceId, ParameterValue,
};
use crate::error::{OrchestrationError, Result};
use crate::persistence::{OrchestrationInstanceFilter, OrchestrationRepository, UnitOfWork};

/// Result of one planning run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanningOutcome {
    pub created: Vec<OrchestrationInstanceId>,

    /// Fire times that already had an instance
    pub already_planned: usize,
}

/// Creates scheduled instances for recurring descriptions
pub struct RecurringPlanner {
    repository: Arc<dyn OrchestrationRepository>,
    settings: EngineSettings,
}

impl RecurringPlanner {
    pub fn new(repository: Arc<dyn OrchestrationRepository>, settings: EngineSettings) -> Self {
        Self {
            repository,
            settings,
        }
    }

    /// Plan every recurring description for the window starting at `now`
    #[instrument(skip(self), fields(look_ahead_hours = self.settings.look_ahead_hours))]
    pub async fn plan(&self, now: DateTime<Utc>) -> Result<PlanningOutcome> {
        let window_end = now + self.settings.look_ahead();
        let mut outcome = PlanningOutcome::default();

        for description in self.repository.list_descriptions().await? {
            if !self.is_plannable(&description) {
                continue;
            }
            self.plan_description(&description, now, window_end, &mut outcome)
                .await?;
        }

        info!(
            created = outcome.created.len(),
            already_planned = outcome.already_planned,
            "Recurring planning complete"
        );
        Ok(outcome)
    }

    /// Cron fire times of `description` in `(from, until]`
    pub fn fire_times(
        description: &OrchestrationDescription,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let Some(schedule) = description.recurring_schedule()? else {
            return Ok(Vec::new());
        };
        Ok(schedule.after(&from).take_while(|t| *t <= until).collect())
    }

    fn is_plannable(&self, description: &OrchestrationDescription) -> bool {
        if !description.is_recurring() || !description.is_enabled() {
            return false;
        }
        if description.is_under_development() && !self.settings.allow_under_development {
            debug!(description = %description.unique_name(), "Skipping description under development");
            return false;
        }
        if description
            .parameter_definition()
            .conforms(ParameterValue::default().as_json())
            .is_err()
        {
            warn!(
                description = %description.unique_name(),
                "Recurring description requires input, cannot plan it"
            );
            return false;
        }
        true
    }

    async fn plan_description(
        &self,
        description: &OrchestrationDescription,
        now: DateTime<Utc>,
        window_end: DateTime<Utc>,
        outcome: &mut PlanningOutcome,
    ) -> Result<()> {
        let unique_name = description.unique_name();
        let fire_times = Self::fire_times(description, now, window_end)?;
        if fire_times.is_empty() {
            return Ok(());
        }

        let covered = self.covered_fire_times(unique_name, now, window_end).await?;

        for run_at in fire_times {
            if covered.contains(&run_at) {
                outcome.already_planned += 1;
                continue;
            }

            let mut instance = OrchestrationInstance::create_from_description(
                OperatingIdentity::system(),
                description,
                ParameterValue::default(),
                &[],
                Some(run_at),
                now,
            )?
            .mark_recurring_occurrence();
            instance.lifecycle_mut().transition_to_scheduled()?;

            let mut work = UnitOfWork::new();
            work.insert_instance(instance.clone());
            match self.repository.commit(work).await {
                Ok(()) => {
                    info!(description = %unique_name, %run_at, instance_id = %instance.id(), "Recurring instance scheduled");
                    outcome.created.push(instance.id());
                }
                Err(e @ OrchestrationError::DuplicateScheduledRun { .. }) => {
                    warn!(error = %e, "Fire time planned concurrently");
                    outcome.already_planned += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    async fn covered_fire_times(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<HashSet<DateTime<Utc>>> {
        let filter = OrchestrationInstanceFilter {
            scheduled_at_or_later: Some(from),
            scheduled_at_or_earlier: Some(until),
            ..OrchestrationInstanceFilter::for_description(unique_name)
        };
        Ok(self
            .repository
            .search_instances(&filter)
            .await?
            .iter()
            .filter_map(|i| i.run_at())
            .collect())
    }
}
