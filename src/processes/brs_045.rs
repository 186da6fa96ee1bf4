//! BRS-045: missing measurements log.
//!
//! Planned by the recurring planner every night at 03:00 UTC. Takes no
//! input.

use super::ProcessModule;
use crate::domain::{
    OrchestrationDescription, OrchestrationDescriptionBuilder, OrchestrationDescriptionUniqueName,
};

pub const RECURRING_CRON_EXPRESSION: &str = "0 3 * * *";

#[derive(Debug, Default, Clone, Copy)]
pub struct MissingMeasurementsLog;

impl OrchestrationDescriptionBuilder for MissingMeasurementsLog {
    fn build(&self) -> OrchestrationDescription {
        let mut description = OrchestrationDescription::new(
            Self::unique_name(),
            true,
            "Orchestration_Brs_045_MissingMeasurementsLogCalculation_V1",
        )
        .with_parameter_definition::<()>()
        .with_recurring_cron_expression(RECURRING_CRON_EXPRESSION);
        description.append_step_description("Calculate missing measurements");
        description.append_step_description("Enqueue reminders");
        description
    }
}

impl ProcessModule for MissingMeasurementsLog {
    type Input = ();

    fn unique_name() -> OrchestrationDescriptionUniqueName {
        OrchestrationDescriptionUniqueName::new("Brs_045_MissingMeasurementsLogCalculation", 1)
    }
}
