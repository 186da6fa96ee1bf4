//! BRS-023/027: balance and wholesale calculations.
//!
//! Started on demand or scheduled ahead. Internal calculations are never
//! sent to market actors, so their enqueue step is skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProcessModule;
use crate::domain::{
    OrchestrationDescription, OrchestrationDescriptionBuilder, OrchestrationDescriptionUniqueName,
    ParameterShape, ProcessInput,
};

pub const CALCULATION_STEP: u32 = 1;
pub const ENQUEUE_ACTOR_MESSAGES_STEP: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationType {
    BalanceFixing,
    Aggregation,
    WholesaleFixing,
    FirstCorrectionSettlement,
    SecondCorrectionSettlement,
    ThirdCorrectionSettlement,
}

/// Input of a calculation instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationInput {
    pub calculation_type: CalculationType,
    pub grid_area_codes: Vec<String>,
    pub period_start_date: DateTime<Utc>,
    pub period_end_date: DateTime<Utc>,
    pub is_internal_calculation: bool,
}

impl ProcessInput for CalculationInput {
    fn parameter_shape() -> ParameterShape {
        ParameterShape::object([
            ("calculation_type", ParameterShape::String),
            ("grid_area_codes", ParameterShape::array(ParameterShape::String)),
            ("period_start_date", ParameterShape::DateTime),
            ("period_end_date", ParameterShape::DateTime),
            ("is_internal_calculation", ParameterShape::Boolean),
        ])
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Calculation;

impl OrchestrationDescriptionBuilder for Calculation {
    fn build(&self) -> OrchestrationDescription {
        let mut description =
            OrchestrationDescription::new(Self::unique_name(), true, "Orchestration_Brs_023_027_V1")
                .with_parameter_definition::<CalculationInput>();
        description.append_step_description("Calculation");
        description.append_skippable_step_description(
            "Enqueue actor messages",
            "Internal calculations are not sent to actors",
        );
        description
    }
}

impl ProcessModule for Calculation {
    type Input = CalculationInput;

    fn unique_name() -> OrchestrationDescriptionUniqueName {
        OrchestrationDescriptionUniqueName::new("Brs_023_027", 1)
    }

    fn skip_steps_by_sequence(input: &CalculationInput) -> Vec<u32> {
        if input.is_internal_calculation {
            vec![ENQUEUE_ACTOR_MESSAGES_STEP]
        } else {
            Vec::new()
        }
    }
}
