//! Process modules hosted by this binary.
//!
//! Each module declares one description, a typed input and the hook that
//! decides which steps to skip before an instance is created.

pub mod brs_021;
pub mod brs_023_027;
pub mod brs_045;

use serde_json::Value;

use crate::domain::{
    OrchestrationDescriptionBuilder, OrchestrationDescriptionUniqueName, ProcessInput,
};

/// A description builder with a typed input
pub trait ProcessModule: OrchestrationDescriptionBuilder + Default + 'static {
    type Input: ProcessInput;

    fn unique_name() -> OrchestrationDescriptionUniqueName;

    /// Steps to mark skipped at creation, decided from the input
    fn skip_steps_by_sequence(_input: &Self::Input) -> Vec<u32> {
        Vec::new()
    }
}

/// Builders for every description this host declares
pub fn all_builders() -> Vec<Box<dyn OrchestrationDescriptionBuilder>> {
    vec![
        Box::new(brs_021::ForwardMeteredData),
        Box::new(brs_023_027::Calculation),
        Box::new(brs_045::MissingMeasurementsLog),
    ]
}

/// Run the skip hook of the module owning `unique_name` against an untyped
/// input. Unknown descriptions and inputs of the wrong type yield no skips.
pub fn skip_steps_for(unique_name: &OrchestrationDescriptionUniqueName, input: &Value) -> Vec<u32> {
    fn hook<M: ProcessModule>(
        unique_name: &OrchestrationDescriptionUniqueName,
        input: &Value,
    ) -> Option<Vec<u32>> {
        if *unique_name != M::unique_name() {
            return None;
        }
        let typed: M::Input = serde_json::from_value(input.clone()).ok()?;
        Some(M::skip_steps_by_sequence(&typed))
    }

    hook::<brs_021::ForwardMeteredData>(unique_name, input)
        .or_else(|| hook::<brs_023_027::Calculation>(unique_name, input))
        .or_else(|| hook::<brs_045::MissingMeasurementsLog>(unique_name, input))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_builders_validate() {
        for builder in all_builders() {
            let description = builder.build();
            assert!(description.validate().is_ok(), "{}", description.unique_name());
        }
    }

    #[test]
    fn test_skip_hook_dispatch() {
        let input = json!({
            "calculation_type": "aggregation",
            "grid_area_codes": ["804"],
            "period_start_date": "2025-01-31T23:00:00Z",
            "period_end_date": "2025-02-28T23:00:00Z",
            "is_internal_calculation": true
        });
        assert_eq!(
            skip_steps_for(&brs_023_027::Calculation::unique_name(), &input),
            vec![2]
        );
        assert!(skip_steps_for(&OrchestrationDescriptionUniqueName::new("Unknown", 1), &input).is_empty());
    }
}
