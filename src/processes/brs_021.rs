//! BRS-021: forward metered data.
//!
//! Started from inbound actor messages only. The actor message and
//! transaction ids form the idempotency key, so redelivered messages map
//! to the instance created by the first delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProcessModule;
use crate::domain::{
    ActorMessageId, IdempotencyKey, MessageCorrelation, MeteringPointId, OrchestrationDescription,
    OrchestrationDescriptionBuilder, OrchestrationDescriptionUniqueName, ParameterShape,
    ProcessInput, TransactionId,
};

/// One position of a metered data series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub position: u32,
    pub quantity: Option<f64>,
    pub quality: String,
}

/// Input of a forward metered data instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardMeteredDataInput {
    pub actor_message_id: String,
    pub transaction_id: String,
    pub metering_point_id: String,
    pub metering_point_type: String,
    pub resolution: String,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub measurements: Vec<Measurement>,
}

impl ForwardMeteredDataInput {
    pub fn message_correlation(&self) -> MessageCorrelation {
        MessageCorrelation {
            idempotency_key: IdempotencyKey::new(format!(
                "{}:{}",
                self.actor_message_id, self.transaction_id
            )),
            actor_message_id: ActorMessageId::new(self.actor_message_id.clone()),
            transaction_id: TransactionId::new(self.transaction_id.clone()),
            metering_point_id: Some(MeteringPointId::new(self.metering_point_id.clone())),
        }
    }
}

impl ProcessInput for ForwardMeteredDataInput {
    fn parameter_shape() -> ParameterShape {
        ParameterShape::object([
            ("actor_message_id", ParameterShape::String),
            ("transaction_id", ParameterShape::String),
            ("metering_point_id", ParameterShape::String),
            ("metering_point_type", ParameterShape::String),
            ("resolution", ParameterShape::String),
            ("start_date_time", ParameterShape::DateTime),
            ("end_date_time", ParameterShape::optional(ParameterShape::DateTime)),
            (
                "measurements",
                ParameterShape::array(ParameterShape::object([
                    ("position", ParameterShape::Integer),
                    ("quantity", ParameterShape::optional(ParameterShape::Number)),
                    ("quality", ParameterShape::String),
                ])),
            ),
        ])
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardMeteredData;

impl OrchestrationDescriptionBuilder for ForwardMeteredData {
    fn build(&self) -> OrchestrationDescription {
        let mut description = OrchestrationDescription::new(
            Self::unique_name(),
            false,
            "Orchestration_Brs_021_ForwardMeteredData_V1",
        )
        .with_parameter_definition::<ForwardMeteredDataInput>();
        description.append_step_description("Validate metered data");
        description.append_step_description("Store metered data");
        description.append_step_description("Enqueue actor messages");
        description
    }
}

impl ProcessModule for ForwardMeteredData {
    type Input = ForwardMeteredDataInput;

    fn unique_name() -> OrchestrationDescriptionUniqueName {
        OrchestrationDescriptionUniqueName::new("Brs_021_ForwardMeteredData", 1)
    }
}
