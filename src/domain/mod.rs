//! Domain types for the orchestration engine.
//!
//! This module contains the core data structures:
//! - Identifiers: strongly-typed ids and the description unique name
//! - Identity: who operates on an instance
//! - Lifecycle: instance and step state machines
//! - Description / Instance: the two aggregates
//! - Parameter: structural input shapes and opaque input values

pub mod description;
pub mod identifiers;
pub mod identity;
pub mod instance;
pub mod lifecycle;
pub mod parameter;

pub use description::{
    parse_cron_expression, OrchestrationDescription, OrchestrationDescriptionBuilder,
    StepDescription,
};
pub use identifiers::{
    ActorMessageId, IdempotencyKey, MeteringPointId, OrchestrationDescriptionId,
    OrchestrationDescriptionUniqueName, OrchestrationInstanceId, StepInstanceId, TransactionId,
};
pub use identity::{
    Actor, ActorIdentity, ActorNumber, ActorRole, OperatingIdentity, UserIdentity,
    DATAHUB_ACTOR_NUMBER,
};
pub use instance::{MessageCorrelation, OrchestrationInstance, StepInstance};
pub use lifecycle::{
    OrchestrationInstanceLifecycle, OrchestrationInstanceLifecycleState,
    OrchestrationInstanceTerminationState, StepInstanceLifecycle, StepInstanceLifecycleState,
    StepInstanceTerminationState,
};
pub use parameter::{ParameterShape, ParameterValue, ProcessInput};
