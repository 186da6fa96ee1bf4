//! Execution substrate interfaces.
//!
//! The engine never runs steps itself. Once an instance is committed and
//! ready to run, it is handed to an [`ExecutionSubstrate`], which drives
//! the steps and reports back through the progress surface.

pub mod outbox;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{OrchestrationDescription, OrchestrationInstance};

pub use outbox::{HandOffRecord, OutboxSubstrate};

/// Trait for the external system that executes instances
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    /// Human-readable substrate name
    fn name(&self) -> &str;

    /// Hand a committed instance over for execution
    async fn start_instance(
        &self,
        description: &OrchestrationDescription,
        instance: &OrchestrationInstance,
    ) -> Result<()>;
}
