//! Persistence boundary.
//!
//! The engine talks to storage only through [`OrchestrationRepository`].
//! Implementations must apply a [`UnitOfWork`] atomically and enforce:
//! - unique `(name, version)` per description
//! - unique idempotency key per instance
//! - unique `(description, run_at)` per recurring occurrence
//! - optimistic concurrency on instance updates via `row_version`

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    IdempotencyKey, OrchestrationDescription, OrchestrationDescriptionUniqueName,
    OrchestrationInstance, OrchestrationInstanceId, OrchestrationInstanceLifecycleState,
    OrchestrationInstanceTerminationState,
};
use crate::error::Result;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

/// Storage operations used by the engine
#[async_trait]
pub trait OrchestrationRepository: Send + Sync {
    async fn get_description(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<Option<OrchestrationDescription>>;

    async fn list_descriptions(&self) -> Result<Vec<OrchestrationDescription>>;

    async fn get_instance(
        &self,
        id: OrchestrationInstanceId,
    ) -> Result<Option<OrchestrationInstance>>;

    async fn find_instance_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrchestrationInstance>>;

    /// Instances matching `filter`, ordered by creation time then id
    async fn search_instances(
        &self,
        filter: &OrchestrationInstanceFilter,
    ) -> Result<Vec<OrchestrationInstance>>;

    /// Apply every change or none of them
    async fn commit(&self, work: UnitOfWork) -> Result<()>;
}

/// A pending write
#[derive(Debug, Clone)]
pub enum Change<T> {
    Insert(T),
    Update(T),
}

/// Changes committed together in one transaction
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    pub descriptions: Vec<Change<OrchestrationDescription>>,
    pub instances: Vec<Change<OrchestrationInstance>>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_description(&mut self, description: OrchestrationDescription) {
        self.descriptions.push(Change::Insert(description));
    }

    pub fn update_description(&mut self, description: OrchestrationDescription) {
        self.descriptions.push(Change::Update(description));
    }

    pub fn insert_instance(&mut self, instance: OrchestrationInstance) {
        self.instances.push(Change::Insert(instance));
    }

    /// The instance's `row_version` must be the version it was read at
    pub fn update_instance(&mut self, instance: OrchestrationInstance) {
        self.instances.push(Change::Update(instance));
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty() && self.instances.is_empty()
    }
}

/// Storage-level instance filter. Every field narrows the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestrationInstanceFilter {
    pub name: Option<String>,
    pub version: Option<u32>,
    pub lifecycle_state: Option<OrchestrationInstanceLifecycleState>,
    pub termination_state: Option<OrchestrationInstanceTerminationState>,
    pub started_at_or_later: Option<DateTime<Utc>>,
    pub terminated_at_or_earlier: Option<DateTime<Utc>>,
    pub scheduled_at_or_later: Option<DateTime<Utc>>,
    pub scheduled_at_or_earlier: Option<DateTime<Utc>>,
}

impl OrchestrationInstanceFilter {
    /// All instances of one description version
    pub fn for_description(unique_name: &OrchestrationDescriptionUniqueName) -> Self {
        Self {
            name: Some(unique_name.name.clone()),
            version: Some(unique_name.version),
            ..Default::default()
        }
    }

    pub fn matches(&self, instance: &OrchestrationInstance) -> bool {
        let lifecycle = instance.lifecycle();

        if let Some(ref name) = self.name {
            if &instance.unique_name().name != name {
                return false;
            }
        }
        if let Some(version) = self.version {
            if instance.unique_name().version != version {
                return false;
            }
        }
        if let Some(state) = self.lifecycle_state {
            if lifecycle.state() != state {
                return false;
            }
        }
        if let Some(outcome) = self.termination_state {
            if lifecycle.termination_state() != Some(outcome) {
                return false;
            }
        }
        if let Some(lower) = self.started_at_or_later {
            if !lifecycle.started_at().is_some_and(|t| t >= lower) {
                return false;
            }
        }
        if let Some(upper) = self.terminated_at_or_earlier {
            if !lifecycle.terminated_at().is_some_and(|t| t <= upper) {
                return false;
            }
        }
        if let Some(lower) = self.scheduled_at_or_later {
            if !instance.run_at().is_some_and(|t| t >= lower) {
                return false;
            }
        }
        if let Some(upper) = self.scheduled_at_or_earlier {
            if !instance.run_at().is_some_and(|t| t <= upper) {
                return false;
            }
        }
        true
    }
}
