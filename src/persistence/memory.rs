//! In-memory repository.
//!
//! Holds the same uniqueness and concurrency guarantees as the SQLite
//! store. A unit of work is validated into a set of staged entries over
//! the committed state, which are merged in only when every change
//! succeeded.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Change, OrchestrationInstanceFilter, OrchestrationRepository, UnitOfWork};
use crate::domain::{
    IdempotencyKey, OrchestrationDescription, OrchestrationDescriptionUniqueName,
    OrchestrationInstance, OrchestrationInstanceId,
};
use crate::error::{OrchestrationError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    descriptions: HashMap<OrchestrationDescriptionUniqueName, OrchestrationDescription>,
    instances: HashMap<OrchestrationInstanceId, OrchestrationInstance>,
}

impl MemoryState {
    /// Validate `work` against the current state, returning only the
    /// entries it changes. Nothing is written here.
    fn stage(&self, work: UnitOfWork) -> Result<Staged<'_>> {
        let mut staged = Staged {
            base: self,
            descriptions: HashMap::new(),
            instances: HashMap::new(),
        };

        for change in work.descriptions {
            match change {
                Change::Insert(description) => {
                    if staged.description(description.unique_name()).is_some() {
                        return Err(OrchestrationError::InvalidDescription {
                            unique_name: description.unique_name().clone(),
                            reason: "already persisted".to_string(),
                        });
                    }
                    staged
                        .descriptions
                        .insert(description.unique_name().clone(), description);
                }
                Change::Update(description) => {
                    let known = staged
                        .description(description.unique_name())
                        .map_or(false, |existing| existing.id() == description.id());
                    if !known {
                        return Err(OrchestrationError::DescriptionNotFound(
                            description.unique_name().clone(),
                        ));
                    }
                    staged
                        .descriptions
                        .insert(description.unique_name().clone(), description);
                }
            }
        }

        for change in work.instances {
            match change {
                Change::Insert(instance) => staged.insert_instance(instance)?,
                Change::Update(mut instance) => {
                    let stored_version = staged
                        .instance(instance.id())
                        .map(|stored| stored.row_version())
                        .ok_or(OrchestrationError::InstanceNotFound(instance.id()))?;
                    if stored_version != instance.row_version() {
                        return Err(OrchestrationError::ConcurrencyConflict(instance.id()));
                    }
                    instance.set_row_version(instance.row_version() + 1);
                    staged.instances.insert(instance.id(), instance);
                }
            }
        }

        Ok(staged)
    }
}

/// Changes of one unit of work layered over the committed state
struct Staged<'a> {
    base: &'a MemoryState,
    descriptions: HashMap<OrchestrationDescriptionUniqueName, OrchestrationDescription>,
    instances: HashMap<OrchestrationInstanceId, OrchestrationInstance>,
}

impl Staged<'_> {
    fn description(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Option<&OrchestrationDescription> {
        self.descriptions
            .get(unique_name)
            .or_else(|| self.base.descriptions.get(unique_name))
    }

    fn instance(&self, id: OrchestrationInstanceId) -> Option<&OrchestrationInstance> {
        self.instances.get(&id).or_else(|| self.base.instances.get(&id))
    }

    fn any_description(&self, predicate: impl Fn(&OrchestrationDescription) -> bool) -> bool {
        self.descriptions.values().any(&predicate)
            || self
                .base
                .descriptions
                .values()
                .filter(|d| !self.descriptions.contains_key(d.unique_name()))
                .any(&predicate)
    }

    fn any_instance(&self, predicate: impl Fn(&OrchestrationInstance) -> bool) -> bool {
        self.instances.values().any(&predicate)
            || self
                .base
                .instances
                .values()
                .filter(|i| !self.instances.contains_key(&i.id()))
                .any(&predicate)
    }

    fn insert_instance(&mut self, instance: OrchestrationInstance) -> Result<()> {
        if !self.any_description(|d| d.id() == instance.description_id()) {
            return Err(OrchestrationError::DescriptionNotFound(
                instance.unique_name().clone(),
            ));
        }

        if let Some(key) = instance.idempotency_key() {
            if self.any_instance(|i| i.idempotency_key() == Some(key)) {
                return Err(OrchestrationError::DuplicateIdempotencyKey(
                    key.as_str().to_string(),
                ));
            }
        }

        if instance.is_recurring_occurrence() {
            if let Some(run_at) = instance.run_at() {
                let taken = self.any_instance(|i| {
                    i.is_recurring_occurrence()
                        && i.description_id() == instance.description_id()
                        && i.run_at() == Some(run_at)
                });
                if taken {
                    return Err(OrchestrationError::DuplicateScheduledRun {
                        unique_name: instance.unique_name().clone(),
                        run_at,
                    });
                }
            }
        }

        self.instances.insert(instance.id(), instance);
        Ok(())
    }

    fn into_changes(
        self,
    ) -> (
        HashMap<OrchestrationDescriptionUniqueName, OrchestrationDescription>,
        HashMap<OrchestrationInstanceId, OrchestrationInstance>,
    ) {
        (self.descriptions, self.instances)
    }
}

/// Repository backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrchestrationRepository for InMemoryRepository {
    async fn get_description(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<Option<OrchestrationDescription>> {
        Ok(self.state.read().await.descriptions.get(unique_name).cloned())
    }

    async fn list_descriptions(&self) -> Result<Vec<OrchestrationDescription>> {
        let state = self.state.read().await;
        let mut descriptions: Vec<OrchestrationDescription> =
            state.descriptions.values().cloned().collect();
        descriptions.sort_by(|a, b| a.unique_name().cmp(b.unique_name()));
        Ok(descriptions)
    }

    async fn get_instance(
        &self,
        id: OrchestrationInstanceId,
    ) -> Result<Option<OrchestrationInstance>> {
        Ok(self.state.read().await.instances.get(&id).cloned())
    }

    async fn find_instance_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrchestrationInstance>> {
        let state = self.state.read().await;
        Ok(state
            .instances
            .values()
            .find(|i| i.idempotency_key() == Some(key))
            .cloned())
    }

    async fn search_instances(
        &self,
        filter: &OrchestrationInstanceFilter,
    ) -> Result<Vec<OrchestrationInstance>> {
        let state = self.state.read().await;
        let mut instances: Vec<OrchestrationInstance> = state
            .instances
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        instances.sort_by(|a, b| {
            a.lifecycle()
                .created_at()
                .cmp(&b.lifecycle().created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(instances)
    }

    /// Cost grows with the size of `work`, not with the store. The
    /// uniqueness checks still scan every stored instance.
    async fn commit(&self, work: UnitOfWork) -> Result<()> {
        let mut state = self.state.write().await;
        let (descriptions, instances) = state.stage(work)?.into_changes();
        state.descriptions.extend(descriptions);
        state.instances.extend(instances);
        Ok(())
    }
}
