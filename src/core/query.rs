//! Read-only instance queries.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::domain::{OrchestrationInstance, OrchestrationInstanceId};
use crate::error::{OrchestrationError, Result};
use crate::persistence::{OrchestrationInstanceFilter, OrchestrationRepository};

pub struct OrchestrationInstanceQueries {
    repository: Arc<dyn OrchestrationRepository>,
}

impl OrchestrationInstanceQueries {
    pub fn new(repository: Arc<dyn OrchestrationRepository>) -> Self {
        Self { repository }
    }

    pub async fn get_by_id(&self, id: OrchestrationInstanceId) -> Result<OrchestrationInstance> {
        self.repository
            .get_instance(id)
            .await?
            .ok_or(OrchestrationError::InstanceNotFound(id))
    }

    /// Instances matching every set field of `filter`
    pub async fn search(
        &self,
        filter: &OrchestrationInstanceFilter,
    ) -> Result<Vec<OrchestrationInstance>> {
        self.repository.search_instances(filter).await
    }

    /// Like [`search`](Self::search), then keep the instances whose input,
    /// read as `P`, satisfies `predicate`. Inputs that are not a `P` are
    /// dropped.
    pub async fn search_with<P, F>(
        &self,
        filter: &OrchestrationInstanceFilter,
        predicate: F,
    ) -> Result<Vec<OrchestrationInstance>>
    where
        P: DeserializeOwned,
        F: Fn(&P) -> bool,
    {
        let instances = self.repository.search_instances(filter).await?;
        Ok(instances
            .into_iter()
            .filter(|i| {
                i.parameter_value()
                    .to_typed::<P>()
                    .map(|input| predicate(&input))
                    .unwrap_or(false)
            })
            .collect())
    }
}
