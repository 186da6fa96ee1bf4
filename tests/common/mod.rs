//! Shared harness for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use processmanager::adapters::ExecutionSubstrate;
use processmanager::core::{
    DescriptionSynchronizer, EngineSettings, FixedClock, OrchestrationInstanceManager,
    OrchestrationInstanceProgress, OrchestrationInstanceQueries, RecurringPlanner,
};
use processmanager::domain::{
    OrchestrationDescription, OrchestrationDescriptionBuilder, OrchestrationDescriptionUniqueName,
    OrchestrationInstance, OrchestrationInstanceId,
};
use processmanager::persistence::{InMemoryRepository, OrchestrationRepository};

/// Substrate that remembers what it was handed
#[derive(Default)]
pub struct RecordingSubstrate {
    started: Mutex<Vec<OrchestrationInstanceId>>,
}

impl RecordingSubstrate {
    pub fn started(&self) -> Vec<OrchestrationInstanceId> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionSubstrate for RecordingSubstrate {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start_instance(
        &self,
        _description: &OrchestrationDescription,
        instance: &OrchestrationInstance,
    ) -> Result<()> {
        self.started.lock().unwrap().push(instance.id());
        Ok(())
    }
}

/// Substrate that refuses every hand-off
pub struct FailingSubstrate;

#[async_trait]
impl ExecutionSubstrate for FailingSubstrate {
    fn name(&self) -> &str {
        "failing"
    }

    async fn start_instance(
        &self,
        _description: &OrchestrationDescription,
        _instance: &OrchestrationInstance,
    ) -> Result<()> {
        Err(anyhow!("substrate unavailable"))
    }
}

/// A builder returning a fixed description
pub struct Declared(pub OrchestrationDescription);

impl OrchestrationDescriptionBuilder for Declared {
    fn build(&self) -> OrchestrationDescription {
        self.0.clone()
    }
}

pub fn declared(description: OrchestrationDescription) -> Box<dyn OrchestrationDescriptionBuilder> {
    Box::new(Declared(description))
}

pub fn foo_v1_name() -> OrchestrationDescriptionUniqueName {
    OrchestrationDescriptionUniqueName::new("Foo", 1)
}

/// `Foo v1`: two steps, the second skippable
pub fn foo_v1() -> OrchestrationDescription {
    let mut description = OrchestrationDescription::new(foo_v1_name(), true, "Foo_V1");
    description.append_step_description("Calculate");
    description.append_skippable_step_description("Notify", "Not needed for internal runs");
    description
}

/// `Bar v1`: cannot be scheduled
pub fn bar_v1() -> OrchestrationDescription {
    let mut description = OrchestrationDescription::new(
        OrchestrationDescriptionUniqueName::new("Bar", 1),
        false,
        "Bar_V1",
    );
    description.append_step_description("Only step");
    description
}

pub fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
}

/// Every engine component over one repository
pub struct Harness {
    pub repository: Arc<dyn OrchestrationRepository>,
    pub clock: Arc<FixedClock>,
    pub substrate: Arc<RecordingSubstrate>,
    pub settings: EngineSettings,
    pub manager: OrchestrationInstanceManager,
    pub progress: OrchestrationInstanceProgress,
    pub queries: OrchestrationInstanceQueries,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Arc::new(InMemoryRepository::new()), EngineSettings::default())
    }

    pub fn with(repository: Arc<dyn OrchestrationRepository>, settings: EngineSettings) -> Self {
        let clock = Arc::new(FixedClock::new(start_of_test()));
        let substrate = Arc::new(RecordingSubstrate::default());
        Self {
            manager: OrchestrationInstanceManager::new(
                repository.clone(),
                substrate.clone(),
                clock.clone(),
                settings.clone(),
            ),
            progress: OrchestrationInstanceProgress::new(repository.clone(), clock.clone()),
            queries: OrchestrationInstanceQueries::new(repository.clone()),
            repository,
            clock,
            substrate,
            settings,
        }
    }

    pub fn synchronizer(&self) -> DescriptionSynchronizer {
        DescriptionSynchronizer::new(self.repository.clone(), self.settings.clone())
    }

    pub fn planner(&self) -> RecurringPlanner {
        RecurringPlanner::new(self.repository.clone(), self.settings.clone())
    }

    /// Synchronize `descriptions`, panicking on failure
    pub async fn declare(&self, descriptions: Vec<OrchestrationDescription>) {
        let builders: Vec<_> = descriptions.into_iter().map(declared).collect();
        self.synchronizer().synchronize(&builders).await.unwrap();
    }
}
