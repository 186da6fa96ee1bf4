//! Description registry: start-up synchronization and readiness.
//!
//! Every host declares its descriptions through builders. The
//! synchronizer reconciles them with the persisted copies:
//! - unknown descriptions are inserted
//! - non-structural differences are updated in place
//! - structural differences are breaking changes and are refused unless
//!   explicitly allowed
//! - persisted descriptions of the host that are no longer declared are
//!   disabled
//!
//! A refused synchronization commits nothing.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::settings::EngineSettings;
use crate::domain::{
    OrchestrationDescription, OrchestrationDescriptionBuilder, OrchestrationDescriptionUniqueName,
};
use crate::error::{OrchestrationError, Result};
use crate::persistence::{OrchestrationRepository, UnitOfWork};

/// Structural differences found for one description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakingChangeReport {
    pub unique_name: OrchestrationDescriptionUniqueName,
    pub changed_properties: Vec<&'static str>,
}

impl fmt::Display for BreakingChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed [{}]",
            self.unique_name,
            self.changed_properties.join(", ")
        )
    }
}

/// What a synchronization did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SynchronizationOutcome {
    pub inserted: Vec<OrchestrationDescriptionUniqueName>,
    pub updated: Vec<OrchestrationDescriptionUniqueName>,
    pub disabled: Vec<OrchestrationDescriptionUniqueName>,
    pub unchanged: Vec<OrchestrationDescriptionUniqueName>,

    /// Breaking changes applied because the override flag was set
    pub overwritten: Vec<BreakingChangeReport>,
}

/// Reconciles declared descriptions with the repository
pub struct DescriptionSynchronizer {
    repository: Arc<dyn OrchestrationRepository>,
    settings: EngineSettings,
}

impl DescriptionSynchronizer {
    pub fn new(repository: Arc<dyn OrchestrationRepository>, settings: EngineSettings) -> Self {
        Self {
            repository,
            settings,
        }
    }

    /// Synchronize the host's declared descriptions
    #[instrument(skip(self, builders), fields(host = %self.settings.host_name, declared = builders.len()))]
    pub async fn synchronize(
        &self,
        builders: &[Box<dyn OrchestrationDescriptionBuilder>],
    ) -> Result<SynchronizationOutcome> {
        let host_name = self.settings.host_name.as_str();
        let declared = self.declare(builders)?;

        let persisted: HashMap<OrchestrationDescriptionUniqueName, OrchestrationDescription> = self
            .repository
            .list_descriptions()
            .await?
            .into_iter()
            .map(|d| (d.unique_name().clone(), d))
            .collect();

        let mut outcome = SynchronizationOutcome::default();
        let mut refused = Vec::new();
        let mut work = UnitOfWork::new();

        for description in &declared {
            let unique_name = description.unique_name().clone();
            let Some(existing) = persisted.get(&unique_name) else {
                info!(description = %unique_name, "Inserting orchestration description");
                work.insert_description(description.clone());
                outcome.inserted.push(unique_name);
                continue;
            };

            let breaking = description.breaking_changes(existing);
            if !breaking.is_empty() {
                let report = BreakingChangeReport {
                    unique_name: unique_name.clone(),
                    changed_properties: breaking,
                };
                if self.settings.allow_breaking_changes {
                    warn!(%report, "Overwriting orchestration description with breaking changes");
                    work.update_description(existing.adopt(description));
                    outcome.overwritten.push(report);
                } else {
                    error!(%report, "Breaking changes refused");
                    refused.push(report);
                }
                continue;
            }

            let changed = description.non_breaking_changes(existing);
            if changed.is_empty() {
                outcome.unchanged.push(unique_name);
            } else {
                info!(description = %unique_name, changed = ?changed, "Updating orchestration description");
                work.update_description(existing.adopt(description));
                outcome.updated.push(unique_name);
            }
        }

        let declared_names: HashSet<&OrchestrationDescriptionUniqueName> =
            declared.iter().map(|d| d.unique_name()).collect();
        for existing in persisted.values() {
            if existing.host_name() == host_name
                && existing.is_enabled()
                && !declared_names.contains(existing.unique_name())
            {
                info!(description = %existing.unique_name(), "Disabling undeclared orchestration description");
                let mut disabled = existing.clone();
                disabled.set_enabled(false);
                work.update_description(disabled);
                outcome.disabled.push(existing.unique_name().clone());
            }
        }

        if !refused.is_empty() {
            return Err(OrchestrationError::BreakingChangeDetected { reports: refused });
        }

        if !work.is_empty() {
            self.repository.commit(work).await?;
        }

        info!(
            inserted = outcome.inserted.len(),
            updated = outcome.updated.len(),
            disabled = outcome.disabled.len(),
            "Synchronization complete"
        );
        Ok(outcome)
    }

    /// Synchronize and record the result as the process readiness
    pub async fn synchronize_at_startup(
        &self,
        builders: &[Box<dyn OrchestrationDescriptionBuilder>],
        state: &SynchronizationState,
    ) -> Result<SynchronizationOutcome> {
        let result = self.synchronize(builders).await;
        if !state.record(&result) {
            warn!("Synchronization state already recorded; keeping the first result");
        }
        result
    }

    fn declare(
        &self,
        builders: &[Box<dyn OrchestrationDescriptionBuilder>],
    ) -> Result<Vec<OrchestrationDescription>> {
        let mut seen = HashSet::new();
        let mut declared = Vec::with_capacity(builders.len());

        for builder in builders {
            let mut description = builder.build();
            description.set_host_name(&self.settings.host_name);
            description.set_enabled(true);
            description.validate()?;

            if !seen.insert(description.unique_name().clone()) {
                return Err(OrchestrationError::InvalidDescription {
                    unique_name: description.unique_name().clone(),
                    reason: "declared more than once".to_string(),
                });
            }
            declared.push(description);
        }

        Ok(declared)
    }
}

/// Readiness signal derived from the start-up synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub diagnostics: Vec<String>,
}

/// Result of the start-up synchronization. Recorded once, read many times.
#[derive(Debug, Default)]
pub struct SynchronizationState {
    report: OnceLock<ReadinessReport>,
}

impl SynchronizationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a synchronization result. Returns false if one was already
    /// recorded.
    pub fn record(&self, result: &Result<SynchronizationOutcome>) -> bool {
        let report = match result {
            Ok(outcome) => ReadinessReport {
                ready: true,
                diagnostics: outcome
                    .overwritten
                    .iter()
                    .map(|r| format!("breaking change applied: {}", r))
                    .collect(),
            },
            Err(OrchestrationError::BreakingChangeDetected { reports }) => ReadinessReport {
                ready: false,
                diagnostics: reports
                    .iter()
                    .map(|r| format!("breaking change refused: {}", r))
                    .collect(),
            },
            Err(e) => ReadinessReport {
                ready: false,
                diagnostics: vec![format!("synchronization failed: {}", e)],
            },
        };
        self.report.set(report).is_ok()
    }

    pub fn readiness(&self) -> ReadinessReport {
        self.report.get().cloned().unwrap_or_else(|| ReadinessReport {
            ready: false,
            diagnostics: vec!["synchronization has not run".to_string()],
        })
    }

    pub fn is_ready(&self) -> bool {
        self.report.get().is_some_and(|r| r.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryRepository;

    struct Declared(OrchestrationDescription);

    impl OrchestrationDescriptionBuilder for Declared {
        fn build(&self) -> OrchestrationDescription {
            self.0.clone()
        }
    }

    fn foo(name: &str) -> Box<dyn OrchestrationDescriptionBuilder> {
        let mut description = OrchestrationDescription::new(
            OrchestrationDescriptionUniqueName::new(name, 1),
            false,
            format!("{}_V1", name),
        );
        description.append_step_description("Only step");
        Box::new(Declared(description))
    }

    #[tokio::test]
    async fn test_undeclared_descriptions_are_disabled() {
        let repository = Arc::new(InMemoryRepository::new());
        let synchronizer = DescriptionSynchronizer::new(repository.clone(), EngineSettings::default());

        synchronizer.synchronize(&[foo("A"), foo("B")]).await.unwrap();
        let outcome = synchronizer.synchronize(&[foo("A")]).await.unwrap();
        assert_eq!(
            outcome.disabled,
            vec![OrchestrationDescriptionUniqueName::new("B", 1)]
        );

        let b = repository
            .get_description(&OrchestrationDescriptionUniqueName::new("B", 1))
            .await
            .unwrap()
            .unwrap();
        assert!(!b.is_enabled());

        let outcome = synchronizer.synchronize(&[foo("A"), foo("B")]).await.unwrap();
        assert_eq!(
            outcome.updated,
            vec![OrchestrationDescriptionUniqueName::new("B", 1)]
        );
    }

    #[tokio::test]
    async fn test_duplicate_declaration_rejected() {
        let repository = Arc::new(InMemoryRepository::new());
        let synchronizer = DescriptionSynchronizer::new(repository, EngineSettings::default());
        let err = synchronizer.synchronize(&[foo("A"), foo("A")]).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidDescription { .. }));
    }

    #[test]
    fn test_readiness_before_and_after_recording() {
        let state = SynchronizationState::new();
        assert!(!state.is_ready());
        assert_eq!(state.readiness().diagnostics, vec!["synchronization has not run"]);

        let refused = Err(OrchestrationError::BreakingChangeDetected {
            reports: vec![BreakingChangeReport {
                unique_name: OrchestrationDescriptionUniqueName::new("Foo", 1),
                changed_properties: vec!["Steps"],
            }],
        });
        assert!(state.record(&refused));
        assert!(!state.record(&Ok(SynchronizationOutcome::default())));

        let readiness = state.readiness();
        assert!(!readiness.ready);
        assert_eq!(
            readiness.diagnostics,
            vec!["breaking change refused: Foo_v1 changed [Steps]"]
        );
    }
}
