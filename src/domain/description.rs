//! Orchestration descriptions: the versioned template of a process.
//!
//! Descriptions are declared by process modules through
//! [`OrchestrationDescriptionBuilder`] and persisted by the synchronizer.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::identifiers::{OrchestrationDescriptionId, OrchestrationDescriptionUniqueName};
use super::parameter::{ParameterShape, ProcessInput};
use crate::error::{OrchestrationError, Result};

/// Implemented by every process module to declare its description
pub trait OrchestrationDescriptionBuilder: Send + Sync {
    fn build(&self) -> OrchestrationDescription;
}

/// One step of a description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescription {
    pub description: String,

    /// 1-based, contiguous within the description
    pub sequence: u32,

    pub can_be_skipped: bool,

    pub skip_reason: Option<String>,
}

/// Template for a class of orchestration instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationDescription {
    id: OrchestrationDescriptionId,
    unique_name: OrchestrationDescriptionUniqueName,

    /// Entry point in the execution substrate
    function_name: String,

    can_be_scheduled: bool,
    recurring_cron_expression: Option<String>,
    parameter_definition: ParameterShape,
    is_under_development: bool,

    /// Host that declared this description; set during synchronization
    #[serde(default)]
    host_name: String,

    is_enabled: bool,
    steps: Vec<StepDescription>,
}

impl OrchestrationDescription {
    pub fn new(
        unique_name: OrchestrationDescriptionUniqueName,
        can_be_scheduled: bool,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            id: OrchestrationDescriptionId::new(),
            unique_name,
            function_name: function_name.into(),
            can_be_scheduled,
            recurring_cron_expression: None,
            parameter_definition: ParameterShape::Null,
            is_under_development: false,
            host_name: String::new(),
            is_enabled: true,
            steps: Vec::new(),
        }
    }

    /// Declare the input type instances must conform to
    pub fn with_parameter_definition<T: ProcessInput>(mut self) -> Self {
        self.parameter_definition = T::parameter_shape();
        self
    }

    pub fn with_recurring_cron_expression(mut self, expression: impl Into<String>) -> Self {
        self.recurring_cron_expression = Some(expression.into());
        self
    }

    pub fn under_development(mut self) -> Self {
        self.is_under_development = true;
        self
    }

    /// Append a step; its sequence is the next free number
    pub fn append_step_description(&mut self, description: impl Into<String>) {
        let sequence = self.steps.len() as u32 + 1;
        self.steps.push(StepDescription {
            description: description.into(),
            sequence,
            can_be_skipped: false,
            skip_reason: None,
        });
    }

    pub fn append_skippable_step_description(
        &mut self,
        description: impl Into<String>,
        skip_reason: impl Into<String>,
    ) {
        let sequence = self.steps.len() as u32 + 1;
        self.steps.push(StepDescription {
            description: description.into(),
            sequence,
            can_be_skipped: true,
            skip_reason: Some(skip_reason.into()),
        });
    }

    pub fn id(&self) -> OrchestrationDescriptionId {
        self.id
    }

    pub fn unique_name(&self) -> &OrchestrationDescriptionUniqueName {
        &self.unique_name
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn can_be_scheduled(&self) -> bool {
        self.can_be_scheduled
    }

    pub fn recurring_cron_expression(&self) -> Option<&str> {
        self.recurring_cron_expression
            .as_deref()
            .filter(|e| !e.trim().is_empty())
    }

    pub fn parameter_definition(&self) -> &ParameterShape {
        &self.parameter_definition
    }

    pub fn is_under_development(&self) -> bool {
        self.is_under_development
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn steps(&self) -> &[StepDescription] {
        &self.steps
    }

    pub fn step(&self, sequence: u32) -> Option<&StepDescription> {
        self.steps.iter().find(|s| s.sequence == sequence)
    }

    /// Planned recurring fire times exist only for schedulable
    /// descriptions with a cron expression.
    pub fn is_recurring(&self) -> bool {
        self.can_be_scheduled && self.recurring_cron_expression().is_some()
    }

    /// Parse the recurring cron expression, if any
    pub fn recurring_schedule(&self) -> Result<Option<cron::Schedule>> {
        self.recurring_cron_expression()
            .map(parse_cron_expression)
            .transpose()
    }

    /// Check structural invariants of a declared description
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| OrchestrationError::InvalidDescription {
            unique_name: self.unique_name.clone(),
            reason,
        };

        if self.unique_name.name.trim().is_empty() {
            return Err(invalid("name cannot be empty".to_string()));
        }
        if self.unique_name.version == 0 {
            return Err(invalid("version must be positive".to_string()));
        }
        if self.function_name.trim().is_empty() {
            return Err(invalid("function name cannot be empty".to_string()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.sequence != i as u32 + 1 {
                return Err(invalid(format!(
                    "step sequences must be contiguous from 1, found {} at position {}",
                    step.sequence,
                    i + 1
                )));
            }
        }
        if self.recurring_cron_expression().is_some() && !self.can_be_scheduled {
            return Err(invalid(
                "a recurring description must allow scheduling".to_string(),
            ));
        }
        self.recurring_schedule()?;
        Ok(())
    }

    /// Properties whose change would invalidate in-flight instances
    pub fn breaking_changes(&self, persisted: &OrchestrationDescription) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.function_name != persisted.function_name {
            changed.push("FunctionName");
        }
        if self.can_be_scheduled != persisted.can_be_scheduled {
            changed.push("CanBeScheduled");
        }
        if self.parameter_definition != persisted.parameter_definition {
            changed.push("ParameterDefinition");
        }
        if self.steps != persisted.steps {
            changed.push("Steps");
        }
        changed
    }

    /// Properties that may change freely between deployments
    pub fn non_breaking_changes(&self, persisted: &OrchestrationDescription) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.recurring_cron_expression != persisted.recurring_cron_expression {
            changed.push("RecurringCronExpression");
        }
        if self.is_under_development != persisted.is_under_development {
            changed.push("IsUnderDevelopment");
        }
        if self.host_name != persisted.host_name {
            changed.push("HostName");
        }
        if self.is_enabled != persisted.is_enabled {
            changed.push("IsEnabled");
        }
        changed
    }

    /// Copy of `declared` carrying this description's storage id
    pub(crate) fn adopt(&self, declared: &OrchestrationDescription) -> OrchestrationDescription {
        OrchestrationDescription {
            id: self.id,
            ..declared.clone()
        }
    }

    pub(crate) fn set_host_name(&mut self, host_name: &str) {
        self.host_name = host_name.to_string();
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.is_enabled = enabled;
    }
}

/// Parse a cron expression. Five-field expressions get a leading seconds
/// field of `0`.
pub fn parse_cron_expression(expression: &str) -> Result<cron::Schedule> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    cron::Schedule::from_str(&normalized).map_err(|e| OrchestrationError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}
