//! Append-only JSONL outbox consumed by the execution substrate.
//!
//! Each line is one [`HandOffRecord`]. The file is only ever appended to,
//! so the substrate can tail it and resume from its last offset.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use super::ExecutionSubstrate;
use crate::domain::{
    OrchestrationDescription, OrchestrationDescriptionUniqueName, OrchestrationInstance,
    OrchestrationInstanceId, OrchestrationInstanceLifecycleState, ParameterValue,
};

/// One instance handed over for execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandOffRecord {
    pub instance_id: OrchestrationInstanceId,
    pub unique_name: OrchestrationDescriptionUniqueName,

    /// Entry point the substrate should invoke
    pub function_name: String,

    pub lifecycle_state: OrchestrationInstanceLifecycleState,
    pub run_at: Option<DateTime<Utc>>,

    /// Steps already decided to be skipped
    pub skip_steps_by_sequence: Vec<u32>,

    pub parameter_value: ParameterValue,
    pub handed_off_at: DateTime<Utc>,
}

impl HandOffRecord {
    pub fn new(description: &OrchestrationDescription, instance: &OrchestrationInstance) -> Self {
        Self {
            instance_id: instance.id(),
            unique_name: instance.unique_name().clone(),
            function_name: description.function_name().to_string(),
            lifecycle_state: instance.lifecycle().state(),
            run_at: instance.run_at(),
            skip_steps_by_sequence: instance.skip_plan(),
            parameter_value: instance.parameter_value().clone(),
            handed_off_at: Utc::now(),
        }
    }
}

/// File-based outbox substrate using JSONL format
pub struct OutboxSubstrate {
    path: PathBuf,
}

impl OutboxSubstrate {
    /// Open an outbox file, creating its directory if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create outbox directory: {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record to the outbox
    pub async fn append(&self, record: &HandOffRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open outbox: {}", self.path.display()))?;

        let json = serde_json::to_string(record).context("Failed to serialize hand-off record")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write hand-off record")?;
        file.flush().await.context("Failed to flush outbox")?;

        Ok(())
    }

    /// Replay all records in order
    pub async fn replay(&self) -> Result<Vec<HandOffRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open outbox: {}", self.path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: HandOffRecord = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse hand-off record: {}", line))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Records handed off for one instance
    pub async fn records_for(&self, instance_id: OrchestrationInstanceId) -> Result<Vec<HandOffRecord>> {
        let records = self.replay().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.instance_id == instance_id)
            .collect())
    }
}

#[async_trait]
impl ExecutionSubstrate for OutboxSubstrate {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn start_instance(
        &self,
        description: &OrchestrationDescription,
        instance: &OrchestrationInstance,
    ) -> Result<()> {
        let record = HandOffRecord::new(description, instance);
        self.append(&record).await?;
        debug!(instance_id = %record.instance_id, outbox = %self.path.display(), "Handed off instance");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OperatingIdentity;
    use tempfile::TempDir;

    fn description() -> OrchestrationDescription {
        let mut description = OrchestrationDescription::new(
            OrchestrationDescriptionUniqueName::new("Foo", 1),
            false,
            "Foo_V1",
        );
        description.append_step_description("Calculate");
        description.append_skippable_step_description("Notify", "Internal run");
        description
    }

    #[tokio::test]
    async fn test_records_are_appended_in_order() {
        let temp = TempDir::new().unwrap();
        let outbox = OutboxSubstrate::open(temp.path().join("nested").join("outbox.jsonl"))
            .await
            .unwrap();
        let description = description();

        let first = OrchestrationInstance::create_from_description(
            OperatingIdentity::system(),
            &description,
            ParameterValue::default(),
            &[2],
            None,
            Utc::now(),
        )
        .unwrap();
        let second = OrchestrationInstance::create_from_description(
            OperatingIdentity::system(),
            &description,
            ParameterValue::default(),
            &[],
            None,
            Utc::now(),
        )
        .unwrap();

        outbox.start_instance(&description, &first).await.unwrap();
        outbox.start_instance(&description, &second).await.unwrap();

        let records = outbox.replay().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].instance_id, first.id());
        assert_eq!(records[0].skip_steps_by_sequence, vec![2]);
        assert_eq!(records[0].function_name, "Foo_V1");

        let for_second = outbox.records_for(second.id()).await.unwrap();
        assert_eq!(for_second.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_outbox_replays_empty() {
        let temp = TempDir::new().unwrap();
        let outbox = OutboxSubstrate::open(temp.path().join("outbox.jsonl"))
            .await
            .unwrap();
        assert!(outbox.replay().await.unwrap().is_empty());
    }
}
