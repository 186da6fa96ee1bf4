//! SQLite-backed repository.
//!
//! Aggregates are stored as JSON documents next to the columns used for
//! filtering and uniqueness. Every unit of work runs in one transaction.
//! Statements run on tokio's blocking pool so a slow disk never stalls
//! the executor.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Transaction};

use super::{Change, OrchestrationInstanceFilter, OrchestrationRepository, UnitOfWork};
use crate::domain::{
    IdempotencyKey, OrchestrationDescription, OrchestrationDescriptionUniqueName,
    OrchestrationInstance, OrchestrationInstanceId,
};
use crate::error::{OrchestrationError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orchestration_descriptions (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    version     INTEGER NOT NULL,
    host_name   TEXT NOT NULL,
    is_enabled  INTEGER NOT NULL,
    document    TEXT NOT NULL,
    UNIQUE (name, version)
);

CREATE TABLE IF NOT EXISTS orchestration_instances (
    id                      TEXT PRIMARY KEY,
    description_id          TEXT NOT NULL REFERENCES orchestration_descriptions (id),
    name                    TEXT NOT NULL,
    version                 INTEGER NOT NULL,
    lifecycle_state         TEXT NOT NULL,
    termination_state       TEXT,
    created_at              TEXT NOT NULL,
    started_at              TEXT,
    terminated_at           TEXT,
    scheduled_to_run_at     TEXT,
    idempotency_key         TEXT,
    is_recurring_occurrence INTEGER NOT NULL,
    row_version             INTEGER NOT NULL,
    document                TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_instances_idempotency_key
    ON orchestration_instances (idempotency_key)
    WHERE idempotency_key IS NOT NULL;

CREATE UNIQUE INDEX IF NOT EXISTS ux_instances_recurring_run_at
    ON orchestration_instances (description_id, scheduled_to_run_at)
    WHERE is_recurring_occurrence = 1;

CREATE INDEX IF NOT EXISTS ix_instances_name_version
    ON orchestration_instances (name, version, lifecycle_state);
"#;

/// Fixed-width UTC text; lexical order equals time order
fn timestamp_text(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn optional_timestamp(value: Option<DateTime<Utc>>) -> Value {
    value.map(|t| Value::Text(timestamp_text(t))).unwrap_or(Value::Null)
}

/// Repository backed by a SQLite database file
pub struct SqliteRepository {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open or create the database at `path` and apply the schema
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// A private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        connection.pragma_update(None, "foreign_keys", "ON")?;
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut connection = connection
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut connection)
        })
        .await?
    }

    fn read_instances(
        connection: &Connection,
        sql: &str,
        values: Vec<Value>,
    ) -> Result<Vec<OrchestrationInstance>> {
        let mut statement = connection.prepare(sql)?;
        let documents = statement
            .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        documents
            .iter()
            .map(|d| serde_json::from_str(d).map_err(OrchestrationError::from))
            .collect()
    }

    fn apply(tx: &Transaction<'_>, work: UnitOfWork) -> Result<()> {
        for change in work.descriptions {
            match change {
                Change::Insert(description) => {
                    let document = serde_json::to_string(&description)?;
                    tx.execute(
                        "INSERT INTO orchestration_descriptions
                            (id, name, version, host_name, is_enabled, document)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            description.id().to_string(),
                            description.unique_name().name,
                            description.unique_name().version,
                            description.host_name(),
                            description.is_enabled(),
                            document,
                        ],
                    )
                    .map_err(|e| {
                        if is_constraint_violation(&e) {
                            OrchestrationError::InvalidDescription {
                                unique_name: description.unique_name().clone(),
                                reason: "already persisted".to_string(),
                            }
                        } else {
                            e.into()
                        }
                    })?;
                }
                Change::Update(description) => {
                    let document = serde_json::to_string(&description)?;
                    let updated = tx.execute(
                        "UPDATE orchestration_descriptions
                         SET host_name = ?2, is_enabled = ?3, document = ?4
                         WHERE id = ?1",
                        params![
                            description.id().to_string(),
                            description.host_name(),
                            description.is_enabled(),
                            document,
                        ],
                    )?;
                    if updated == 0 {
                        return Err(OrchestrationError::DescriptionNotFound(
                            description.unique_name().clone(),
                        ));
                    }
                }
            }
        }

        for change in work.instances {
            match change {
                Change::Insert(instance) => Self::insert_instance(tx, &instance)?,
                Change::Update(instance) => Self::update_instance(tx, instance)?,
            }
        }

        Ok(())
    }

    fn insert_instance(tx: &Transaction<'_>, instance: &OrchestrationInstance) -> Result<()> {
        let lifecycle = instance.lifecycle();
        let document = serde_json::to_string(instance)?;
        tx.execute(
            "INSERT INTO orchestration_instances
                (id, description_id, name, version, lifecycle_state, termination_state,
                 created_at, started_at, terminated_at, scheduled_to_run_at,
                 idempotency_key, is_recurring_occurrence, row_version, document)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                instance.id().to_string(),
                instance.description_id().to_string(),
                instance.unique_name().name,
                instance.unique_name().version,
                lifecycle.state().as_str(),
                lifecycle.termination_state().map(|t| t.as_str()),
                timestamp_text(lifecycle.created_at()),
                optional_timestamp(lifecycle.started_at()),
                optional_timestamp(lifecycle.terminated_at()),
                optional_timestamp(instance.run_at()),
                instance.idempotency_key().map(|k| k.as_str()),
                instance.is_recurring_occurrence(),
                instance.row_version() as i64,
                document,
            ],
        )
        .map_err(|e| map_instance_constraint(e, instance))?;
        Ok(())
    }

    fn update_instance(tx: &Transaction<'_>, mut instance: OrchestrationInstance) -> Result<()> {
        let read_version = instance.row_version();
        instance.set_row_version(read_version + 1);

        let lifecycle = instance.lifecycle();
        let document = serde_json::to_string(&instance)?;
        let updated = tx.execute(
            "UPDATE orchestration_instances
             SET lifecycle_state = ?2, termination_state = ?3, started_at = ?4,
                 terminated_at = ?5, row_version = ?6, document = ?7
             WHERE id = ?1 AND row_version = ?8",
            params![
                instance.id().to_string(),
                lifecycle.state().as_str(),
                lifecycle.termination_state().map(|t| t.as_str()),
                optional_timestamp(lifecycle.started_at()),
                optional_timestamp(lifecycle.terminated_at()),
                instance.row_version() as i64,
                document,
                read_version as i64,
            ],
        )?;

        if updated == 0 {
            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM orchestration_instances WHERE id = ?1",
                    params![instance.id().to_string()],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            return Err(if exists {
                OrchestrationError::ConcurrencyConflict(instance.id())
            } else {
                OrchestrationError::InstanceNotFound(instance.id())
            });
        }
        Ok(())
    }
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn map_instance_constraint(
    error: rusqlite::Error,
    instance: &OrchestrationInstance,
) -> OrchestrationError {
    let message = match &error {
        rusqlite::Error::SqliteFailure(e, Some(message))
            if e.code == ErrorCode::ConstraintViolation =>
        {
            message.clone()
        }
        _ => return error.into(),
    };

    if message.contains("idempotency_key") {
        if let Some(key) = instance.idempotency_key() {
            return OrchestrationError::DuplicateIdempotencyKey(key.as_str().to_string());
        }
    }
    if message.contains("scheduled_to_run_at") {
        if let Some(run_at) = instance.run_at() {
            return OrchestrationError::DuplicateScheduledRun {
                unique_name: instance.unique_name().clone(),
                run_at,
            };
        }
    }
    if message.contains("FOREIGN KEY") {
        return OrchestrationError::DescriptionNotFound(instance.unique_name().clone());
    }
    error.into()
}

#[async_trait]
impl OrchestrationRepository for SqliteRepository {
    async fn get_description(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
    ) -> Result<Option<OrchestrationDescription>> {
        let unique_name = unique_name.clone();
        self.with_connection(move |connection| {
            let document: Option<String> = connection
                .query_row(
                    "SELECT document FROM orchestration_descriptions
                     WHERE name = ?1 AND version = ?2",
                    params![unique_name.name, unique_name.version],
                    |row| row.get(0),
                )
                .optional()?;
            document
                .map(|d| serde_json::from_str(&d).map_err(OrchestrationError::from))
                .transpose()
        })
        .await
    }

    async fn list_descriptions(&self) -> Result<Vec<OrchestrationDescription>> {
        self.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT document FROM orchestration_descriptions ORDER BY name, version",
            )?;
            let documents = statement
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            documents
                .iter()
                .map(|d| serde_json::from_str(d).map_err(OrchestrationError::from))
                .collect()
        })
        .await
    }

    async fn get_instance(
        &self,
        id: OrchestrationInstanceId,
    ) -> Result<Option<OrchestrationInstance>> {
        self.with_connection(move |connection| {
            let mut found = Self::read_instances(
                connection,
                "SELECT document FROM orchestration_instances WHERE id = ?1",
                vec![Value::Text(id.to_string())],
            )?;
            Ok(found.pop())
        })
        .await
    }

    async fn find_instance_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrchestrationInstance>> {
        let key = Value::Text(key.as_str().to_string());
        self.with_connection(move |connection| {
            let mut found = Self::read_instances(
                connection,
                "SELECT document FROM orchestration_instances WHERE idempotency_key = ?1",
                vec![key],
            )?;
            Ok(found.pop())
        })
        .await
    }

    async fn search_instances(
        &self,
        filter: &OrchestrationInstanceFilter,
    ) -> Result<Vec<OrchestrationInstance>> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(ref name) = filter.name {
            conditions.push("name = ?");
            values.push(Value::Text(name.clone()));
        }
        if let Some(version) = filter.version {
            conditions.push("version = ?");
            values.push(Value::Integer(i64::from(version)));
        }
        if let Some(state) = filter.lifecycle_state {
            conditions.push("lifecycle_state = ?");
            values.push(Value::Text(state.as_str().to_string()));
        }
        if let Some(outcome) = filter.termination_state {
            conditions.push("termination_state = ?");
            values.push(Value::Text(outcome.as_str().to_string()));
        }
        if let Some(lower) = filter.started_at_or_later {
            conditions.push("started_at >= ?");
            values.push(Value::Text(timestamp_text(lower)));
        }
        if let Some(upper) = filter.terminated_at_or_earlier {
            conditions.push("terminated_at <= ?");
            values.push(Value::Text(timestamp_text(upper)));
        }
        if let Some(lower) = filter.scheduled_at_or_later {
            conditions.push("scheduled_to_run_at >= ?");
            values.push(Value::Text(timestamp_text(lower)));
        }
        if let Some(upper) = filter.scheduled_at_or_earlier {
            conditions.push("scheduled_to_run_at <= ?");
            values.push(Value::Text(timestamp_text(upper)));
        }

        let mut sql = String::from("SELECT document FROM orchestration_instances");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at, id");

        self.with_connection(move |connection| Self::read_instances(connection, &sql, values))
            .await
    }

    async fn commit(&self, work: UnitOfWork) -> Result<()> {
        self.with_connection(move |connection| {
            let tx = connection.transaction()?;
            Self::apply(&tx, work)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OperatingIdentity, ParameterValue};
    use crate::persistence::InMemoryRepository;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn description() -> OrchestrationDescription {
        let mut description = OrchestrationDescription::new(
            OrchestrationDescriptionUniqueName::new("Foo", 1),
            true,
            "Foo_V1",
        );
        description.append_step_description("Only step");
        description
    }

    fn recurring_instance(
        description: &OrchestrationDescription,
        run_at: DateTime<Utc>,
    ) -> OrchestrationInstance {
        let mut instance = OrchestrationInstance::create_from_description(
            OperatingIdentity::system(),
            description,
            ParameterValue::default(),
            &[],
            Some(run_at),
            run_at - Duration::hours(1),
        )
        .unwrap()
        .mark_recurring_occurrence();
        instance.lifecycle_mut().transition_to_scheduled().unwrap();
        instance
    }

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("processmanager.db");
        let description = description();

        {
            let repository = SqliteRepository::open(&path).unwrap();
            let mut work = UnitOfWork::new();
            work.insert_description(description.clone());
            repository.commit(work).await.unwrap();
        }

        let repository = SqliteRepository::open(&path).unwrap();
        let stored = repository
            .get_description(description.unique_name())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, description);
    }

    #[tokio::test]
    async fn test_recurring_run_at_is_unique_per_description() {
        let repository = SqliteRepository::open_in_memory().unwrap();
        let description = description();
        let run_at = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();

        let mut work = UnitOfWork::new();
        work.insert_description(description.clone());
        work.insert_instance(recurring_instance(&description, run_at));
        repository.commit(work).await.unwrap();

        let mut work = UnitOfWork::new();
        work.insert_instance(recurring_instance(&description, run_at));
        let err = repository.commit(work).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::DuplicateScheduledRun { .. }));
    }

    #[tokio::test]
    async fn test_search_filters_on_columns() {
        let repository = SqliteRepository::open_in_memory().unwrap();
        let description = description();
        let early = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();
        let late = early + Duration::days(1);

        let mut work = UnitOfWork::new();
        work.insert_description(description.clone());
        work.insert_instance(recurring_instance(&description, early));
        work.insert_instance(recurring_instance(&description, late));
        repository.commit(work).await.unwrap();

        let filter = OrchestrationInstanceFilter {
            scheduled_at_or_later: Some(early + Duration::hours(1)),
            ..OrchestrationInstanceFilter::for_description(description.unique_name())
        };
        let found = repository.search_instances(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].run_at(), Some(late));
    }

    #[tokio::test]
    async fn test_filters_agree_with_memory_below_a_microsecond() {
        let description = description();
        let started = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap() + Duration::nanoseconds(1_234);
        let mut instance = OrchestrationInstance::create_from_description(
            OperatingIdentity::system(),
            &description,
            ParameterValue::default(),
            &[],
            None,
            started,
        )
        .unwrap();
        instance.lifecycle_mut().transition_to_queued(started).unwrap();
        instance.lifecycle_mut().transition_to_running(started).unwrap();

        let memory = InMemoryRepository::new();
        let sqlite = SqliteRepository::open_in_memory().unwrap();
        let stores: [&dyn OrchestrationRepository; 2] = [&memory, &sqlite];
        for store in stores {
            let mut work = UnitOfWork::new();
            work.insert_description(description.clone());
            work.insert_instance(instance.clone());
            store.commit(work).await.unwrap();
        }

        for (lower, expected) in [
            (started, 1),
            (started + Duration::nanoseconds(500), 0),
            (started - Duration::nanoseconds(1), 1),
        ] {
            let filter = OrchestrationInstanceFilter {
                started_at_or_later: Some(lower),
                ..Default::default()
            };
            for store in stores {
                let found = store.search_instances(&filter).await.unwrap();
                assert_eq!(found.len(), expected, "started_at >= {}", lower);
            }
        }
    }

    #[tokio::test]
    async fn test_held_connection_does_not_stall_the_runtime() {
        let repository = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let connection = Arc::clone(&repository.connection);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = connection.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(300));
        });
        locked_rx.recv().unwrap();

        let read = tokio::spawn({
            let repository = Arc::clone(&repository);
            async move { repository.list_descriptions().await }
        });
        // The single runtime thread stays free while the read waits for the lock
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!read.is_finished());

        holder.join().unwrap();
        assert!(read.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_from_many_tasks() {
        let temp = TempDir::new().unwrap();
        let repository = Arc::new(SqliteRepository::open(&temp.path().join("pm.db")).unwrap());
        let description = description();
        let mut work = UnitOfWork::new();
        work.insert_description(description.clone());
        repository.commit(work).await.unwrap();

        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut tasks = Vec::new();
        for hour in 0..16 {
            let repository = Arc::clone(&repository);
            let instance = recurring_instance(&description, start + Duration::hours(hour));
            tasks.push(tokio::spawn(async move {
                let mut work = UnitOfWork::new();
                work.insert_instance(instance);
                repository.commit(work).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let all = repository
            .search_instances(&OrchestrationInstanceFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 16);
    }
}
