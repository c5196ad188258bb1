//! Postgres-backed event store implementation.
//!
//! Events live in a single `events` table. The unique constraint on
//! `(aggregate_id, version)` is what ultimately guarantees that two writers
//! can never both claim a version; the in-transaction version check only
//! produces a clearer error in the common case.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (check constraint violation) | `23514` | `InvalidAppend` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed, Io, Tls, ... | N/A | `Backend` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, debug, instrument};

use provisioner_core::{AggregateId, EventId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch};
use crate::config::StoreConfig;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id        UUID PRIMARY KEY,
    aggregate_id    TEXT NOT NULL,
    aggregate_type  TEXT NOT NULL,
    version         BIGINT NOT NULL CHECK (version > 0),
    event_type      TEXT NOT NULL,
    schema_version  INTEGER NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB NOT NULL,
    recorded_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (aggregate_id, version)
)
"#;

/// Postgres-backed append-only event store.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool; every append runs in its own transaction.
///
/// ## Sync bridge
///
/// [`EventStore`] is synchronous. The trait impl blocks on the ambient tokio
/// runtime, so call it from a thread that is inside the runtime context but
/// not itself driving a future (e.g. `spawn_blocking`, or a thread that has
/// entered a multi-threaded runtime). The async methods are available for
/// callers that are already async.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `events` table if it does not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Load the stream for `aggregate_id`, oldest first.
    #[instrument(skip_all, fields(aggregate_id = %aggregate_id, event_count = tracing::field::Empty), err)]
    pub async fn load_stream(&self, aggregate_id: &AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                version,
                event_type,
                schema_version,
                occurred_at,
                payload
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let events = rows.iter().map(stored_event_from_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("event_count", events.len());

        if events.is_empty() {
            return Err(EventStoreError::NotFound {
                aggregate_id: aggregate_id.clone(),
            });
        }
        Ok(events)
    }

    /// Append events with optimistic concurrency control.
    ///
    /// 1. Starts a transaction
    /// 2. Reads the stream's current version and aggregate type
    /// 3. Validates them against `expected_version` and the batch
    /// 4. Inserts the events and commits
    ///
    /// A concurrent writer that commits between steps 2 and 4 makes the insert
    /// hit the unique constraint, which is reported as `Concurrency`.
    #[instrument(
        skip_all,
        fields(
            aggregate_id = %aggregate_id,
            event_count = events.len(),
            expected_version = %expected_version
        ),
        err
    )]
    pub async fn append_events(
        &self,
        aggregate_id: &AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        let aggregate_type = validate_batch(aggregate_id, expected_version, &events)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (current, existing_type) = check_stream_version(&mut tx, aggregate_id).await?;

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency {
                aggregate_id: aggregate_id.clone(),
                expected: expected_version.value(),
                actual: current,
            });
        }

        let Some(aggregate_type) = aggregate_type else {
            return Ok(current);
        };

        if let Some(existing) = existing_type {
            if existing != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream {aggregate_id} holds '{existing}', attempted append with '{aggregate_type}'"
                )));
            }
        }

        let mut new_version = current;
        for event in events {
            let inserted = sqlx::query(
                r#"
                INSERT INTO events (
                    event_id,
                    aggregate_id,
                    aggregate_type,
                    version,
                    event_type,
                    schema_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(event.aggregate_id.as_str())
            .bind(&event.aggregate_type)
            .bind(to_db_version(event.version)?)
            .bind(&event.event_type)
            .bind(to_db_schema_version(event.schema_version)?)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                if is_unique_violation(&e) {
                    drop(tx);
                    let actual = self.current_version(aggregate_id).await.unwrap_or(event.version);
                    debug!(version = event.version, actual, "concurrent append won the version");
                    return Err(EventStoreError::Concurrency {
                        aggregate_id: aggregate_id.clone(),
                        expected: expected_version.value(),
                        actual,
                    });
                }
                return Err(map_sqlx_error("insert_event", e));
            }
            new_version = event.version;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(new_version)
    }

    /// Latest version stored for `aggregate_id` (0 when the stream is empty).
    pub async fn current_version(&self, aggregate_id: &AggregateId) -> Result<u64, EventStoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS current_version FROM events WHERE aggregate_id = $1")
            .bind(aggregate_id.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_version", e))?;
        let current: i64 = row
            .try_get("current_version")
            .map_err(|e| EventStoreError::Backend(format!("failed to read current_version: {e}")))?;
        from_db_version(current)
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        aggregate_id: &AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        runtime_handle()?.block_on(self.append_events(aggregate_id, expected_version, events))
    }

    fn load_events(&self, aggregate_id: &AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        runtime_handle()?.block_on(self.load_stream(aggregate_id))
    }
}

fn runtime_handle() -> Result<tokio::runtime::Handle, EventStoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        EventStoreError::Backend("PostgresEventStore requires a tokio runtime context".to_string())
    })
}

async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: &AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(version), 0) AS current_version,
            MIN(aggregate_type) AS aggregate_type
        FROM events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(aggregate_id.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Backend(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Backend(format!("failed to read aggregate_type: {e}")))?;

    Ok((from_db_version(current)?, aggregate_type))
}

fn stored_event_from_row(row: &PgRow) -> Result<StoredEvent, EventStoreError> {
    let column = |name: &str, e: sqlx::Error| EventStoreError::Backend(format!("failed to read {name}: {e}"));

    let event_id: uuid::Uuid = row.try_get("event_id").map_err(|e| column("event_id", e))?;
    let aggregate_id: String = row.try_get("aggregate_id").map_err(|e| column("aggregate_id", e))?;
    let version: i64 = row.try_get("version").map_err(|e| column("version", e))?;
    let schema_version: i32 = row.try_get("schema_version").map_err(|e| column("schema_version", e))?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(|e| column("occurred_at", e))?;

    Ok(StoredEvent {
        event_id: EventId::from_uuid(event_id),
        aggregate_id: AggregateId::new(aggregate_id)
            .map_err(|e| EventStoreError::CorruptStream(e.to_string()))?,
        aggregate_type: row.try_get("aggregate_type").map_err(|e| column("aggregate_type", e))?,
        version: from_db_version(version)?,
        event_type: row.try_get("event_type").map_err(|e| column("event_type", e))?,
        schema_version: u32::try_from(schema_version)
            .map_err(|_| EventStoreError::CorruptStream(format!("negative schema_version {schema_version}")))?,
        occurred_at,
        payload: row.try_get("payload").map_err(|e| column("payload", e))?,
    })
}

fn to_db_version(version: u64) -> Result<i64, EventStoreError> {
    i64::try_from(version).map_err(|_| EventStoreError::InvalidAppend(format!("version {version} out of range")))
}

fn to_db_schema_version(schema_version: u32) -> Result<i32, EventStoreError> {
    i32::try_from(schema_version)
        .map_err(|_| EventStoreError::InvalidAppend(format!("schema_version {schema_version} out of range")))
}

fn from_db_version(version: i64) -> Result<u64, EventStoreError> {
    u64::try_from(version).map_err(|_| EventStoreError::CorruptStream(format!("negative version {version}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::InvalidAppend(format!("duplicate key: {msg}")),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => EventStoreError::Backend(format!("connection pool closed in {operation}")),
        other => EventStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
