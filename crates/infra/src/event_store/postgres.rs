//! Postgres-backed event store implementation.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Concurrent push on the same stream sequence |
//! | Database (check violation) | `23514` | `InvalidAppend` | Invalid data (e.g. sequence <= 0) |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! ## Optimistic Concurrency
//!
//! `push` runs in one transaction: it reads every stream head, checks the
//! expected versions and inserts. A racing transaction that commits between
//! the read and the insert trips the unique constraint on
//! `(instance_id, aggregate_type, aggregate_id, sequence)`, which rolls back
//! the whole push.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{Span, instrument};

use keystone_core::{AggregateId, InstanceId, UserId};

use super::r#trait::{
    EventFilter, EventStore, EventStoreError, StoredEvent, StreamAppend, validate_appends,
};

/// DDL for the event table. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    position        BIGSERIAL PRIMARY KEY,
    event_id        UUID        NOT NULL UNIQUE,
    instance_id     TEXT        NOT NULL,
    aggregate_type  TEXT        NOT NULL,
    aggregate_id    TEXT        NOT NULL,
    sequence        BIGINT      NOT NULL CHECK (sequence > 0),
    event_type      TEXT        NOT NULL,
    event_version   INTEGER     NOT NULL,
    creator         TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    payload         JSONB       NOT NULL,
    UNIQUE (instance_id, aggregate_type, aggregate_id, sequence)
);
CREATE INDEX IF NOT EXISTS events_instance_type_idx
    ON events (instance_id, aggregate_type, position);
"#;

/// Postgres-backed append-only event store.
///
/// Every query carries `instance_id` in its WHERE clause.
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

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

/// Current head of a stream, 0 if it does not exist.
async fn stream_head(
    tx: &mut Transaction<'_, Postgres>,
    instance_id: &InstanceId,
    aggregate_type: &str,
    aggregate_id: &AggregateId,
) -> Result<u64, EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence), 0) AS head
        FROM events
        WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
        "#,
    )
    .bind(instance_id.as_str())
    .bind(aggregate_type)
    .bind(aggregate_id.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("stream_head", e))?;

    let head: i64 = row
        .try_get("head")
        .map_err(|e| EventStoreError::Backend(format!("failed to read stream head: {e}")))?;
    Ok(head as u64)
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, filter),
        fields(instance_id = %instance_id, selectors = filter.selectors().len(), event_count = tracing::field::Empty),
        err
    )]
    async fn filter(
        &self,
        instance_id: &InstanceId,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if filter.is_empty() {
            return Ok(vec![]);
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT event_id, instance_id, aggregate_type, aggregate_id, sequence, position, \
             event_type, event_version, creator, created_at, payload \
             FROM events WHERE instance_id = ",
        );
        qb.push_bind(instance_id.as_str());
        qb.push(" AND (");
        for (idx, selector) in filter.selectors().iter().enumerate() {
            if idx > 0 {
                qb.push(" OR ");
            }
            qb.push("(aggregate_type = ");
            qb.push_bind(selector.aggregate_type.clone());
            if let Some(id) = &selector.aggregate_id {
                qb.push(" AND aggregate_id = ");
                qb.push_bind(id.as_str().to_string());
            }
            if !selector.event_types.is_empty() {
                qb.push(" AND event_type = ANY(");
                qb.push_bind(selector.event_types.iter().cloned().collect::<Vec<_>>());
                qb.push(")");
            }
            qb.push(")");
        }
        qb.push(") ORDER BY position ASC");

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("filter", e))?;

        let events = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("event_count", events.len());
        Ok(events)
    }

    #[instrument(
        skip(self, appends),
        fields(instance_id = %instance_id, streams = appends.len()),
        err
    )]
    async fn push(
        &self,
        instance_id: &InstanceId,
        appends: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if appends.is_empty() {
            return Ok(vec![]);
        }
        if instance_id.is_blank() {
            return Err(EventStoreError::InvalidAppend("blank instance id".to_string()));
        }
        validate_appends(&appends)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut committed = Vec::new();
        for append in appends {
            let current = stream_head(
                &mut tx,
                instance_id,
                &append.aggregate_type,
                &append.aggregate_id,
            )
            .await?;

            if !append.expected_version.matches(current) {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(EventStoreError::Concurrency(format!(
                    "{}/{}: expected {:?}, found {current}",
                    append.aggregate_type, append.aggregate_id, append.expected_version
                )));
            }

            let mut sequence = current;
            for event in append.events {
                sequence += 1;
                let row = sqlx::query(
                    r#"
                    INSERT INTO events (
                        event_id, instance_id, aggregate_type, aggregate_id, sequence,
                        event_type, event_version, creator, payload
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    RETURNING position, created_at
                    "#,
                )
                .bind(event.event_id)
                .bind(instance_id.as_str())
                .bind(&append.aggregate_type)
                .bind(append.aggregate_id.as_str())
                .bind(sequence as i64)
                .bind(&event.event_type)
                .bind(event.event_version as i32)
                .bind(event.creator.as_ref().map(|c| c.as_str()))
                .bind(&event.payload)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        EventStoreError::Concurrency(format!(
                            "concurrent push detected: {}/{} sequence {sequence} already exists",
                            append.aggregate_type, append.aggregate_id
                        ))
                    } else {
                        map_sqlx_error("insert_event", e)
                    }
                })?;

                let position: i64 = row
                    .try_get("position")
                    .map_err(|e| EventStoreError::Backend(format!("failed to read position: {e}")))?;
                let created_at: DateTime<Utc> = row
                    .try_get("created_at")
                    .map_err(|e| EventStoreError::Backend(format!("failed to read created_at: {e}")))?;

                committed.push(StoredEvent {
                    event_id: event.event_id,
                    instance_id: instance_id.clone(),
                    aggregate_type: append.aggregate_type.clone(),
                    aggregate_id: append.aggregate_id.clone(),
                    sequence,
                    position: position as u64,
                    event_type: event.event_type,
                    event_version: event.event_version,
                    creator: event.creator,
                    created_at,
                    payload: event.payload,
                });
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let decode = |e: sqlx::Error| EventStoreError::Backend(format!("failed to decode event row: {e}"));

    let sequence: i64 = row.try_get("sequence").map_err(decode)?;
    let position: i64 = row.try_get("position").map_err(decode)?;
    let event_version: i32 = row.try_get("event_version").map_err(decode)?;
    let instance_id: String = row.try_get("instance_id").map_err(decode)?;
    let aggregate_id: String = row.try_get("aggregate_id").map_err(decode)?;
    let creator: Option<String> = row.try_get("creator").map_err(decode)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(decode)?,
        instance_id: InstanceId::new(instance_id),
        aggregate_type: row.try_get("aggregate_type").map_err(decode)?,
        aggregate_id: AggregateId::new(aggregate_id),
        sequence: sequence as u64,
        position: position as u64,
        event_type: row.try_get("event_type").map_err(decode)?,
        event_version: event_version as u32,
        creator: creator.map(UserId::new),
        created_at: row.try_get("created_at").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
    })
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => EventStoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}
