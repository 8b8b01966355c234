//! Command execution pipeline (application-level orchestration).
//!
//! Every operation follows the same shape:
//!
//! ```text
//! validate input (pure, no IO)
//!   ↓
//! filter the log (instance-scoped, one read)
//!   ↓
//! reduce streams into aggregates
//!   ↓
//! handle command (pure decision logic, produces events)
//!   ↓
//! push (atomic, expected version = observed stream head)
//! ```
//!
//! The context is checked before every external call and immediately before
//! the push, so a cancelled or expired command never commits. Nothing is
//! cached between calls and nothing is retried.

mod instance;
mod smtp;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use keystone_core::{
    Aggregate, AggregateId, AggregateRoot, CommandContext, ContextError, CryptoValue,
    DomainError, ExpectedVersion, InstanceId, ObjectDetails,
};
use keystone_events::Event;
use keystone_instance::{DomainPolicy, Instance};

use crate::crypto::{EncryptionError, Encryptor};
use crate::event_store::{
    EventFilter, EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent,
};
use crate::id::{IdGenerationError, IdGenerator};
use crate::reducer::{ReduceError, Rehydrated, reduce};

/// Coarse error category, e.g. for mapping onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    PreconditionFailed,
    VersionConflict,
    Internal,
    Cancelled,
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A concurrent writer advanced a stream first. The caller may retry.
    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("command cancelled")]
    Cancelled,

    #[error("command deadline exceeded")]
    DeadlineExceeded,
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CommandError::NotFound(_) => ErrorKind::NotFound,
            CommandError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            CommandError::VersionConflict(_) => ErrorKind::VersionConflict,
            CommandError::Internal(_) => ErrorKind::Internal,
            CommandError::Cancelled => ErrorKind::Cancelled,
            CommandError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgument
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_precondition_failed(&self) -> bool {
        self.kind() == ErrorKind::PreconditionFailed
    }

    pub fn is_version_conflict(&self) -> bool {
        self.kind() == ErrorKind::VersionConflict
    }

    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}

impl From<DomainError> for CommandError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument(msg) => CommandError::InvalidArgument(msg),
            DomainError::NotFound(msg) => CommandError::NotFound(msg),
            DomainError::PreconditionFailed(msg) => CommandError::PreconditionFailed(msg),
        }
    }
}

impl From<EventStoreError> for CommandError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => CommandError::VersionConflict(msg),
            other => CommandError::Internal(other.to_string()),
        }
    }
}

impl From<ContextError> for CommandError {
    fn from(value: ContextError) -> Self {
        match value {
            ContextError::Cancelled => CommandError::Cancelled,
            ContextError::DeadlineExceeded => CommandError::DeadlineExceeded,
        }
    }
}

impl From<ReduceError> for CommandError {
    fn from(value: ReduceError) -> Self {
        CommandError::Internal(value.to_string())
    }
}

impl From<EncryptionError> for CommandError {
    fn from(value: EncryptionError) -> Self {
        CommandError::Internal(value.to_string())
    }
}

impl From<IdGenerationError> for CommandError {
    fn from(value: IdGenerationError) -> Self {
        CommandError::Internal(value.to_string())
    }
}

/// Command side of the instance configuration API.
///
/// Holds only shared collaborators; every call is an independent unit of
/// work, so one `Commands` can serve any number of concurrent callers.
#[derive(Clone)]
pub struct Commands {
    store: Arc<dyn EventStore>,
    encryptor: Arc<dyn Encryptor>,
    ids: Arc<dyn IdGenerator>,
    default_domain_policy: DomainPolicy,
}

impl Commands {
    pub fn new(
        store: Arc<dyn EventStore>,
        encryptor: Arc<dyn Encryptor>,
        ids: Arc<dyn IdGenerator>,
        default_domain_policy: DomainPolicy,
    ) -> Self {
        Self {
            store,
            encryptor,
            ids,
            default_domain_policy,
        }
    }

    /// Instance-scoped read, guarded by the context.
    async fn read(
        &self,
        ctx: &CommandContext,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, CommandError> {
        ctx.ensure_active()?;
        Ok(self.store.filter(ctx.instance_id(), filter).await?)
    }

    /// Atomic write, guarded by the context.
    async fn push(
        &self,
        ctx: &CommandContext,
        appends: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, CommandError> {
        ctx.ensure_active()?;
        let committed = self.store.push(ctx.instance_id(), appends).await?;
        if let Some(last) = committed.last() {
            debug!(
                instance_id = %ctx.instance_id(),
                aggregate_id = %last.aggregate_id,
                sequence = last.sequence,
                events = committed.len(),
                "events pushed"
            );
        }
        Ok(committed)
    }

    fn encrypt(&self, ctx: &CommandContext, plaintext: &str) -> Result<CryptoValue, CommandError> {
        ctx.ensure_active()?;
        Ok(self.encryptor.encrypt(plaintext)?)
    }

    fn next_id(&self, ctx: &CommandContext) -> Result<AggregateId, CommandError> {
        ctx.ensure_active()?;
        Ok(self.ids.next_id()?)
    }
}

/// Aggregate id of an instance's own aggregate.
fn instance_aggregate_id(instance_id: &InstanceId) -> AggregateId {
    AggregateId::new(instance_id.as_str())
}

/// Filter selecting the instance aggregate.
fn instance_filter(instance_id: &InstanceId) -> EventFilter {
    EventFilter::new().aggregate(Instance::AGGREGATE_TYPE, instance_aggregate_id(instance_id))
}

fn reduce_instance(
    instance_id: &InstanceId,
    events: &[StoredEvent],
) -> Result<Rehydrated<Instance>, CommandError> {
    let id = instance_aggregate_id(instance_id);
    Ok(reduce(instance_id, &id, events, Instance::empty(id.clone()))?)
}

/// Wrap typed events for one stream, attributing them to the acting user.
fn stream_append<A>(
    ctx: &CommandContext,
    aggregate_id: &AggregateId,
    expected_version: ExpectedVersion,
    events: &[A::Event],
) -> Result<StreamAppend, CommandError>
where
    A: Aggregate,
    A::Event: Event,
{
    let events = events
        .iter()
        .map(|e| UncommittedEvent::from_typed(Uuid::now_v7(), ctx.user_id().cloned(), e))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StreamAppend::new(
        A::AGGREGATE_TYPE,
        aggregate_id.clone(),
        expected_version,
        events,
    ))
}

/// Details of the target aggregate after a push.
///
/// `created_at` is the first event of the stream before the push; `None` when
/// the push created the stream.
fn object_details(
    ctx: &CommandContext,
    aggregate_type: &str,
    aggregate_id: &AggregateId,
    created_at: Option<DateTime<Utc>>,
    committed: &[StoredEvent],
) -> Result<ObjectDetails, CommandError> {
    let mut written = committed
        .iter()
        .filter(|e| e.is_of(aggregate_type, aggregate_id));
    let first = written.next().ok_or_else(|| {
        CommandError::Internal(format!(
            "push returned no events for {aggregate_type}/{aggregate_id}"
        ))
    })?;
    let last = written.last().unwrap_or(first);

    Ok(ObjectDetails {
        resource_owner: ctx.instance_id().clone(),
        sequence: last.sequence,
        creation_date: created_at.unwrap_or(first.created_at),
        change_date: last.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_category() {
        let cases = [
            (DomainError::invalid_argument("x"), ErrorKind::InvalidArgument),
            (DomainError::not_found("x"), ErrorKind::NotFound),
            (DomainError::precondition_failed("x"), ErrorKind::PreconditionFailed),
        ];
        for (domain, kind) in cases {
            assert_eq!(CommandError::from(domain).kind(), kind);
        }
    }

    #[test]
    fn store_errors_map_to_conflict_or_internal() {
        assert!(CommandError::from(EventStoreError::Concurrency("x".into())).is_version_conflict());
        assert!(CommandError::from(EventStoreError::Backend("x".into())).is_internal());
        assert!(CommandError::from(EventStoreError::InvalidAppend("x".into())).is_internal());
    }

    #[test]
    fn context_outcomes_are_distinct() {
        let cancelled = CommandError::from(ContextError::Cancelled);
        let expired = CommandError::from(ContextError::DeadlineExceeded);
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(expired.kind(), ErrorKind::DeadlineExceeded);
        assert!(!cancelled.is_internal() && !expired.is_version_conflict());
    }
}
