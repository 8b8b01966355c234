use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use keystone_core::{AggregateId, ExpectedVersion, InstanceId, UserId};
use keystone_events::{Event, InstanceScoped};

/// An event ready to be pushed (no sequence or position assigned yet).
///
/// The stream it belongs to is named by the enclosing [`StreamAppend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub event_version: u32,
    /// Acting user, if the command context carried one.
    pub creator: Option<UserId>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Encode a typed domain event into its stored form.
    pub fn from_typed<E: Event>(
        event_id: Uuid,
        creator: Option<UserId>,
        event: &E,
    ) -> Result<Self, EventStoreError> {
        let payload = event
            .to_payload()
            .map_err(|e| EventStoreError::InvalidAppend(e.to_string()))?;

        Ok(Self {
            event_id,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            creator,
            payload,
        })
    }
}

/// Events for one aggregate stream, guarded by the version the caller observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

impl StreamAppend {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            expected_version,
            events,
        }
    }
}

/// A committed event.
///
/// `sequence` is stream-scoped and starts at 1 without gaps. `position` is the
/// global commit order across all streams and is only used for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub instance_id: InstanceId,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub sequence: u64,
    pub position: u64,
    pub event_type: String,
    pub event_version: u32,
    pub creator: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn is_of(&self, aggregate_type: &str, aggregate_id: &AggregateId) -> bool {
        self.aggregate_type == aggregate_type && &self.aggregate_id == aggregate_id
    }
}

impl InstanceScoped for StoredEvent {
    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }
}

/// One selector of an [`EventFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSelector {
    pub aggregate_type: String,
    /// `None` selects every aggregate of the type.
    pub aggregate_id: Option<AggregateId>,
    /// Empty selects every event type.
    pub event_types: BTreeSet<String>,
}

impl EventSelector {
    pub fn matches(&self, event: &StoredEvent) -> bool {
        event.aggregate_type == self.aggregate_type
            && self
                .aggregate_id
                .as_ref()
                .is_none_or(|id| id == &event.aggregate_id)
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
    }
}

/// Read filter: the union of its selectors, always scoped to one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    selectors: Vec<EventSelector>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the full stream of one aggregate.
    pub fn aggregate(mut self, aggregate_type: impl Into<String>, aggregate_id: AggregateId) -> Self {
        self.selectors.push(EventSelector {
            aggregate_type: aggregate_type.into(),
            aggregate_id: Some(aggregate_id),
            event_types: BTreeSet::new(),
        });
        self
    }

    /// Select every stream of an aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.selectors.push(EventSelector {
            aggregate_type: aggregate_type.into(),
            aggregate_id: None,
            event_types: BTreeSet::new(),
        });
        self
    }

    /// Add an arbitrary selector.
    pub fn selector(mut self, selector: EventSelector) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn selectors(&self) -> &[EventSelector] {
        &self.selectors
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn matches(&self, event: &StoredEvent) -> bool {
        self.selectors.iter().any(|s| s.matches(event))
    }
}

/// Event store operation error.
///
/// These are infrastructure errors, as opposed to domain errors.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// An expected version did not match the stream head.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Malformed push (blank instance id, empty or duplicate stream).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// The backend failed (connection, query, row decoding).
    #[error("event store backend failure: {0}")]
    Backend(String),
}

impl EventStoreError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }
}

/// Append-only, instance-scoped event log.
///
/// ## Filter semantics
///
/// `filter()` returns the events of one instance matching any selector of the
/// filter, ordered by `position`. An empty filter selects nothing.
///
/// ## Push semantics
///
/// `push()`:
/// - checks every append's expected version against its stream head
/// - assigns sequences starting at `head + 1` and a fresh global position
/// - commits all appends or none of them
///
/// Two pushes racing on the same stream with the same expected version: one
/// commits, the other fails with [`EventStoreError::Concurrency`].
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn filter(
        &self,
        instance_id: &InstanceId,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Returns the committed events in append order.
    async fn push(
        &self,
        instance_id: &InstanceId,
        appends: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn filter(
        &self,
        instance_id: &InstanceId,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).filter(instance_id, filter).await
    }

    async fn push(
        &self,
        instance_id: &InstanceId,
        appends: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).push(instance_id, appends).await
    }
}

/// Shape checks shared by every backend: no empty appends, no stream twice.
pub(crate) fn validate_appends(appends: &[StreamAppend]) -> Result<(), EventStoreError> {
    let mut seen = BTreeSet::new();
    for (idx, append) in appends.iter().enumerate() {
        if append.events.is_empty() {
            return Err(EventStoreError::InvalidAppend(format!(
                "append {idx} for {}/{} has no events",
                append.aggregate_type, append.aggregate_id
            )));
        }
        if append.aggregate_id.is_blank() {
            return Err(EventStoreError::InvalidAppend(format!(
                "append {idx} has a blank aggregate id"
            )));
        }
        if !seen.insert((append.aggregate_type.as_str(), append.aggregate_id.as_str())) {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream {}/{} appears twice in one push",
                append.aggregate_type, append.aggregate_id
            )));
        }
    }
    Ok(())
}
