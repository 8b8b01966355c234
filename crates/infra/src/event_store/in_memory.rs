use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use keystone_core::{AggregateId, InstanceId};

use super::r#trait::{
    EventFilter, EventStore, EventStoreError, StoredEvent, StreamAppend, validate_appends,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    aggregate_type: String,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct InstanceLog {
    /// Committed events in position order.
    events: Vec<StoredEvent>,
    heads: HashMap<StreamKey, u64>,
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<InstanceId, InstanceLog>,
    next_position: u64,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance: filters scan the
/// whole instance log.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    state: RwLock<State>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed events across all instances.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .map(|s| s.instances.values().map(|log| log.events.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn filter(
        &self,
        instance_id: &InstanceId,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        Ok(state
            .instances
            .get(instance_id)
            .map(|log| {
                log.events
                    .iter()
                    .filter(|e| filter.matches(e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

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

        let mut state = self
            .state
            .write()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        // Check every stream before writing anything.
        let log = state.instances.entry(instance_id.clone()).or_default();
        let mut heads = Vec::with_capacity(appends.len());
        for append in &appends {
            let key = StreamKey {
                aggregate_type: append.aggregate_type.clone(),
                aggregate_id: append.aggregate_id.clone(),
            };
            let current = log.heads.get(&key).copied().unwrap_or(0);
            if !append.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "{}/{}: expected {:?}, found {current}",
                    append.aggregate_type, append.aggregate_id, append.expected_version
                )));
            }
            heads.push((key, current));
        }

        let created_at = Utc::now();
        let mut position = state.next_position;
        let mut committed = Vec::new();
        let log = state.instances.entry(instance_id.clone()).or_default();

        for (append, (key, current)) in appends.into_iter().zip(heads) {
            let mut sequence = current;
            for e in append.events {
                sequence += 1;
                position += 1;
                let stored = StoredEvent {
                    event_id: e.event_id,
                    instance_id: instance_id.clone(),
                    aggregate_type: append.aggregate_type.clone(),
                    aggregate_id: append.aggregate_id.clone(),
                    sequence,
                    position,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    creator: e.creator,
                    created_at,
                    payload: e.payload,
                };
                log.events.push(stored.clone());
                committed.push(stored);
            }
            log.heads.insert(key, sequence);
        }
        state.next_position = position;

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{EventSelector, UncommittedEvent};
    use keystone_core::ExpectedVersion;
    use serde_json::json;
    use uuid::Uuid;

    fn event(event_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            event_version: 1,
            creator: None,
            payload: json!({}),
        }
    }

    fn append(id: &str, expected: u64, types: &[&str]) -> StreamAppend {
        StreamAppend::new(
            "test.stream",
            AggregateId::new(id),
            ExpectedVersion::Exact(expected),
            types.iter().map(|t| event(t)).collect(),
        )
    }

    #[tokio::test]
    async fn push_assigns_gapless_sequences_and_global_positions() {
        let store = InMemoryEventStore::new();
        let instance = InstanceId::new("i1");

        let first = store
            .push(&instance, vec![append("a", 0, &["x", "y"]), append("b", 0, &["x"])])
            .await
            .unwrap();
        assert_eq!(
            first.iter().map(|e| (e.sequence, e.position)).collect::<Vec<_>>(),
            vec![(1, 1), (2, 2), (1, 3)]
        );

        let second = store.push(&instance, vec![append("a", 2, &["z"])]).await.unwrap();
        assert_eq!((second[0].sequence, second[0].position), (3, 4));
    }

    #[tokio::test]
    async fn stale_version_rejects_the_whole_push() {
        let store = InMemoryEventStore::new();
        let instance = InstanceId::new("i1");
        store.push(&instance, vec![append("a", 0, &["x"])]).await.unwrap();

        let err = store
            .push(&instance, vec![append("b", 0, &["x"]), append("a", 0, &["y"])])
            .await
            .unwrap_err();
        assert!(err.is_concurrency());

        let all = store
            .filter(&instance, &EventFilter::new().aggregate_type("test.stream"))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn filter_is_instance_scoped_and_selector_based() {
        let store = InMemoryEventStore::new();
        store
            .push(&InstanceId::new("i1"), vec![append("a", 0, &["x", "y"])])
            .await
            .unwrap();
        store
            .push(&InstanceId::new("i2"), vec![append("a", 0, &["x"])])
            .await
            .unwrap();

        let only_y = EventFilter::new().selector(EventSelector {
            aggregate_type: "test.stream".to_string(),
            aggregate_id: Some(AggregateId::new("a")),
            event_types: ["y".to_string()].into_iter().collect(),
        });
        let events = store.filter(&InstanceId::new("i1"), &only_y).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "y");

        let other = store
            .filter(&InstanceId::new("i2"), &EventFilter::new().aggregate_type("test.stream"))
            .await
            .unwrap();
        assert_eq!(other.len(), 1);
        assert!(store.filter(&InstanceId::new("i1"), &EventFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_stream_twice_in_one_push_is_invalid() {
        let store = InMemoryEventStore::new();
        let err = store
            .push(&InstanceId::new("i1"), vec![append("a", 0, &["x"]), append("a", 1, &["y"])])
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn blank_instance_id_is_an_invalid_append() {
        let store = InMemoryEventStore::new();
        let err = store
            .push(&InstanceId::new("  "), vec![append("a", 0, &["x"])])
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
        assert!(!err.is_concurrency());
        assert!(store.is_empty());
    }
}
