//! Rehydration: fold a stream of stored events into typed aggregate state.

use chrono::{DateTime, Utc};
use thiserror::Error;

use keystone_core::{Aggregate, AggregateId, InstanceId};
use keystone_events::{Event, EventCodecError, InstanceScoped};

use crate::event_store::StoredEvent;

/// Aggregate state plus the stream metadata commands need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rehydrated<A> {
    pub aggregate: A,
    /// Stream head. 0 means the stream does not exist.
    pub version: u64,
    /// Timestamp of the first event.
    pub created_at: Option<DateTime<Utc>>,
}

/// The log returned something a correct store never returns.
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("event {event_id} belongs to instance '{found}', expected '{expected}'")]
    ForeignInstance {
        event_id: uuid::Uuid,
        expected: InstanceId,
        found: InstanceId,
    },

    #[error("stream {aggregate_type}/{aggregate_id}: expected sequence {expected}, found {found}")]
    SequenceGap {
        aggregate_type: String,
        aggregate_id: AggregateId,
        expected: u64,
        found: u64,
    },

    #[error(transparent)]
    Codec(#[from] EventCodecError),
}

/// Fold the events of `A`'s stream `aggregate_id` into `seed`.
///
/// `events` may contain other streams of the same instance (one filter often
/// reads several aggregates); those are ignored. Event types the aggregate
/// does not know are skipped but still advance the version.
pub fn reduce<A>(
    instance_id: &InstanceId,
    aggregate_id: &AggregateId,
    events: &[StoredEvent],
    seed: A,
) -> Result<Rehydrated<A>, ReduceError>
where
    A: Aggregate,
    A::Event: Event,
{
    let mut state = Rehydrated {
        aggregate: seed,
        version: 0,
        created_at: None,
    };

    for stored in events {
        if !stored.belongs_to(instance_id) {
            return Err(ReduceError::ForeignInstance {
                event_id: stored.event_id,
                expected: instance_id.clone(),
                found: stored.instance_id.clone(),
            });
        }
        if !stored.is_of(A::AGGREGATE_TYPE, aggregate_id) {
            continue;
        }

        let expected = state.version + 1;
        if stored.sequence != expected {
            return Err(ReduceError::SequenceGap {
                aggregate_type: stored.aggregate_type.clone(),
                aggregate_id: stored.aggregate_id.clone(),
                expected,
                found: stored.sequence,
            });
        }

        if let Some(decoded) = A::Event::from_payload(&stored.event_type, &stored.payload) {
            state.aggregate.apply(&decoded?);
        }

        state.version = stored.sequence;
        state.created_at.get_or_insert(stored.created_at);
    }

    Ok(state)
}
