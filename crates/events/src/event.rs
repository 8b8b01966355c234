use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Failure to translate between a typed event and its stored JSON payload.
#[derive(Debug, Error)]
pub enum EventCodecError {
    #[error("failed to encode payload of '{event_type}': {source}")]
    Encode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode payload of '{event_type}': {source}")]
    Decode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
///
/// The stored form is `(event_type, payload)`. The type string selects the
/// variant; the payload carries only that variant's data, so a reader that
/// does not know a type can skip it without touching the payload.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "instance.smtp.config.added").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// Serialize the variant's data.
    fn to_payload(&self) -> Result<JsonValue, EventCodecError>;

    /// Rebuild a typed event from its stored form.
    ///
    /// Returns `None` for event types this event family does not know.
    fn from_payload(event_type: &str, payload: &JsonValue) -> Option<Result<Self, EventCodecError>>;
}

/// Helper for `Event::to_payload` implementations.
pub fn encode_payload<T: Serialize>(event_type: &str, data: &T) -> Result<JsonValue, EventCodecError> {
    serde_json::to_value(data).map_err(|source| EventCodecError::Encode {
        event_type: event_type.to_string(),
        source,
    })
}

/// Helper for `Event::from_payload` implementations.
pub fn decode_payload<T: DeserializeOwned>(
    event_type: &str,
    payload: &JsonValue,
) -> Result<T, EventCodecError> {
    T::deserialize(payload).map_err(|source| EventCodecError::Decode {
        event_type: event_type.to_string(),
        source,
    })
}
