//! Aggregate id generation.

use thiserror::Error;
use uuid::Uuid;

use keystone_core::AggregateId;

#[derive(Debug, Error)]
#[error("id generation failed: {0}")]
pub struct IdGenerationError(pub String);

/// Source of fresh, never-reused aggregate ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<AggregateId, IdGenerationError>;
}

/// Time-ordered UUIDv7 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> Result<AggregateId, IdGenerationError> {
        Ok(AggregateId::new(Uuid::now_v7().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_uuids() {
        let generator = UuidIdGenerator;
        let a = generator.next_id().unwrap();
        let b = generator.next_id().unwrap();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }
}
