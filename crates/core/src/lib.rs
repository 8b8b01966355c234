//! `keystone-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod context;
pub mod crypto;
pub mod details;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use context::{Cancellation, CommandContext, ContextError};
pub use crypto::{CryptoType, CryptoValue};
pub use details::ObjectDetails;
pub use error::DomainError;
pub use id::{AggregateId, InstanceId, UserId};
pub use value_object::ValueObject;
