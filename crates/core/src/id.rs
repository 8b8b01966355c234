//! Strongly-typed identifiers used across the domain.
//!
//! Identifiers are opaque strings: instance ids come from the platform's
//! tenant directory and aggregate ids from the configured `IdGenerator`, so
//! the domain never assumes a particular format.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of an instance (multi-tenant boundary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

/// Identifier of a user (actor identity, recorded as event creator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Identifier of an aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a raw identifier. No validation happens here; use
            /// [`str::parse`] or `ensure_present` where blank ids must be rejected.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// Reject blank identifiers with an invalid-argument error.
            pub fn ensure_present(&self) -> Result<(), DomainError> {
                if self.is_blank() {
                    return Err(DomainError::invalid_argument(concat!($name, " must not be empty")));
                }
                Ok(())
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id = Self(s.trim().to_string());
                id.ensure_present()?;
                Ok(id)
            }
        }
    };
}

impl_string_newtype!(InstanceId, "InstanceId");
impl_string_newtype!(UserId, "UserId");
impl_string_newtype!(AggregateId, "AggregateId");
