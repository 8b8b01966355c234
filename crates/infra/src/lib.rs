//! Infrastructure layer: event log adapters, rehydration, secrets, config and
//! the command pipeline that ties them to the instance domain.

pub mod commands;
pub mod config;
pub mod crypto;
pub mod event_store;
pub mod id;
pub mod reducer;


pub use commands::{CommandError, Commands, ErrorKind};
pub use config::{ConfigError, EngineConfig};
pub use crypto::{AesGcmEncryptor, EncryptionError, Encryptor};
pub use id::{IdGenerationError, IdGenerator, UuidIdGenerator};
