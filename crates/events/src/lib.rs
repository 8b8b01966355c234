//! Event and command abstractions shared by domain modules and infrastructure.

pub mod command;
pub mod event;
pub mod handler;
pub mod scope;

pub use command::Command;
pub use event::{Event, EventCodecError, decode_payload, encode_payload};
pub use handler::execute;
pub use scope::InstanceScoped;
