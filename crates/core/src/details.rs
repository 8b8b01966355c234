//! Object metadata returned to the API layer after a successful command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::InstanceId;

/// Instance-scoped metadata of the resource a command wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDetails {
    /// Owning instance.
    pub resource_owner: InstanceId,
    /// Stream sequence of the last event written for the resource.
    pub sequence: u64,
    /// Timestamp of the resource's first event.
    pub creation_date: DateTime<Utc>,
    /// Timestamp of the event just written.
    pub change_date: DateTime<Utc>,
}
