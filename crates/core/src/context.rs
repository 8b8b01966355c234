//! Per-command execution context.
//!
//! Every command runs on behalf of exactly one instance. The context also
//! carries the acting user (recorded as event creator) and the caller's
//! cancellation/deadline, which must be honored before anything is committed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::id::{InstanceId, UserId};

/// Why a context stopped being usable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("command cancelled")]
    Cancelled,
    #[error("command deadline exceeded")]
    DeadlineExceeded,
}

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Instance-scoped context passed to every command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    instance_id: InstanceId,
    user_id: Option<UserId>,
    deadline: Option<Instant>,
    cancellation: Cancellation,
}

impl CommandContext {
    pub fn new(instance_id: impl Into<InstanceId>) -> Self {
        Self {
            instance_id: instance_id.into(),
            user_id: None,
            deadline: None,
            cancellation: Cancellation::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Fail if the caller cancelled or the deadline passed.
    pub fn ensure_active(&self) -> Result<(), ContextError> {
        if self.cancellation.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ContextError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_active() {
        let ctx = CommandContext::new("INSTANCE").with_user("editor");
        assert!(ctx.ensure_active().is_ok());
        assert_eq!(ctx.instance_id().as_str(), "INSTANCE");
        assert_eq!(ctx.user_id().map(UserId::as_str), Some("editor"));
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let cancel = Cancellation::new();
        let ctx = CommandContext::new("INSTANCE").with_cancellation(cancel.clone());
        cancel.cancel();
        assert_eq!(ctx.ensure_active(), Err(ContextError::Cancelled));
    }

    #[test]
    fn expired_deadline_is_reported() {
        let ctx = CommandContext::new("INSTANCE").with_deadline(Instant::now());
        assert_eq!(ctx.ensure_active(), Err(ContextError::DeadlineExceeded));
    }
}
