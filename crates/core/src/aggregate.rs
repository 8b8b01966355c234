//! Event-sourced aggregate traits.

/// Identity of an event stream.
///
/// The stream version is not part of the aggregate itself: it is owned by the
/// reducer that folds the stream, because unknown (newer) event types still
/// advance the stream head without touching typed state.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Stable stream type name (e.g. "instance.smtp_config").
    const AGGREGATE_TYPE: &'static str;

    fn id(&self) -> &Self::Id;
}

/// Stream head a writer expects to find at push time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check (migrations, tooling).
    Any,
    /// The head must be exactly this sequence; `Exact(0)` creates the stream.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, head: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(expected) => expected == head,
        }
    }
}

/// Pure decide/evolve pair.
///
/// `handle` never mutates and `apply` never fails. Anything a decision needs
/// from outside the stream (policy snapshots, already-encrypted secrets,
/// freshly generated ids) travels inside the command.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_matches_only_the_same_head() {
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(4));
        assert!(!ExpectedVersion::Exact(0).matches(1));
        assert!(ExpectedVersion::Any.matches(42));
    }
}
