/// Execute an aggregate command deterministically (no IO, no async).
///
/// Canonical in-process lifecycle:
///
/// 1. **Decide**: `aggregate.handle(command)` (pure, no mutation)
/// 2. **Evolve**: `aggregate.apply(event)` for each decided event
///
/// Useful for domain tests and for folding several commands without a log.
/// Persistence, stream versions and concurrency control belong to the
/// infrastructure dispatcher.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: keystone_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
