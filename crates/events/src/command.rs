use keystone_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent**. They are transient (never persisted) and are
/// turned into events, which are.
///
/// Multi-tenancy is enforced at the **event level**: the instance comes from
/// the `CommandContext` and is stamped onto events during persistence, so
/// commands stay domain-focused.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> &AggregateId;
}
