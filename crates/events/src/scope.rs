use keystone_core::InstanceId;

/// Helper trait for instance-scoped messages.
///
/// Used by readers of the log to reject records of a foreign instance even if
/// a storage backend returned them by mistake.
pub trait InstanceScoped {
    fn instance_id(&self) -> &InstanceId;

    fn belongs_to(&self, instance_id: &InstanceId) -> bool {
        self.instance_id() == instance_id
    }
}
