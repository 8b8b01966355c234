//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values: two
/// `SmtpHost`s with the same text are the same host. To "modify" one, build a
/// new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
