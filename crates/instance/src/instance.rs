//! Instance aggregate: verified instance domains and the domain policy.
//!
//! The stream id of this aggregate is the instance id itself. SMTP validation
//! reads a [`SenderDomainPolicy`] snapshot from it. Every SMTP activation also
//! appends a marker here, so concurrent activations of different
//! configurations always contend on the same stream head.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use keystone_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use keystone_events::{Command, Event, EventCodecError, decode_payload, encode_payload};

use crate::address::normalize_domain;
use crate::policy::{DomainPolicy, SenderDomainPolicy};

/// Aggregate root: Instance (domains + domain policy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    id: AggregateId,
    /// Instance domains are verified by construction; value is the `generated` flag.
    domains: BTreeMap<String, bool>,
    domain_policy: Option<DomainPolicy>,
    last_activated_smtp_config: Option<AggregateId>,
}

impl Instance {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            domains: BTreeMap::new(),
            domain_policy: None,
            last_activated_smtp_config: None,
        }
    }

    pub fn verified_domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    pub fn has_domain(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    pub fn is_generated_domain(&self, domain: &str) -> Option<bool> {
        self.domains.get(domain).copied()
    }

    pub fn domain_policy(&self) -> Option<&DomainPolicy> {
        self.domain_policy.as_ref()
    }

    /// Most recently activated SMTP configuration. It may have been
    /// deactivated or removed since.
    pub fn last_activated_smtp_config(&self) -> Option<&AggregateId> {
        self.last_activated_smtp_config.as_ref()
    }

    /// Domain policy snapshot for SMTP sender validation. `default_policy`
    /// applies while the instance has no policy of its own.
    pub fn sender_policy(&self, default_policy: &DomainPolicy) -> SenderDomainPolicy {
        let policy = self.domain_policy.as_ref().unwrap_or(default_policy);
        SenderDomainPolicy::new(
            policy.smtp_sender_address_matches_instance_domain,
            self.domains.keys().cloned(),
        )
    }
}

impl AggregateRoot for Instance {
    type Id = AggregateId;

    const AGGREGATE_TYPE: &'static str = "instance";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: AddInstanceDomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddInstanceDomain {
    pub instance_id: AggregateId,
    pub domain: String,
    pub generated: bool,
}

/// Command: RemoveInstanceDomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveInstanceDomain {
    pub instance_id: AggregateId,
    pub domain: String,
}

/// Command: AddDomainPolicy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddDomainPolicy {
    pub instance_id: AggregateId,
    pub policy: DomainPolicy,
}

/// Command: ChangeDomainPolicy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDomainPolicy {
    pub instance_id: AggregateId,
    pub policy: DomainPolicy,
}

/// Command: RecordSmtpActivation. Issued alongside every SMTP activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSmtpActivation {
    pub instance_id: AggregateId,
    pub smtp_config_id: AggregateId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceCommand {
    AddDomain(AddInstanceDomain),
    RemoveDomain(RemoveInstanceDomain),
    AddDomainPolicy(AddDomainPolicy),
    ChangeDomainPolicy(ChangeDomainPolicy),
    RecordSmtpActivation(RecordSmtpActivation),
}

impl Command for InstanceCommand {
    fn target_aggregate_id(&self) -> &AggregateId {
        match self {
            InstanceCommand::AddDomain(c) => &c.instance_id,
            InstanceCommand::RemoveDomain(c) => &c.instance_id,
            InstanceCommand::AddDomainPolicy(c) => &c.instance_id,
            InstanceCommand::ChangeDomainPolicy(c) => &c.instance_id,
            InstanceCommand::RecordSmtpActivation(c) => &c.instance_id,
        }
    }
}

/// Event: DomainAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAdded {
    pub domain: String,
    #[serde(default)]
    pub generated: bool,
}

/// Event: DomainRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRemoved {
    pub domain: String,
}

/// Event: DomainPolicyAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicyAdded {
    #[serde(flatten)]
    pub policy: DomainPolicy,
}

/// Event: DomainPolicyChanged (only changed flags are present).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicyChanged {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_login_must_be_domain: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_org_domains: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_sender_address_matches_instance_domain: Option<bool>,
}

impl DomainPolicyChanged {
    fn between(current: &DomainPolicy, desired: &DomainPolicy) -> Self {
        fn changed(old: bool, new: bool) -> Option<bool> {
            (old != new).then_some(new)
        }
        Self {
            user_login_must_be_domain: changed(
                current.user_login_must_be_domain,
                desired.user_login_must_be_domain,
            ),
            validate_org_domains: changed(current.validate_org_domains, desired.validate_org_domains),
            smtp_sender_address_matches_instance_domain: changed(
                current.smtp_sender_address_matches_instance_domain,
                desired.smtp_sender_address_matches_instance_domain,
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Event: SmtpActivationRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpActivationRecorded {
    pub smtp_config_id: AggregateId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
    DomainAdded(DomainAdded),
    DomainRemoved(DomainRemoved),
    DomainPolicyAdded(DomainPolicyAdded),
    DomainPolicyChanged(DomainPolicyChanged),
    SmtpActivationRecorded(SmtpActivationRecorded),
}

impl InstanceEvent {
    pub const DOMAIN_ADDED: &'static str = "instance.domain.added";
    pub const DOMAIN_REMOVED: &'static str = "instance.domain.removed";
    pub const DOMAIN_POLICY_ADDED: &'static str = "instance.policy.domain.added";
    pub const DOMAIN_POLICY_CHANGED: &'static str = "instance.policy.domain.changed";
    pub const SMTP_ACTIVATION_RECORDED: &'static str = "instance.smtp.config.activation.recorded";
}

impl Event for InstanceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InstanceEvent::DomainAdded(_) => Self::DOMAIN_ADDED,
            InstanceEvent::DomainRemoved(_) => Self::DOMAIN_REMOVED,
            InstanceEvent::DomainPolicyAdded(_) => Self::DOMAIN_POLICY_ADDED,
            InstanceEvent::DomainPolicyChanged(_) => Self::DOMAIN_POLICY_CHANGED,
            InstanceEvent::SmtpActivationRecorded(_) => Self::SMTP_ACTIVATION_RECORDED,
        }
    }

    fn to_payload(&self) -> Result<JsonValue, EventCodecError> {
        let ty = self.event_type();
        match self {
            InstanceEvent::DomainAdded(e) => encode_payload(ty, e),
            InstanceEvent::DomainRemoved(e) => encode_payload(ty, e),
            InstanceEvent::DomainPolicyAdded(e) => encode_payload(ty, e),
            InstanceEvent::DomainPolicyChanged(e) => encode_payload(ty, e),
            InstanceEvent::SmtpActivationRecorded(e) => encode_payload(ty, e),
        }
    }

    fn from_payload(event_type: &str, payload: &JsonValue) -> Option<Result<Self, EventCodecError>> {
        let decoded = match event_type {
            Self::DOMAIN_ADDED => decode_payload(event_type, payload).map(InstanceEvent::DomainAdded),
            Self::DOMAIN_REMOVED => {
                decode_payload(event_type, payload).map(InstanceEvent::DomainRemoved)
            }
            Self::DOMAIN_POLICY_ADDED => {
                decode_payload(event_type, payload).map(InstanceEvent::DomainPolicyAdded)
            }
            Self::DOMAIN_POLICY_CHANGED => {
                decode_payload(event_type, payload).map(InstanceEvent::DomainPolicyChanged)
            }
            Self::SMTP_ACTIVATION_RECORDED => {
                decode_payload(event_type, payload).map(InstanceEvent::SmtpActivationRecorded)
            }
            _ => return None,
        };
        Some(decoded)
    }
}

impl Aggregate for Instance {
    type Command = InstanceCommand;
    type Event = InstanceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InstanceEvent::DomainAdded(e) => {
                self.domains.insert(e.domain.clone(), e.generated);
            }
            InstanceEvent::DomainRemoved(e) => {
                self.domains.remove(&e.domain);
            }
            InstanceEvent::DomainPolicyAdded(e) => {
                self.domain_policy = Some(e.policy);
            }
            InstanceEvent::DomainPolicyChanged(e) => {
                let policy = self.domain_policy.get_or_insert_with(DomainPolicy::default);
                if let Some(v) = e.user_login_must_be_domain {
                    policy.user_login_must_be_domain = v;
                }
                if let Some(v) = e.validate_org_domains {
                    policy.validate_org_domains = v;
                }
                if let Some(v) = e.smtp_sender_address_matches_instance_domain {
                    policy.smtp_sender_address_matches_instance_domain = v;
                }
            }
            InstanceEvent::SmtpActivationRecorded(e) => {
                self.last_activated_smtp_config = Some(e.smtp_config_id.clone());
            }
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_instance(command.target_aggregate_id())?;
        match command {
            InstanceCommand::AddDomain(cmd) => self.handle_add_domain(cmd),
            InstanceCommand::RemoveDomain(cmd) => self.handle_remove_domain(cmd),
            InstanceCommand::AddDomainPolicy(cmd) => self.handle_add_policy(cmd),
            InstanceCommand::ChangeDomainPolicy(cmd) => self.handle_change_policy(cmd),
            InstanceCommand::RecordSmtpActivation(cmd) => {
                cmd.smtp_config_id.ensure_present()?;
                Ok(vec![InstanceEvent::SmtpActivationRecorded(SmtpActivationRecorded {
                    smtp_config_id: cmd.smtp_config_id.clone(),
                })])
            }
        }
    }
}

impl Instance {
    fn ensure_instance(&self, instance_id: &AggregateId) -> Result<(), DomainError> {
        instance_id.ensure_present()?;
        if &self.id != instance_id {
            return Err(DomainError::invalid_argument("instance id mismatch"));
        }
        Ok(())
    }

    fn handle_add_domain(&self, cmd: &AddInstanceDomain) -> Result<Vec<InstanceEvent>, DomainError> {
        let domain = normalize_domain(&cmd.domain)?;
        if self.has_domain(&domain) {
            return Err(DomainError::precondition_failed(format!(
                "domain '{domain}' is already added"
            )));
        }
        Ok(vec![InstanceEvent::DomainAdded(DomainAdded {
            domain,
            generated: cmd.generated,
        })])
    }

    fn handle_remove_domain(
        &self,
        cmd: &RemoveInstanceDomain,
    ) -> Result<Vec<InstanceEvent>, DomainError> {
        let domain = normalize_domain(&cmd.domain)?;
        if !self.has_domain(&domain) {
            return Err(DomainError::not_found(format!("domain '{domain}'")));
        }
        Ok(vec![InstanceEvent::DomainRemoved(DomainRemoved { domain })])
    }

    fn handle_add_policy(&self, cmd: &AddDomainPolicy) -> Result<Vec<InstanceEvent>, DomainError> {
        if self.domain_policy.is_some() {
            return Err(DomainError::precondition_failed("domain policy already exists"));
        }
        Ok(vec![InstanceEvent::DomainPolicyAdded(DomainPolicyAdded {
            policy: cmd.policy,
        })])
    }

    fn handle_change_policy(
        &self,
        cmd: &ChangeDomainPolicy,
    ) -> Result<Vec<InstanceEvent>, DomainError> {
        let current = self
            .domain_policy
            .as_ref()
            .ok_or_else(|| DomainError::not_found("domain policy"))?;
        let changed = DomainPolicyChanged::between(current, &cmd.policy);
        if changed.is_empty() {
            return Err(DomainError::precondition_failed("domain policy has not been changed"));
        }
        Ok(vec![InstanceEvent::DomainPolicyChanged(changed)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_events::execute;

    fn instance_id() -> AggregateId {
        AggregateId::new("INSTANCE")
    }

    fn add_domain(domain: &str) -> InstanceCommand {
        InstanceCommand::AddDomain(AddInstanceDomain {
            instance_id: instance_id(),
            domain: domain.to_string(),
            generated: false,
        })
    }

    fn strict_policy() -> DomainPolicy {
        DomainPolicy {
            user_login_must_be_domain: true,
            validate_org_domains: true,
            smtp_sender_address_matches_instance_domain: true,
        }
    }

    #[test]
    fn add_domain_normalizes_and_emits_event() {
        let instance = Instance::empty(instance_id());
        let events = instance.handle(&add_domain("  Domain.CH ")).unwrap();
        assert_eq!(
            events,
            vec![InstanceEvent::DomainAdded(DomainAdded {
                domain: "domain.ch".to_string(),
                generated: false,
            })]
        );
    }

    #[test]
    fn add_domain_twice_is_precondition_failed() {
        let mut instance = Instance::empty(instance_id());
        execute(&mut instance, &add_domain("domain.ch")).unwrap();
        let err = instance.handle(&add_domain("DOMAIN.ch")).unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[test]
    fn remove_unknown_domain_is_not_found() {
        let instance = Instance::empty(instance_id());
        let err = instance
            .handle(&InstanceCommand::RemoveDomain(RemoveInstanceDomain {
                instance_id: instance_id(),
                domain: "domain.ch".to_string(),
            }))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn removed_domain_leaves_sender_policy() {
        let mut instance = Instance::empty(instance_id());
        execute(&mut instance, &add_domain("domain.ch")).unwrap();
        execute(&mut instance, &add_domain("other.ch")).unwrap();
        execute(
            &mut instance,
            &InstanceCommand::RemoveDomain(RemoveInstanceDomain {
                instance_id: instance_id(),
                domain: "domain.ch".to_string(),
            }),
        )
        .unwrap();

        let snapshot = instance.sender_policy(&strict_policy());
        assert!(snapshot.check_sender("a@other.ch").is_ok());
        assert!(snapshot.check_sender("a@domain.ch").is_err());
    }

    #[test]
    fn sender_policy_falls_back_to_default() {
        let instance = Instance::empty(instance_id());
        assert!(!instance.sender_policy(&DomainPolicy::default()).requires_instance_domain());
        assert!(instance.sender_policy(&strict_policy()).requires_instance_domain());
    }

    #[test]
    fn change_policy_records_only_changed_flags() {
        let mut instance = Instance::empty(instance_id());
        execute(
            &mut instance,
            &InstanceCommand::AddDomainPolicy(AddDomainPolicy {
                instance_id: instance_id(),
                policy: DomainPolicy::default(),
            }),
        )
        .unwrap();

        let desired = DomainPolicy {
            smtp_sender_address_matches_instance_domain: true,
            ..DomainPolicy::default()
        };
        let events = execute(
            &mut instance,
            &InstanceCommand::ChangeDomainPolicy(ChangeDomainPolicy {
                instance_id: instance_id(),
                policy: desired,
            }),
        )
        .unwrap();

        assert_eq!(
            events,
            vec![InstanceEvent::DomainPolicyChanged(DomainPolicyChanged {
                smtp_sender_address_matches_instance_domain: Some(true),
                ..DomainPolicyChanged::default()
            })]
        );
        assert_eq!(instance.domain_policy(), Some(&desired));
    }

    #[test]
    fn unchanged_policy_is_precondition_failed() {
        let mut instance = Instance::empty(instance_id());
        execute(
            &mut instance,
            &InstanceCommand::AddDomainPolicy(AddDomainPolicy {
                instance_id: instance_id(),
                policy: strict_policy(),
            }),
        )
        .unwrap();
        let err = instance
            .handle(&InstanceCommand::ChangeDomainPolicy(ChangeDomainPolicy {
                instance_id: instance_id(),
                policy: strict_policy(),
            }))
            .unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[test]
    fn change_without_policy_is_not_found() {
        let instance = Instance::empty(instance_id());
        let err = instance
            .handle(&InstanceCommand::ChangeDomainPolicy(ChangeDomainPolicy {
                instance_id: instance_id(),
                policy: strict_policy(),
            }))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn smtp_activation_is_recorded_unconditionally() {
        let mut instance = Instance::empty(instance_id());
        let record = |id: &str| {
            InstanceCommand::RecordSmtpActivation(RecordSmtpActivation {
                instance_id: instance_id(),
                smtp_config_id: AggregateId::new(id),
            })
        };

        execute(&mut instance, &record("first")).unwrap();
        execute(&mut instance, &record("first")).unwrap();
        execute(&mut instance, &record("second")).unwrap();
        assert_eq!(instance.last_activated_smtp_config(), Some(&AggregateId::new("second")));

        let err = instance.handle(&record(" ")).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn payload_round_trips_through_event_type() {
        let event = InstanceEvent::DomainPolicyAdded(DomainPolicyAdded {
            policy: strict_policy(),
        });
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["smtp_sender_address_matches_instance_domain"], true);
        let decoded = InstanceEvent::from_payload(event.event_type(), &payload)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, event);
        assert!(InstanceEvent::from_payload("instance.added", &payload).is_none());
    }
}
