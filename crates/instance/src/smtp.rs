//! SMTP configuration aggregate.
//!
//! Lifecycle: non-existent → `Added` (inactive) → `Changed` / `PasswordChanged`
//! → `Activated` ⇄ `Deactivated` → `Removed` (terminal, id is never reused).
//!
//! The aggregate only sees its own stream. Inputs from elsewhere arrive inside
//! the command: the sender-domain policy snapshot (read from the instance
//! aggregate) and the password, which is already encrypted.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use keystone_core::{Aggregate, AggregateId, AggregateRoot, CryptoValue, DomainError, ValueObject};
use keystone_events::{Command, Event, EventCodecError, decode_payload, encode_payload};

use crate::address::normalize_address;
use crate::host::SmtpHost;
use crate::policy::SenderDomainPolicy;

/// Raw, caller-supplied SMTP settings (API shape, not yet validated).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfigInput {
    pub tls: bool,
    pub sender_address: String,
    pub sender_name: String,
    /// Empty means "no reply-to".
    pub reply_to_address: String,
    pub host: String,
    pub user: String,
    pub provider_type: u32,
}

impl SmtpConfigInput {
    /// Syntactic validation. Needs no state, so callers run it before reading
    /// the log.
    pub fn validate(&self) -> Result<SmtpSettings, DomainError> {
        let host = SmtpHost::parse(&self.host)?;
        let sender_address = normalize_address("sender address", &self.sender_address)?;
        let reply_to_address = match self.reply_to_address.trim() {
            "" => None,
            raw => Some(normalize_address("reply-to address", raw)?),
        };
        Ok(SmtpSettings {
            tls: self.tls,
            sender_address,
            sender_name: self.sender_name.trim().to_string(),
            reply_to_address,
            host,
            user: self.user.trim().to_string(),
            provider_type: self.provider_type,
        })
    }
}

/// Validated, comparable SMTP settings (everything except the password).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    tls: bool,
    sender_address: String,
    sender_name: String,
    reply_to_address: Option<String>,
    host: SmtpHost,
    user: String,
    provider_type: u32,
}

impl ValueObject for SmtpSettings {}

impl SmtpSettings {
    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    pub fn reply_to_address(&self) -> Option<&str> {
        self.reply_to_address.as_deref()
    }

    pub fn host(&self) -> &SmtpHost {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn provider_type(&self) -> u32 {
        self.provider_type
    }

    /// Field-by-field comparison, in a fixed field order.
    pub fn diff(&self, desired: &SmtpSettings) -> Vec<SmtpConfigChange> {
        let mut changes = Vec::new();
        if self.tls != desired.tls {
            changes.push(SmtpConfigChange::Tls(desired.tls));
        }
        if self.sender_address != desired.sender_address {
            changes.push(SmtpConfigChange::SenderAddress(desired.sender_address.clone()));
        }
        if self.sender_name != desired.sender_name {
            changes.push(SmtpConfigChange::SenderName(desired.sender_name.clone()));
        }
        if self.reply_to_address != desired.reply_to_address {
            changes.push(SmtpConfigChange::ReplyToAddress(desired.reply_to_address.clone()));
        }
        if self.host != desired.host {
            changes.push(SmtpConfigChange::Host(desired.host.clone()));
        }
        if self.user != desired.user {
            changes.push(SmtpConfigChange::User(desired.user.clone()));
        }
        if self.provider_type != desired.provider_type {
            changes.push(SmtpConfigChange::ProviderType(desired.provider_type));
        }
        changes
    }

    fn apply_change(&mut self, change: &SmtpConfigChange) {
        match change {
            SmtpConfigChange::Tls(v) => self.tls = *v,
            SmtpConfigChange::SenderAddress(v) => self.sender_address = v.clone(),
            SmtpConfigChange::SenderName(v) => self.sender_name = v.clone(),
            SmtpConfigChange::ReplyToAddress(v) => self.reply_to_address = v.clone(),
            SmtpConfigChange::Host(v) => self.host = v.clone(),
            SmtpConfigChange::User(v) => self.user = v.clone(),
            SmtpConfigChange::ProviderType(v) => self.provider_type = *v,
        }
    }
}

/// One changed field of an SMTP configuration, carrying the new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum SmtpConfigChange {
    Tls(bool),
    SenderAddress(String),
    SenderName(String),
    ReplyToAddress(Option<String>),
    Host(SmtpHost),
    User(String),
    ProviderType(u32),
}

/// Lifecycle state of an SMTP configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpConfigState {
    /// No `Added` event yet.
    Unspecified,
    Inactive,
    Active,
    Removed,
}

/// Aggregate root: SmtpConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    id: AggregateId,
    state: SmtpConfigState,
    settings: Option<SmtpSettings>,
    password: Option<CryptoValue>,
}

impl SmtpConfig {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            state: SmtpConfigState::Unspecified,
            settings: None,
            password: None,
        }
    }

    pub fn state(&self) -> SmtpConfigState {
        self.state
    }

    /// Added and not removed.
    pub fn exists(&self) -> bool {
        matches!(self.state, SmtpConfigState::Inactive | SmtpConfigState::Active)
    }

    pub fn is_active(&self) -> bool {
        self.state == SmtpConfigState::Active
    }

    pub fn settings(&self) -> Option<&SmtpSettings> {
        self.settings.as_ref()
    }

    pub fn password(&self) -> Option<&CryptoValue> {
        self.password.as_ref()
    }
}

impl AggregateRoot for SmtpConfig {
    type Id = AggregateId;

    const AGGREGATE_TYPE: &'static str = "instance.smtp_config";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: AddSmtpConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddSmtpConfig {
    pub id: AggregateId,
    pub settings: SmtpSettings,
    pub password: Option<CryptoValue>,
    pub sender_policy: SenderDomainPolicy,
}

/// Command: ChangeSmtpConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSmtpConfig {
    pub id: AggregateId,
    pub settings: SmtpSettings,
    pub sender_policy: SenderDomainPolicy,
}

/// Command: ChangeSmtpConfigPassword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSmtpConfigPassword {
    pub id: AggregateId,
    pub password: CryptoValue,
}

/// Command: ActivateSmtpConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateSmtpConfig {
    pub id: AggregateId,
}

/// Command: DeactivateSmtpConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeactivateSmtpConfig {
    pub id: AggregateId,
}

/// Command: RemoveSmtpConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveSmtpConfig {
    pub id: AggregateId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpConfigCommand {
    Add(AddSmtpConfig),
    Change(ChangeSmtpConfig),
    ChangePassword(ChangeSmtpConfigPassword),
    Activate(ActivateSmtpConfig),
    Deactivate(DeactivateSmtpConfig),
    Remove(RemoveSmtpConfig),
}

impl Command for SmtpConfigCommand {
    fn target_aggregate_id(&self) -> &AggregateId {
        match self {
            SmtpConfigCommand::Add(c) => &c.id,
            SmtpConfigCommand::Change(c) => &c.id,
            SmtpConfigCommand::ChangePassword(c) => &c.id,
            SmtpConfigCommand::Activate(c) => &c.id,
            SmtpConfigCommand::Deactivate(c) => &c.id,
            SmtpConfigCommand::Remove(c) => &c.id,
        }
    }
}

/// Event: SmtpConfigAdded (full snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfigAdded {
    pub id: AggregateId,
    #[serde(flatten)]
    pub settings: SmtpSettings,
    #[serde(default)]
    pub password: Option<CryptoValue>,
}

/// Event: SmtpConfigChanged (changed fields only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfigChanged {
    pub id: AggregateId,
    pub changes: Vec<SmtpConfigChange>,
}

/// Event: SmtpConfigPasswordChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfigPasswordChanged {
    pub id: AggregateId,
    pub password: CryptoValue,
}

/// Event: SmtpConfigActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfigActivated {
    pub id: AggregateId,
}

/// Event: SmtpConfigDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfigDeactivated {
    pub id: AggregateId,
}

/// Event: SmtpConfigRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfigRemoved {
    pub id: AggregateId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpConfigEvent {
    Added(SmtpConfigAdded),
    Changed(SmtpConfigChanged),
    PasswordChanged(SmtpConfigPasswordChanged),
    Activated(SmtpConfigActivated),
    Deactivated(SmtpConfigDeactivated),
    Removed(SmtpConfigRemoved),
}

impl SmtpConfigEvent {
    pub const ADDED: &'static str = "instance.smtp.config.added";
    pub const CHANGED: &'static str = "instance.smtp.config.changed";
    pub const PASSWORD_CHANGED: &'static str = "instance.smtp.config.password.changed";
    pub const ACTIVATED: &'static str = "instance.smtp.config.activated";
    pub const DEACTIVATED: &'static str = "instance.smtp.config.deactivated";
    pub const REMOVED: &'static str = "instance.smtp.config.removed";
}

impl Event for SmtpConfigEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SmtpConfigEvent::Added(_) => Self::ADDED,
            SmtpConfigEvent::Changed(_) => Self::CHANGED,
            SmtpConfigEvent::PasswordChanged(_) => Self::PASSWORD_CHANGED,
            SmtpConfigEvent::Activated(_) => Self::ACTIVATED,
            SmtpConfigEvent::Deactivated(_) => Self::DEACTIVATED,
            SmtpConfigEvent::Removed(_) => Self::REMOVED,
        }
    }

    fn to_payload(&self) -> Result<JsonValue, EventCodecError> {
        let ty = self.event_type();
        match self {
            SmtpConfigEvent::Added(e) => encode_payload(ty, e),
            SmtpConfigEvent::Changed(e) => encode_payload(ty, e),
            SmtpConfigEvent::PasswordChanged(e) => encode_payload(ty, e),
            SmtpConfigEvent::Activated(e) => encode_payload(ty, e),
            SmtpConfigEvent::Deactivated(e) => encode_payload(ty, e),
            SmtpConfigEvent::Removed(e) => encode_payload(ty, e),
        }
    }

    fn from_payload(event_type: &str, payload: &JsonValue) -> Option<Result<Self, EventCodecError>> {
        let decoded = match event_type {
            Self::ADDED => decode_payload(event_type, payload).map(SmtpConfigEvent::Added),
            Self::CHANGED => decode_payload(event_type, payload).map(SmtpConfigEvent::Changed),
            Self::PASSWORD_CHANGED => {
                decode_payload(event_type, payload).map(SmtpConfigEvent::PasswordChanged)
            }
            Self::ACTIVATED => decode_payload(event_type, payload).map(SmtpConfigEvent::Activated),
            Self::DEACTIVATED => {
                decode_payload(event_type, payload).map(SmtpConfigEvent::Deactivated)
            }
            Self::REMOVED => decode_payload(event_type, payload).map(SmtpConfigEvent::Removed),
            _ => return None,
        };
        Some(decoded)
    }
}

impl Aggregate for SmtpConfig {
    type Command = SmtpConfigCommand;
    type Event = SmtpConfigEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SmtpConfigEvent::Added(e) => {
                self.id = e.id.clone();
                self.state = SmtpConfigState::Inactive;
                self.settings = Some(e.settings.clone());
                self.password = e.password.clone();
            }
            SmtpConfigEvent::Changed(e) => {
                if let Some(settings) = self.settings.as_mut() {
                    for change in &e.changes {
                        settings.apply_change(change);
                    }
                }
            }
            SmtpConfigEvent::PasswordChanged(e) => {
                self.password = Some(e.password.clone());
            }
            SmtpConfigEvent::Activated(_) => {
                self.state = SmtpConfigState::Active;
            }
            SmtpConfigEvent::Deactivated(_) => {
                self.state = SmtpConfigState::Inactive;
            }
            SmtpConfigEvent::Removed(_) => {
                self.state = SmtpConfigState::Removed;
                self.settings = None;
                self.password = None;
            }
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let id = command.target_aggregate_id();
        id.ensure_present()?;
        if &self.id != id {
            return Err(DomainError::invalid_argument("smtp config id mismatch"));
        }

        match command {
            SmtpConfigCommand::Add(cmd) => self.handle_add(cmd),
            SmtpConfigCommand::Change(cmd) => self.handle_change(cmd),
            SmtpConfigCommand::ChangePassword(cmd) => self.handle_change_password(cmd),
            SmtpConfigCommand::Activate(cmd) => self.handle_activate(cmd),
            SmtpConfigCommand::Deactivate(cmd) => self.handle_deactivate(cmd),
            SmtpConfigCommand::Remove(cmd) => self.handle_remove(cmd),
        }
    }
}

impl SmtpConfig {
    fn ensure_exists(&self) -> Result<&SmtpSettings, DomainError> {
        match (&self.settings, self.exists()) {
            (Some(settings), true) => Ok(settings),
            _ => Err(DomainError::not_found(format!("smtp config '{}'", self.id))),
        }
    }

    fn handle_add(&self, cmd: &AddSmtpConfig) -> Result<Vec<SmtpConfigEvent>, DomainError> {
        if self.state != SmtpConfigState::Unspecified {
            return Err(DomainError::precondition_failed(format!(
                "smtp config '{}' already exists",
                self.id
            )));
        }
        cmd.sender_policy.check_sender(cmd.settings.sender_address())?;

        Ok(vec![SmtpConfigEvent::Added(SmtpConfigAdded {
            id: cmd.id.clone(),
            settings: cmd.settings.clone(),
            password: cmd.password.clone(),
        })])
    }

    fn handle_change(&self, cmd: &ChangeSmtpConfig) -> Result<Vec<SmtpConfigEvent>, DomainError> {
        let current = self.ensure_exists()?;
        cmd.sender_policy.check_sender(cmd.settings.sender_address())?;

        let changes = current.diff(&cmd.settings);
        if changes.is_empty() {
            return Err(DomainError::precondition_failed("smtp config has not been changed"));
        }

        Ok(vec![SmtpConfigEvent::Changed(SmtpConfigChanged {
            id: cmd.id.clone(),
            changes,
        })])
    }

    fn handle_change_password(
        &self,
        cmd: &ChangeSmtpConfigPassword,
    ) -> Result<Vec<SmtpConfigEvent>, DomainError> {
        self.ensure_exists()?;

        // Secrets are opaque: no comparison with the current password.
        Ok(vec![SmtpConfigEvent::PasswordChanged(SmtpConfigPasswordChanged {
            id: cmd.id.clone(),
            password: cmd.password.clone(),
        })])
    }

    fn handle_activate(&self, cmd: &ActivateSmtpConfig) -> Result<Vec<SmtpConfigEvent>, DomainError> {
        self.ensure_exists()?;
        if self.is_active() {
            return Err(DomainError::precondition_failed("smtp config is already active"));
        }
        Ok(vec![SmtpConfigEvent::Activated(SmtpConfigActivated {
            id: cmd.id.clone(),
        })])
    }

    fn handle_deactivate(
        &self,
        cmd: &DeactivateSmtpConfig,
    ) -> Result<Vec<SmtpConfigEvent>, DomainError> {
        self.ensure_exists()?;
        if !self.is_active() {
            return Err(DomainError::precondition_failed("smtp config is already inactive"));
        }
        Ok(vec![SmtpConfigEvent::Deactivated(SmtpConfigDeactivated {
            id: cmd.id.clone(),
        })])
    }

    fn handle_remove(&self, cmd: &RemoveSmtpConfig) -> Result<Vec<SmtpConfigEvent>, DomainError> {
        self.ensure_exists()?;
        Ok(vec![SmtpConfigEvent::Removed(SmtpConfigRemoved {
            id: cmd.id.clone(),
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::CryptoType;
    use keystone_events::execute;

    fn config_id() -> AggregateId {
        AggregateId::new("ID")
    }

    fn input() -> SmtpConfigInput {
        SmtpConfigInput {
            tls: true,
            sender_address: "from@domain.ch".to_string(),
            sender_name: "name".to_string(),
            reply_to_address: String::new(),
            host: "host:587".to_string(),
            user: "user".to_string(),
            provider_type: 7,
        }
    }

    fn secret(bytes: &[u8]) -> CryptoValue {
        CryptoValue {
            crypto_type: CryptoType::Encryption,
            algorithm: "enc".to_string(),
            key_id: "id".to_string(),
            crypted: bytes.to_vec(),
        }
    }

    fn domain_ch_policy() -> SenderDomainPolicy {
        SenderDomainPolicy::new(true, ["domain.ch".to_string()])
    }

    fn added() -> SmtpConfig {
        let mut config = SmtpConfig::empty(config_id());
        execute(
            &mut config,
            &SmtpConfigCommand::Add(AddSmtpConfig {
                id: config_id(),
                settings: input().validate().unwrap(),
                password: Some(secret(b"password")),
                sender_policy: SenderDomainPolicy::unrestricted(),
            }),
        )
        .unwrap();
        config
    }

    fn change(settings: SmtpSettings) -> SmtpConfigCommand {
        SmtpConfigCommand::Change(ChangeSmtpConfig {
            id: config_id(),
            settings,
            sender_policy: domain_ch_policy(),
        })
    }

    #[test]
    fn input_validation_rejects_blank_host() {
        let err = SmtpConfigInput { host: "   ".to_string(), ..input() }
            .validate()
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn input_validation_rejects_missing_port() {
        let err = SmtpConfigInput { host: "host".to_string(), ..input() }
            .validate()
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn input_validation_rejects_empty_input() {
        assert!(SmtpConfigInput::default().validate().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn input_validation_normalizes_reply_to() {
        let settings = SmtpConfigInput {
            reply_to_address: "  ".to_string(),
            ..input()
        }
        .validate()
        .unwrap();
        assert_eq!(settings.reply_to_address(), None);

        let settings = SmtpConfigInput {
            reply_to_address: " replyto@domain.ch ".to_string(),
            ..input()
        }
        .validate()
        .unwrap();
        assert_eq!(settings.reply_to_address(), Some("replyto@domain.ch"));
    }

    #[test]
    fn add_emits_inactive_snapshot() {
        let config = added();
        assert_eq!(config.state(), SmtpConfigState::Inactive);
        assert_eq!(config.settings().unwrap().host().as_str(), "host:587");
        assert_eq!(config.password(), Some(&secret(b"password")));
    }

    #[test]
    fn add_rejects_sender_outside_verified_domains() {
        let err = SmtpConfig::empty(config_id())
            .handle(&SmtpConfigCommand::Add(AddSmtpConfig {
                id: config_id(),
                settings: input().validate().unwrap(),
                password: None,
                sender_policy: SenderDomainPolicy::new(true, Vec::new()),
            }))
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn add_twice_is_rejected() {
        let err = added()
            .handle(&SmtpConfigCommand::Add(AddSmtpConfig {
                id: config_id(),
                settings: input().validate().unwrap(),
                password: None,
                sender_policy: SenderDomainPolicy::unrestricted(),
            }))
            .unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[test]
    fn blank_id_is_invalid_argument() {
        let config = SmtpConfig::empty(AggregateId::new(""));
        let err = config
            .handle(&SmtpConfigCommand::Activate(ActivateSmtpConfig {
                id: AggregateId::new(""),
            }))
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn change_on_missing_config_is_not_found() {
        let err = SmtpConfig::empty(config_id())
            .handle(&change(input().validate().unwrap()))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn change_without_difference_is_precondition_failed() {
        let err = added().handle(&change(input().validate().unwrap())).unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[test]
    fn change_with_foreign_domain_is_invalid_argument() {
        let desired = SmtpConfigInput {
            sender_address: "from@wrongdomain.ch".to_string(),
            ..input()
        };
        let err = added().handle(&change(desired.validate().unwrap())).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn change_records_every_changed_field_in_order() {
        let desired = SmtpConfigInput {
            tls: false,
            sender_address: "from2@domain.ch".to_string(),
            sender_name: "name2".to_string(),
            reply_to_address: "replyto@domain.ch".to_string(),
            host: "[2001:db8::1]:2525".to_string(),
            user: "user2".to_string(),
            provider_type: 2,
        };
        let events = added().handle(&change(desired.validate().unwrap())).unwrap();

        assert_eq!(
            events,
            vec![SmtpConfigEvent::Changed(SmtpConfigChanged {
                id: config_id(),
                changes: vec![
                    SmtpConfigChange::Tls(false),
                    SmtpConfigChange::SenderAddress("from2@domain.ch".to_string()),
                    SmtpConfigChange::SenderName("name2".to_string()),
                    SmtpConfigChange::ReplyToAddress(Some("replyto@domain.ch".to_string())),
                    SmtpConfigChange::Host(SmtpHost::parse("[2001:db8::1]:2525").unwrap()),
                    SmtpConfigChange::User("user2".to_string()),
                    SmtpConfigChange::ProviderType(2),
                ],
            })]
        );
    }

    #[test]
    fn change_records_only_the_changed_field() {
        let desired = SmtpConfigInput {
            user: "other".to_string(),
            ..input()
        };
        let mut config = added();
        let events = execute(&mut config, &change(desired.validate().unwrap())).unwrap();
        assert_eq!(
            events,
            vec![SmtpConfigEvent::Changed(SmtpConfigChanged {
                id: config_id(),
                changes: vec![SmtpConfigChange::User("other".to_string())],
            })]
        );
        assert_eq!(config.settings().unwrap().user(), "other");
    }

    #[test]
    fn password_change_is_always_accepted() {
        let mut config = added();
        let cmd = SmtpConfigCommand::ChangePassword(ChangeSmtpConfigPassword {
            id: config_id(),
            password: secret(b"password"),
        });
        execute(&mut config, &cmd).unwrap();
        let events = execute(&mut config, &cmd).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn password_change_on_missing_config_is_not_found() {
        let err = SmtpConfig::empty(config_id())
            .handle(&SmtpConfigCommand::ChangePassword(ChangeSmtpConfigPassword {
                id: config_id(),
                password: secret(b"x"),
            }))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn activation_toggles_and_rejects_redundant_toggles() {
        let mut config = added();
        let activate = SmtpConfigCommand::Activate(ActivateSmtpConfig { id: config_id() });
        let deactivate = SmtpConfigCommand::Deactivate(DeactivateSmtpConfig { id: config_id() });

        assert!(config.handle(&deactivate).unwrap_err().is_precondition_failed());
        execute(&mut config, &activate).unwrap();
        assert!(config.is_active());
        assert!(config.handle(&activate).unwrap_err().is_precondition_failed());
        execute(&mut config, &deactivate).unwrap();
        assert_eq!(config.state(), SmtpConfigState::Inactive);
    }

    #[test]
    fn removed_config_is_terminal() {
        let mut config = added();
        execute(
            &mut config,
            &SmtpConfigCommand::Remove(RemoveSmtpConfig { id: config_id() }),
        )
        .unwrap();
        assert_eq!(config.state(), SmtpConfigState::Removed);
        assert!(config.password().is_none());

        for cmd in [
            SmtpConfigCommand::Activate(ActivateSmtpConfig { id: config_id() }),
            SmtpConfigCommand::Remove(RemoveSmtpConfig { id: config_id() }),
            change(input().validate().unwrap()),
        ] {
            assert!(config.handle(&cmd).unwrap_err().is_not_found());
        }
        let err = config
            .handle(&SmtpConfigCommand::Add(AddSmtpConfig {
                id: config_id(),
                settings: input().validate().unwrap(),
                password: None,
                sender_policy: SenderDomainPolicy::unrestricted(),
            }))
            .unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[test]
    fn changed_payload_is_a_field_value_list() {
        let event = SmtpConfigEvent::Changed(SmtpConfigChanged {
            id: config_id(),
            changes: vec![
                SmtpConfigChange::Host(SmtpHost::parse("host2:587").unwrap()),
                SmtpConfigChange::ReplyToAddress(None),
            ],
        });
        let payload = event.to_payload().unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "id": "ID",
                "changes": [
                    { "field": "host", "value": "host2:587" },
                    { "field": "reply_to_address", "value": null },
                ],
            })
        );
        let decoded = SmtpConfigEvent::from_payload(SmtpConfigEvent::CHANGED, &payload)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn added_payload_never_contains_plaintext_fields() {
        let event = SmtpConfigEvent::Added(SmtpConfigAdded {
            id: config_id(),
            settings: input().validate().unwrap(),
            password: Some(secret(b"sealed")),
        });
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["host"], "host:587");
        assert_eq!(payload["password"]["algorithm"], "enc");
        assert!(payload.get("plaintext").is_none());
    }

    #[test]
    fn unknown_event_types_are_not_decoded() {
        assert!(SmtpConfigEvent::from_payload("instance.smtp.config.tested", &JsonValue::Null).is_none());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn settings_strategy() -> impl Strategy<Value = SmtpConfigInput> {
            (
                any::<bool>(),
                "[a-z]{1,8}",
                "[a-z]{0,8}",
                prop::option::of("[a-z]{1,8}"),
                "[a-z]{1,10}",
                1u16..,
                "[a-z]{0,8}",
                0u32..8,
            )
                .prop_map(|(tls, local, name, reply, host, port, user, provider)| SmtpConfigInput {
                    tls,
                    sender_address: format!("{local}@domain.ch"),
                    sender_name: name,
                    reply_to_address: reply.map(|r| format!("{r}@domain.ch")).unwrap_or_default(),
                    host: format!("{host}:{port}"),
                    user,
                    provider_type: provider,
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Applying a diff to the current settings yields the desired settings.
            #[test]
            fn diff_then_apply_reaches_desired(
                current in settings_strategy(),
                desired in settings_strategy(),
            ) {
                let current = current.validate().unwrap();
                let desired = desired.validate().unwrap();

                let changes = current.diff(&desired);
                let mut patched = current.clone();
                for change in &changes {
                    patched.apply_change(change);
                }

                prop_assert_eq!(&patched, &desired);
                prop_assert_eq!(changes.is_empty(), current == desired);
            }

            /// Handle is deterministic and does not mutate state.
            #[test]
            fn handle_is_pure(desired in settings_strategy()) {
                let config = added();
                let before = config.clone();
                let cmd = change(desired.validate().unwrap());

                let first = config.handle(&cmd);
                let second = config.handle(&cmd);

                prop_assert_eq!(&config, &before);
                prop_assert_eq!(first, second);
            }
        }
    }
}
