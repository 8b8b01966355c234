//! Instance configuration domain module (event-sourced).
//!
//! Business rules for an instance's own settings: its verified domains, its
//! domain policy and its outbound SMTP configurations. Everything here is
//! deterministic domain logic (no IO, no storage, no crypto).

pub mod address;
pub mod host;
pub mod instance;
pub mod policy;
pub mod smtp;

pub use host::SmtpHost;
pub use instance::{
    AddDomainPolicy, AddInstanceDomain, ChangeDomainPolicy, DomainAdded, DomainPolicyAdded,
    DomainPolicyChanged, DomainRemoved, Instance, InstanceCommand, InstanceEvent,
    RecordSmtpActivation, RemoveInstanceDomain, SmtpActivationRecorded,
};
pub use policy::{DomainPolicy, SenderDomainPolicy};
pub use smtp::{
    ActivateSmtpConfig, AddSmtpConfig, ChangeSmtpConfig, ChangeSmtpConfigPassword,
    DeactivateSmtpConfig, RemoveSmtpConfig, SmtpConfig, SmtpConfigActivated, SmtpConfigAdded,
    SmtpConfigChange, SmtpConfigChanged, SmtpConfigCommand, SmtpConfigDeactivated,
    SmtpConfigEvent, SmtpConfigInput, SmtpConfigPasswordChanged, SmtpConfigRemoved,
    SmtpConfigState, SmtpSettings,
};
