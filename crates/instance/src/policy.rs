//! Domain policy and the read-only snapshot SMTP validation consumes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use keystone_core::{DomainError, ValueObject};

use crate::address::address_domain;

/// Instance-wide domain policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicy {
    /// Login names must carry an organization domain.
    pub user_login_must_be_domain: bool,
    /// Organization domains must be verified before use.
    pub validate_org_domains: bool,
    /// SMTP sender addresses must use a verified instance domain.
    pub smtp_sender_address_matches_instance_domain: bool,
}

impl ValueObject for DomainPolicy {}

/// What SMTP validation needs to know about the instance, captured once per
/// command from the instance aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderDomainPolicy {
    require_instance_domain: bool,
    verified_domains: BTreeSet<String>,
}

impl SenderDomainPolicy {
    pub fn new(require_instance_domain: bool, verified_domains: impl IntoIterator<Item = String>) -> Self {
        Self {
            require_instance_domain,
            verified_domains: verified_domains
                .into_iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
        }
    }

    /// A policy that accepts any sender domain.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn requires_instance_domain(&self) -> bool {
        self.require_instance_domain
    }

    pub fn verified_domains(&self) -> &BTreeSet<String> {
        &self.verified_domains
    }

    /// Check a (syntactically valid) sender address against the policy.
    pub fn check_sender(&self, sender_address: &str) -> Result<(), DomainError> {
        if !self.require_instance_domain {
            return Ok(());
        }
        match address_domain(sender_address) {
            Some(domain) if self.verified_domains.contains(&domain) => Ok(()),
            Some(domain) => Err(DomainError::invalid_argument(format!(
                "sender domain '{domain}' is not a verified domain of the instance"
            ))),
            None => Err(DomainError::invalid_argument("sender address has no domain")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_accepts_any_domain() {
        assert!(SenderDomainPolicy::unrestricted().check_sender("a@anything.io").is_ok());
    }

    #[test]
    fn required_domain_must_be_verified() {
        let policy = SenderDomainPolicy::new(true, ["domain.ch".to_string()]);
        assert!(policy.check_sender("from@domain.ch").is_ok());
        assert!(policy.check_sender("from@DOMAIN.ch").is_ok());
        assert!(policy.check_sender("from@wrongdomain.ch").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn required_domain_without_any_verified_domain_fails() {
        let policy = SenderDomainPolicy::new(true, Vec::new());
        assert!(policy.check_sender("from@domain.ch").unwrap_err().is_invalid_argument());
    }
}
