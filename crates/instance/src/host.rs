//! SMTP relay endpoint (`host:port`).

use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

use keystone_core::{DomainError, ValueObject};

/// A syntactically valid `host:port` or `[ipv6]:port` endpoint.
///
/// Validation is purely syntactic: nothing is resolved. Deserialization does
/// not re-validate, so events written under older rules still replay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SmtpHost(String);

impl ValueObject for SmtpHost {}

impl SmtpHost {
    /// Trim and validate a raw endpoint.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("smtp host must not be empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::invalid_argument("smtp host must not contain whitespace"));
        }

        let (host, port) = split_host_port(trimmed)?;
        if host.is_empty() {
            return Err(DomainError::invalid_argument("smtp host is missing the host name"));
        }
        validate_port(port)?;

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part without brackets.
    pub fn host(&self) -> &str {
        match split_host_port(&self.0) {
            Ok((host, _)) => host,
            Err(_) => &self.0,
        }
    }

    pub fn port(&self) -> Option<u16> {
        split_host_port(&self.0).ok().and_then(|(_, port)| port.parse().ok())
    }
}

impl core::fmt::Display for SmtpHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn split_host_port(value: &str) -> Result<(&str, &str), DomainError> {
    if let Some(rest) = value.strip_prefix('[') {
        let (inner, after) = rest
            .split_once(']')
            .ok_or_else(|| DomainError::invalid_argument("smtp host has an unterminated '['"))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| DomainError::invalid_argument("smtp host is missing a port"))?;
        let address = inner.split_once('%').map_or(inner, |(addr, _zone)| addr);
        if address.parse::<Ipv6Addr>().is_err() {
            return Err(DomainError::invalid_argument(format!(
                "smtp host '[{inner}]' is not an IPv6 address"
            )));
        }
        return Ok((inner, port));
    }

    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| DomainError::invalid_argument("smtp host is missing a port"))?;
    if host.contains(':') {
        return Err(DomainError::invalid_argument(
            "IPv6 smtp hosts must be bracketed, e.g. [2001:db8::1]:25",
        ));
    }
    if host.contains('[') || host.contains(']') {
        return Err(DomainError::invalid_argument("smtp host has unbalanced brackets"));
    }
    Ok((host, port))
}

fn validate_port(port: &str) -> Result<(), DomainError> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::invalid_argument(format!(
            "smtp port '{port}' is not a number"
        )));
    }
    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| DomainError::invalid_argument(format!("smtp port '{port}' is out of range")))
}
