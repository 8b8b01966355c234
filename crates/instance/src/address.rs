//! Mail address and DNS domain syntax checks.

use keystone_core::DomainError;

/// Trim and check that `raw` looks like `local@domain`.
pub fn normalize_address(field: &str, raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid_argument(format!("{field} must not be empty")));
    }
    match trimmed.rsplit_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !trimmed.contains(char::is_whitespace) =>
        {
            Ok(trimmed.to_string())
        }
        _ => Err(DomainError::invalid_argument(format!(
            "{field} '{trimmed}' is not a mail address"
        ))),
    }
}

/// Domain part of a mail address, lowercased.
pub fn address_domain(address: &str) -> Option<String> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
}

/// Trim, lowercase and check DNS name syntax.
pub fn normalize_domain(raw: &str) -> Result<String, DomainError> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return Err(DomainError::invalid_argument("domain must not be empty"));
    }
    if domain.len() > 253 || !domain.contains('.') {
        return Err(DomainError::invalid_argument(format!("'{domain}' is not a domain name")));
    }
    let labels_ok = domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    });
    if !labels_ok {
        return Err(DomainError::invalid_argument(format!("'{domain}' is not a domain name")));
    }
    Ok(domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_must_have_local_and_domain_part() {
        assert_eq!(normalize_address("sender", " from@domain.ch ").unwrap(), "from@domain.ch");
        for raw in ["", "  ", "from", "@domain.ch", "from@", "fr om@domain.ch"] {
            assert!(normalize_address("sender", raw).unwrap_err().is_invalid_argument());
        }
    }

    #[test]
    fn domain_of_address_is_lowercased() {
        assert_eq!(address_domain("From@Domain.CH").as_deref(), Some("domain.ch"));
        assert_eq!(address_domain("from"), None);
    }

    #[test]
    fn domains_are_normalized() {
        assert_eq!(normalize_domain(" Domain.CH. ").unwrap(), "domain.ch");
        for raw in ["", "localhost", "-a.ch", "a-.ch", "a..ch", "a_b.ch"] {
            assert!(normalize_domain(raw).is_err(), "{raw:?} should be rejected");
        }
    }
}
