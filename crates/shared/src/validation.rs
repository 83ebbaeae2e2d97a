//! Common validation utilities.

use validator::ValidationError;

/// Maximum length of a tenant subdomain.
pub const MAX_SUBDOMAIN_LENGTH: usize = 63;

/// Validates a tenant subdomain.
///
/// Subdomains are DNS labels: 1-63 characters, ASCII letters, digits or
/// hyphens, not starting or ending with a hyphen.
pub fn validate_subdomain(subdomain: &str) -> Result<(), ValidationError> {
    if subdomain.trim().is_empty() {
        let mut err = ValidationError::new("subdomain_required");
        err.message = Some("subdomain must not be empty".into());
        return Err(err);
    }

    if subdomain.len() > MAX_SUBDOMAIN_LENGTH {
        let mut err = ValidationError::new("subdomain_length");
        err.message = Some("subdomain must be at most 63 characters".into());
        return Err(err);
    }

    let valid_chars = subdomain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid_chars || subdomain.starts_with('-') || subdomain.ends_with('-') {
        let mut err = ValidationError::new("subdomain_format");
        err.message = Some("subdomain must contain only letters, digits and inner hyphens".into());
        return Err(err);
    }

    Ok(())
}
