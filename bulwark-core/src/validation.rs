use crate::error::ValidationError;
use regex::Regex;
use std::sync::LazyLock;

/// Control characters would let a caller forge `category:identifier` keys
/// or break structured log lines.
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{Cc}").expect("Invalid control character regex"));

/// Longest identifier accepted as a rate-limit or lockout key.
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Validates a rate-limit or lockout identifier (an IP address or username).
///
/// ```rust
/// use bulwark_core::validation::validate_identifier;
///
/// assert!(validate_identifier("alice").is_ok());
/// assert!(validate_identifier("203.0.113.7").is_ok());
/// assert!(validate_identifier("   ").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> Result<(), ValidationError> {
    if identifier.trim().is_empty() {
        return Err(ValidationError::MissingField(
            "Identifier is required".to_string(),
        ));
    }

    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::InvalidIdentifier(
            "Identifier is too long".to_string(),
        ));
    }

    if CONTROL_CHARS.is_match(identifier) {
        return Err(ValidationError::InvalidIdentifier(
            "Identifier contains control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates the actor recorded on admin operations (`locked_by`, `resolved_by`).
pub fn validate_actor(actor: &str) -> Result<(), ValidationError> {
    if actor.trim().is_empty() {
        return Err(ValidationError::MissingField("Actor is required".to_string()));
    }

    if CONTROL_CHARS.is_match(actor) {
        return Err(ValidationError::InvalidField(
            "Actor contains control characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("alice").is_ok());
        assert!(validate_identifier("2001:db8::1").is_ok());
        assert!(matches!(
            validate_identifier(""),
            Err(ValidationError::MissingField(_))
        ));
        assert!(matches!(
            validate_identifier("alice\nlogin:bob"),
            Err(ValidationError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1)),
            Err(ValidationError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_validate_actor() {
        assert!(validate_actor("admin-1").is_ok());
        assert!(validate_actor(" ").is_err());
        assert!(validate_actor("admin\u{7}").is_err());
    }
}
