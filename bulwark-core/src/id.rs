//! Prefixed identifiers for records bulwark creates itself.
//!
//! IDs look like `inc_3q2-7wRkVZb1Uu0x` and carry 96 bits of randomness,
//! base64 URL-safe encoded without padding.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::RngCore;

const ENTROPY_BYTES: usize = 12;

/// Generate `{prefix}_{random}`.
pub fn generate_prefixed_id(prefix: &str) -> String {
    let mut bytes = [0u8; ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut bytes);

    format!("{prefix}_{}", BASE64_URL_SAFE_NO_PAD.encode(bytes))
}

/// Check that `id` is `{expected_prefix}_{random}` with enough entropy.
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    let Some(random_part) = id
        .strip_prefix(expected_prefix)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };

    BASE64_URL_SAFE_NO_PAD
        .decode(random_part)
        .is_ok_and(|decoded| decoded.len() >= ENTROPY_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_prefixed_id() {
        let id = generate_prefixed_id("inc");
        assert!(id.starts_with("inc_"));
        assert!(validate_prefixed_id(&id, "inc"));
        assert!(!validate_prefixed_id(&id, "usr"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_prefixed_id("usr");
        let b = generate_prefixed_id("usr");
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(!validate_prefixed_id("inc", "inc"));
        assert!(!validate_prefixed_id("inc_", "inc"));
        assert!(!validate_prefixed_id("inc_short", "inc"));
        assert!(!validate_prefixed_id("inc_!!!!!!!!!!!!!!!!", "inc"));
    }
}
