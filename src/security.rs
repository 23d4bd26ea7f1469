use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Visitor Identifier Hashing
// =============================================================================

/// Hash a visitor identifier (IP address or browser id) with the server pepper
///
/// Consent logs must show that a visitor made a choice without retaining the
/// raw identifier. The pepper lives in the environment, so a leaked database
/// alone cannot be joined back to IP addresses by brute force.
///
/// `visitor_hash = SHA256(identifier + pepper)`
pub fn hash_visitor_id(identifier: &str, pepper: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.trim().as_bytes());
    hasher.update(pepper.as_bytes());
    hex::encode(hasher.finalize())
}

// =============================================================================
// Signed Requests
// =============================================================================

/// Compute the hex HMAC-SHA256 signature of `data`
pub fn sign(data: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(data.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify HMAC-SHA256 signature
///
/// Proves that a deployment event came from the deployment backend holding
/// the shared secret and not from an arbitrary HTTP client.
pub fn verify_hmac(data: &str, signature: &str, secret: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            tracing::error!("Failed to create HMAC instance");
            return false;
        }
    };

    mac.update(data.as_bytes());

    let sig_bytes = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!("Invalid hex signature format");
            return false;
        }
    };

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Validate timestamp is within acceptable range of `now`
///
/// Prevents replay attacks by ensuring the request is recent.
pub fn validate_timestamp(timestamp: i64, now: i64, max_age_secs: i64) -> bool {
    let age_seconds = (now - timestamp).abs();

    if age_seconds > max_age_secs {
        tracing::warn!(
            "Timestamp too old: {} seconds (max: {})",
            age_seconds,
            max_age_secs
        );
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_visitor_id_format() {
        let result = hash_visitor_id("203.0.113.7", "secret-pepper");

        assert_eq!(result.len(), 64);
        assert!(result.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_visitor_id_deterministic() {
        assert_eq!(
            hash_visitor_id("203.0.113.7", "p"),
            hash_visitor_id(" 203.0.113.7 ", "p")
        );
    }

    #[test]
    fn test_hash_visitor_id_depends_on_pepper() {
        assert_ne!(
            hash_visitor_id("203.0.113.7", "pepper1"),
            hash_visitor_id("203.0.113.7", "pepper2")
        );
        assert_ne!(
            hash_visitor_id("203.0.113.7", "p"),
            hash_visitor_id("203.0.113.8", "p")
        );
    }

    #[test]
    fn test_verify_hmac_valid() {
        let signature = sign("test data", "test-secret-key").unwrap();
        assert!(verify_hmac("test data", &signature, "test-secret-key"));
    }

    #[test]
    fn test_verify_hmac_invalid_signature() {
        let wrong_signature = "0".repeat(64);
        assert!(!verify_hmac("test data", &wrong_signature, "test-secret-key"));
        assert!(!verify_hmac("test data", "not-hex", "test-secret-key"));
    }

    #[test]
    fn test_verify_hmac_wrong_secret() {
        let signature = sign("test data", "test-secret-key").unwrap();
        assert!(!verify_hmac("test data", &signature, "wrong-secret"));
    }

    #[test]
    fn test_validate_timestamp() {
        let now = 1_700_000_000;
        assert!(validate_timestamp(now, now, 300));
        assert!(validate_timestamp(now - 100, now, 300));
        assert!(validate_timestamp(now + 100, now, 300));
        assert!(!validate_timestamp(now - 400, now, 300));
        assert!(!validate_timestamp(now + 400, now, 300));
    }
}
