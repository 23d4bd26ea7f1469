use chrono::{DateTime, Utc};

use crate::constants::{ERR_INVALID_TIMESTAMP, MAX_TIMESTAMP_AGE_SECS};
use crate::error::AppError;
use crate::security::{validate_timestamp, verify_hmac};

/// Convert Unix timestamp to RFC3339 string, defaulting to now if invalid
pub fn timestamp_to_rfc3339(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

/// Error type for signed request validation (constrained to only possible errors)
#[derive(Debug)]
pub enum SignedRequestError {
    InvalidSignature,
    InvalidTimestamp,
}

impl From<SignedRequestError> for AppError {
    fn from(err: SignedRequestError) -> Self {
        match err {
            SignedRequestError::InvalidSignature => AppError::InvalidSignature,
            SignedRequestError::InvalidTimestamp => {
                AppError::InvalidInput(ERR_INVALID_TIMESTAMP.to_string())
            }
        }
    }
}

/// Bytes the deployment backend signs: the timestamp and payload joined by
/// a dot, so a captured signature cannot be replayed with a fresh timestamp
pub fn signed_payload(timestamp: i64, payload: &str) -> String {
    format!("{}.{}", timestamp, payload)
}

/// Verify HMAC signature and timestamp for authenticated requests
pub fn validate_signed_request(
    payload: &str,
    signature: &str,
    timestamp: i64,
    now: i64,
    secret: &str,
) -> Result<(), SignedRequestError> {
    if !verify_hmac(&signed_payload(timestamp, payload), signature, secret) {
        tracing::warn!("Invalid HMAC signature");
        return Err(SignedRequestError::InvalidSignature);
    }

    if !validate_timestamp(timestamp, now, MAX_TIMESTAMP_AGE_SECS) {
        return Err(SignedRequestError::InvalidTimestamp);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::sign;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_valid_signed_request() {
        let signature = sign(&signed_payload(NOW, "{}"), "secret").unwrap();
        assert!(validate_signed_request("{}", &signature, NOW, NOW, "secret").is_ok());
    }

    #[test]
    fn test_signature_binds_timestamp() {
        let signature = sign(&signed_payload(NOW, "{}"), "secret").unwrap();
        assert!(matches!(
            validate_signed_request("{}", &signature, NOW + 1, NOW, "secret"),
            Err(SignedRequestError::InvalidSignature)
        ));
    }

    #[test]
    fn test_stale_timestamp() {
        let old = NOW - 1_000;
        let signature = sign(&signed_payload(old, "{}"), "secret").unwrap();
        assert!(matches!(
            validate_signed_request("{}", &signature, old, NOW, "secret"),
            Err(SignedRequestError::InvalidTimestamp)
        ));
    }

    #[test]
    fn test_timestamp_to_rfc3339() {
        assert_eq!(timestamp_to_rfc3339(0), "1970-01-01T00:00:00+00:00");
    }
}
