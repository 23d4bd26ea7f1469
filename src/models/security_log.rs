use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FAILED_LOGIN_THRESHOLD, DEFAULT_IP_EVENT_THRESHOLD, DEFAULT_SECURITY_WINDOW_MINUTES,
};

/// Event type recorded for a rejected sign-in
pub const EVENT_FAILED_LOGIN: &str = "failed_login";

/// Append-only security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLog {
    pub id: String,
    /// e.g. `failed_login`, `login`, `password_reset`, `suspicious_activity`
    pub event_type: String,
    pub ip_address: Option<String>,
    pub user_id: Option<String>,
    pub details: String,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

impl SecurityLog {
    pub fn validate_event_type(event_type: &str) -> bool {
        !event_type.is_empty()
            && event_type.len() <= 64
            && event_type
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }
}

/// Alerting configuration for the security monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub alerts_enabled: bool,
    pub alert_email: Option<String>,
    pub failed_login_threshold: u32,
    pub ip_event_threshold: u32,
    pub window_minutes: i64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            alerts_enabled: true,
            alert_email: None,
            failed_login_threshold: DEFAULT_FAILED_LOGIN_THRESHOLD,
            ip_event_threshold: DEFAULT_IP_EVENT_THRESHOLD,
            window_minutes: DEFAULT_SECURITY_WINDOW_MINUTES,
        }
    }
}

impl SecuritySettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.failed_login_threshold == 0 || self.ip_event_threshold == 0 {
            return Err("Thresholds must be at least 1".to_string());
        }
        if !(1..=10_080).contains(&self.window_minutes) {
            return Err("Window must be between 1 minute and 7 days".to_string());
        }
        if let Some(email) = &self.alert_email {
            if !looks_like_email(email) {
                return Err("Alert email is not a valid address".to_string());
            }
        }
        Ok(())
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_event_type() {
        assert!(SecurityLog::validate_event_type(EVENT_FAILED_LOGIN));
        assert!(SecurityLog::validate_event_type("mfa_challenge_2"));
        assert!(!SecurityLog::validate_event_type(""));
        assert!(!SecurityLog::validate_event_type("Failed Login"));
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = SecuritySettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.failed_login_threshold, DEFAULT_FAILED_LOGIN_THRESHOLD);
    }

    #[test]
    fn test_invalid_settings() {
        let zero = SecuritySettings {
            failed_login_threshold: 0,
            ..SecuritySettings::default()
        };
        assert!(zero.validate().is_err());

        let bad_email = SecuritySettings {
            alert_email: Some("not-an-email".to_string()),
            ..SecuritySettings::default()
        };
        assert!(bad_email.validate().is_err());

        let good_email = SecuritySettings {
            alert_email: Some("ops@example.com".to_string()),
            ..SecuritySettings::default()
        };
        assert!(good_email.validate().is_ok());
    }
}
