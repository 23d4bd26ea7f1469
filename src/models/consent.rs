use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::DEFAULT_CONSENT_EXPIRY_DAYS;
use crate::models::rate_limit::ConsentLimits;

/// A group of cookies a visitor can opt into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieCategory {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Required categories are always on and cannot be deleted
    pub required: bool,
    pub enabled: bool,
}

impl CookieCategory {
    /// Category ids are slugs like `analytics`
    pub fn validate_id(id: &str) -> bool {
        !id.is_empty()
            && id.len() <= 64
            && id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    }
}

/// Consent banner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieSettings {
    pub banner_title: String,
    pub banner_message: String,
    pub privacy_policy_url: Option<String>,
    pub consent_expiry_days: u32,
    /// Per-visitor submission limits
    #[serde(default)]
    pub rate_limits: ConsentLimits,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            banner_title: "We use cookies".to_string(),
            banner_message: "We use cookies to improve your experience. Choose which categories you allow."
                .to_string(),
            privacy_policy_url: None,
            consent_expiry_days: DEFAULT_CONSENT_EXPIRY_DAYS,
            rate_limits: ConsentLimits::default(),
        }
    }
}

impl CookieSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.banner_title.trim().is_empty() || self.banner_title.len() > 200 {
            return Err("Banner title must be 1-200 characters".to_string());
        }
        if self.banner_message.len() > 2_000 {
            return Err("Banner message must be at most 2000 characters".to_string());
        }
        if !(1..=730).contains(&self.consent_expiry_days) {
            return Err("Consent expiry must be between 1 and 730 days".to_string());
        }
        self.rate_limits.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentChoice {
    AcceptAll,
    RejectAll,
    Custom,
}

/// Audit row recording one visitor's consent decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentLog {
    pub id: String,
    /// Peppered hash of the visitor identifier; the raw value is never stored
    pub visitor_hash: String,
    pub choice: ConsentChoice,
    /// Categories the visitor accepted
    pub categories: Vec<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsentStats {
    pub total: u64,
    pub accept_all: u64,
    pub reject_all: u64,
    pub custom: u64,
    /// category id -> number of consents that accepted it
    pub category_acceptance: BTreeMap<String, u64>,
}

impl ConsentStats {
    /// Aggregate counts from raw log rows
    pub fn from_logs(logs: &[ConsentLog]) -> Self {
        let mut stats = ConsentStats::default();
        for log in logs {
            stats.total += 1;
            match log.choice {
                ConsentChoice::AcceptAll => stats.accept_all += 1,
                ConsentChoice::RejectAll => stats.reject_all += 1,
                ConsentChoice::Custom => stats.custom += 1,
            }
            for category in &log.categories {
                *stats.category_acceptance.entry(category.clone()).or_insert(0) += 1;
            }
        }
        stats
    }
}

/// Resolve the categories a choice actually grants.
///
/// `accept_all` grants every enabled category, `reject_all` only the
/// required ones. `custom` keeps the requested enabled categories and always
/// adds the required ones. Unknown ids are an error.
pub fn resolve_categories(
    choice: ConsentChoice,
    requested: &[String],
    categories: &[CookieCategory],
) -> Result<Vec<String>, String> {
    let mut granted: Vec<String> = match choice {
        ConsentChoice::AcceptAll => categories
            .iter()
            .filter(|c| c.enabled || c.required)
            .map(|c| c.id.clone())
            .collect(),
        ConsentChoice::RejectAll => categories
            .iter()
            .filter(|c| c.required)
            .map(|c| c.id.clone())
            .collect(),
        ConsentChoice::Custom => {
            for id in requested {
                if !categories.iter().any(|c| &c.id == id) {
                    return Err(format!("Unknown cookie category: {}", id));
                }
            }
            categories
                .iter()
                .filter(|c| c.required || (c.enabled && requested.contains(&c.id)))
                .map(|c| c.id.clone())
                .collect()
        }
    };
    granted.sort();
    granted.dedup();
    Ok(granted)
}

/// Categories seeded on first use
pub fn default_categories() -> Vec<CookieCategory> {
    vec![
        CookieCategory {
            id: "necessary".to_string(),
            name: "Strictly necessary".to_string(),
            description: "Required for the site to function".to_string(),
            required: true,
            enabled: true,
        },
        CookieCategory {
            id: "analytics".to_string(),
            name: "Analytics".to_string(),
            description: "Help us understand how visitors use the site".to_string(),
            required: false,
            enabled: true,
        },
        CookieCategory {
            id: "marketing".to_string(),
            name: "Marketing".to_string(),
            description: "Used to show relevant offers for new books".to_string(),
            required: false,
            enabled: true,
        },
    ]
}
