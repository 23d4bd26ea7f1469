use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::health::HealthReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Deployed,
    Failed,
    Terminated,
}

/// A deployed author site running on one cloud instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    /// Cloud instance id, known once the instance is created
    pub instance_id: Option<String>,
    pub public_ip: Option<String>,
    pub region: String,
    pub status: DeploymentStatus,
    /// Human-readable log, newest line last
    pub log: Vec<String>,
    /// When the record was created (Unix timestamp)
    pub created_at: i64,
    /// When the application last finished deploying (Unix timestamp)
    pub last_deployed_at: Option<i64>,
    pub last_health: Option<HealthReport>,
}

impl Deployment {
    /// Timestamp the install grace period is measured from
    pub fn deployed_since(&self) -> i64 {
        self.last_deployed_at.unwrap_or(self.created_at)
    }

    /// Whether there is anything to poll
    pub fn is_monitorable(&self) -> bool {
        self.instance_id.is_some() && self.status != DeploymentStatus::Terminated
    }

    /// Append lines, keeping only the newest `max_lines`
    pub fn append_log(&mut self, lines: impl IntoIterator<Item = String>, max_lines: usize) {
        self.log.extend(lines);
        if self.log.len() > max_lines {
            let excess = self.log.len() - max_lines;
            self.log.drain(..excess);
        }
    }

    pub fn validate_name(name: &str) -> bool {
        let trimmed = name.trim();
        !trimmed.is_empty() && trimmed.len() <= 100
    }

    /// AWS style region, e.g. `us-east-1`
    pub fn validate_region(region: &str) -> bool {
        let parts: Vec<&str> = region.split('-').collect();
        parts.len() >= 3
            && parts.iter().all(|p| !p.is_empty())
            && parts[..parts.len() - 1]
                .iter()
                .all(|p| p.chars().all(|c| c.is_ascii_lowercase()))
            && parts[parts.len() - 1].chars().all(|c| c.is_ascii_digit())
    }

    /// EC2 instance ids are `i-` followed by 8 or 17 hex characters
    pub fn validate_instance_id(id: &str) -> bool {
        match id.strip_prefix("i-") {
            Some(rest) => {
                (rest.len() == 8 || rest.len() == 17) && rest.chars().all(|c| c.is_ascii_hexdigit())
            }
            None => false,
        }
    }

    pub fn validate_public_ip(ip: &str) -> bool {
        ip.parse::<IpAddr>().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Deployment {
        Deployment {
            id: "abc".to_string(),
            name: "site".to_string(),
            instance_id: None,
            public_ip: None,
            region: "us-east-1".to_string(),
            status: DeploymentStatus::Pending,
            log: vec![],
            created_at: 1_000,
            last_deployed_at: None,
            last_health: None,
        }
    }

    #[test]
    fn test_validate_region() {
        assert!(Deployment::validate_region("us-east-1"));
        assert!(Deployment::validate_region("ap-southeast-2"));
        assert!(Deployment::validate_region("us-gov-west-1"));
        assert!(!Deployment::validate_region("useast1"));
        assert!(!Deployment::validate_region("us-east-x"));
        assert!(!Deployment::validate_region("US-EAST-1"));
    }

    #[test]
    fn test_validate_instance_id() {
        assert!(Deployment::validate_instance_id("i-0123abcd"));
        assert!(Deployment::validate_instance_id("i-0123456789abcdef0"));
        assert!(!Deployment::validate_instance_id("i-xyz"));
        assert!(!Deployment::validate_instance_id("0123456789abcdef0"));
    }

    #[test]
    fn test_validate_public_ip() {
        assert!(Deployment::validate_public_ip("54.12.1.9"));
        assert!(!Deployment::validate_public_ip("example.com"));
    }

    #[test]
    fn test_append_log_truncates_oldest() {
        let mut deployment = sample();
        deployment.append_log((0..5).map(|i| i.to_string()), 3);
        assert_eq!(deployment.log, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_deployed_since_prefers_last_deploy() {
        let mut deployment = sample();
        assert_eq!(deployment.deployed_since(), 1_000);
        deployment.last_deployed_at = Some(2_000);
        assert_eq!(deployment.deployed_since(), 2_000);
    }

    #[test]
    fn test_is_monitorable() {
        let mut deployment = sample();
        assert!(!deployment.is_monitorable());
        deployment.instance_id = Some("i-0123abcd".to_string());
        assert!(deployment.is_monitorable());
        deployment.status = DeploymentStatus::Terminated;
        assert!(!deployment.is_monitorable());
    }
}
