//! Deployment health classification
//!
//! Turns the raw signals gathered about a cloud instance into a coarse
//! overall label plus one status line per component. This is the single
//! authoritative copy of the threshold rules; both the on-demand check and
//! the background monitor go through [`classify`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{HEALTHY_RESPONSE_TIME_MS, INSTALL_GRACE_MINUTES};

pub const COMPONENT_INSTANCE: &str = "EC2 Instance";
pub const COMPONENT_SYSTEM: &str = "System Health";
pub const COMPONENT_INSTANCE_HEALTH: &str = "Instance Health";
pub const COMPONENT_WEB_SERVER: &str = "Web Server";
pub const COMPONENT_APPLICATION: &str = "Application";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Raw signals about one instance, as fetched from the status function
/// and the HTTP probe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSignals {
    pub is_running: bool,
    pub system_ok: bool,
    pub instance_ok: bool,
    pub http_ok: bool,
    pub response_time_ms: Option<u64>,
    pub deployment_age_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub level: HealthLevel,
    pub detail: String,
    /// Minutes left in the install grace period, when the level relies on it
    pub remaining_minutes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall: HealthLevel,
    pub components: Vec<ComponentStatus>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn component(&self, name: &str) -> Option<&ComponentStatus> {
        self.components.iter().find(|c| c.name == name)
    }
}

fn component(name: &str, level: HealthLevel, detail: impl Into<String>) -> ComponentStatus {
    ComponentStatus {
        name: name.to_string(),
        level,
        detail: detail.into(),
        remaining_minutes: None,
    }
}

/// Whole minutes left before the install grace period runs out, rounded up
fn remaining_grace_minutes(age_minutes: f64) -> u64 {
    (INSTALL_GRACE_MINUTES - age_minutes.max(0.0)).ceil().max(0.0) as u64
}

/// Classify a set of signals. Pure: the same signals and timestamp always
/// yield the same report.
pub fn classify(signals: &HealthSignals, checked_at: DateTime<Utc>) -> HealthReport {
    let in_grace = signals.deployment_age_minutes < INSTALL_GRACE_MINUTES;
    let mut components = Vec::with_capacity(5);

    components.push(if signals.is_running {
        component(COMPONENT_INSTANCE, HealthLevel::Healthy, "Instance is running")
    } else {
        component(COMPONENT_INSTANCE, HealthLevel::Unhealthy, "Instance is not running")
    });

    components.push(if signals.system_ok {
        component(COMPONENT_SYSTEM, HealthLevel::Healthy, "System status checks passed")
    } else {
        component(COMPONENT_SYSTEM, HealthLevel::Degraded, "System status checks failing")
    });

    components.push(if signals.instance_ok {
        component(COMPONENT_INSTANCE_HEALTH, HealthLevel::Healthy, "Instance status checks passed")
    } else {
        component(COMPONENT_INSTANCE_HEALTH, HealthLevel::Degraded, "Instance status checks failing")
    });

    components.push(if signals.http_ok {
        component(COMPONENT_WEB_SERVER, HealthLevel::Healthy, "Responding to HTTP requests")
    } else if in_grace {
        let remaining = remaining_grace_minutes(signals.deployment_age_minutes);
        ComponentStatus {
            remaining_minutes: Some(remaining),
            ..component(
                COMPONENT_WEB_SERVER,
                HealthLevel::Degraded,
                format!("Still installing (~{} min remaining)", remaining),
            )
        }
    } else {
        component(COMPONENT_WEB_SERVER, HealthLevel::Unhealthy, "Not responding to HTTP requests")
    });

    components.push(match (signals.http_ok, signals.response_time_ms) {
        (true, Some(ms)) if ms < HEALTHY_RESPONSE_TIME_MS => component(
            COMPONENT_APPLICATION,
            HealthLevel::Healthy,
            format!("Responding in {} ms", ms),
        ),
        (true, Some(ms)) => component(
            COMPONENT_APPLICATION,
            HealthLevel::Degraded,
            format!("Slow response ({} ms)", ms),
        ),
        (true, None) => component(
            COMPONENT_APPLICATION,
            HealthLevel::Degraded,
            "Responding, response time not measured",
        ),
        (false, _) if in_grace => component(
            COMPONENT_APPLICATION,
            HealthLevel::Degraded,
            "Waiting for deployment to finish",
        ),
        (false, _) => component(COMPONENT_APPLICATION, HealthLevel::Unknown, "Application unreachable"),
    });

    let overall = if signals.is_running && signals.system_ok && signals.instance_ok && signals.http_ok {
        HealthLevel::Healthy
    } else if signals.is_running && (signals.system_ok || signals.instance_ok) {
        HealthLevel::Degraded
    } else {
        HealthLevel::Unhealthy
    };

    HealthReport {
        overall,
        components,
        checked_at,
    }
}

/// Report used when the remote status could not be fetched at all
pub fn unknown_report(reason: &str, checked_at: DateTime<Utc>) -> HealthReport {
    let components = [
        COMPONENT_INSTANCE,
        COMPONENT_SYSTEM,
        COMPONENT_INSTANCE_HEALTH,
        COMPONENT_WEB_SERVER,
        COMPONENT_APPLICATION,
    ]
    .into_iter()
    .map(|name| component(name, HealthLevel::Unknown, format!("Status unavailable: {}", reason)))
    .collect();

    HealthReport {
        overall: HealthLevel::Unknown,
        components,
        checked_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(
        is_running: bool,
        system_ok: bool,
        instance_ok: bool,
        http_ok: bool,
        response_time_ms: Option<u64>,
        deployment_age_minutes: f64,
    ) -> HealthSignals {
        HealthSignals {
            is_running,
            system_ok,
            instance_ok,
            http_ok,
            response_time_ms,
            deployment_age_minutes,
        }
    }

    fn level(report: &HealthReport, name: &str) -> HealthLevel {
        report.component(name).unwrap().level
    }

    /// Every combination of the boolean signals
    fn all_flag_combinations() -> impl Iterator<Item = (bool, bool, bool, bool)> {
        (0u8..16).map(|bits| (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0))
    }

    #[test]
    fn test_all_healthy() {
        let report = classify(&signals(true, true, true, true, Some(500), 10.0), Utc::now());

        assert_eq!(report.overall, HealthLevel::Healthy);
        assert_eq!(report.components.len(), 5);
        assert!(report.components.iter().all(|c| c.level == HealthLevel::Healthy));
    }

    #[test]
    fn test_fresh_deployment_with_failing_system_check() {
        let report = classify(&signals(true, false, true, false, None, 2.0), Utc::now());

        assert_eq!(report.overall, HealthLevel::Degraded);

        let web = report.component(COMPONENT_WEB_SERVER).unwrap();
        assert_eq!(web.level, HealthLevel::Degraded);
        assert_eq!(web.remaining_minutes, Some(3));
        assert!(web.detail.contains("~3 min remaining"));

        assert_eq!(level(&report, COMPONENT_APPLICATION), HealthLevel::Degraded);
        assert_eq!(level(&report, COMPONENT_SYSTEM), HealthLevel::Degraded);
    }

    #[test]
    fn test_stopped_instance_is_always_unhealthy() {
        for (system_ok, instance_ok, http_ok, _) in all_flag_combinations() {
            for age in [0.0, 4.9, 5.0, 120.0] {
                for rt in [None, Some(10), Some(5_000)] {
                    let report = classify(&signals(false, system_ok, instance_ok, http_ok, rt, age), Utc::now());
                    assert_eq!(report.overall, HealthLevel::Unhealthy);
                    assert_eq!(level(&report, COMPONENT_INSTANCE), HealthLevel::Unhealthy);
                }
            }
        }
    }

    #[test]
    fn test_fast_response_means_healthy_application() {
        for (is_running, system_ok, instance_ok, _) in all_flag_combinations() {
            for age in [0.0, 3.0, 30.0] {
                for rt in [0, 1, 1_999] {
                    let report = classify(
                        &signals(is_running, system_ok, instance_ok, true, Some(rt), age),
                        Utc::now(),
                    );
                    assert_eq!(level(&report, COMPONENT_APPLICATION), HealthLevel::Healthy);
                }
            }
        }
    }

    #[test]
    fn test_unreachable_after_grace_is_unhealthy_web_server() {
        for (is_running, system_ok, instance_ok, _) in all_flag_combinations() {
            for age in [5.0, 5.5, 60.0] {
                let report = classify(
                    &signals(is_running, system_ok, instance_ok, false, None, age),
                    Utc::now(),
                );
                let web = report.component(COMPONENT_WEB_SERVER).unwrap();
                assert_eq!(web.level, HealthLevel::Unhealthy);
                assert_eq!(web.remaining_minutes, None);
                assert_eq!(level(&report, COMPONENT_APPLICATION), HealthLevel::Unknown);
            }
        }
    }

    #[test]
    fn test_slow_response_degrades_application_only() {
        let report = classify(&signals(true, true, true, true, Some(2_000), 30.0), Utc::now());

        assert_eq!(report.overall, HealthLevel::Healthy);
        assert_eq!(level(&report, COMPONENT_WEB_SERVER), HealthLevel::Healthy);
        assert_eq!(level(&report, COMPONENT_APPLICATION), HealthLevel::Degraded);
    }

    #[test]
    fn test_both_status_checks_failing_is_unhealthy() {
        let report = classify(&signals(true, false, false, true, Some(100), 30.0), Utc::now());
        assert_eq!(report.overall, HealthLevel::Unhealthy);
    }

    #[test]
    fn test_grace_remaining_rounds_up() {
        assert_eq!(remaining_grace_minutes(0.0), 5);
        assert_eq!(remaining_grace_minutes(2.0), 3);
        assert_eq!(remaining_grace_minutes(4.2), 1);
        assert_eq!(remaining_grace_minutes(-1.0), 5);
    }

    #[test]
    fn test_unknown_report() {
        let report = unknown_report("timeout", Utc::now());
        assert_eq!(report.overall, HealthLevel::Unknown);
        assert_eq!(report.components.len(), 5);
        assert!(report.components.iter().all(|c| c.level == HealthLevel::Unknown));
    }
}
