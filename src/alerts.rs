//! Security monitor: threshold rules over recent security logs and email
//! alerts when they trip.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::security_log::EVENT_FAILED_LOGIN;
use crate::models::{SecurityLog, SecuritySettings};

const RESEND_EMAILS_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FailedLogins,
    SuspiciousIp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub kind: AlertKind,
    /// IP address for `suspicious_ip`, empty for `failed_logins`
    pub subject: String,
    pub count: u32,
    pub threshold: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpEventCount {
    pub ip_address: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub window_start: i64,
    pub window_end: i64,
    pub events_in_window: usize,
    pub failed_logins: u32,
    /// Per-IP counts, busiest first
    pub events_by_ip: Vec<IpEventCount>,
    pub alerts: Vec<SecurityAlert>,
}

/// Apply the threshold rules to the logs that fall inside the window
/// ending at `now`.
pub fn analyze(logs: &[SecurityLog], settings: &SecuritySettings, now: i64) -> SecurityReport {
    let window_start = now - settings.window_minutes * 60;
    let recent: Vec<&SecurityLog> = logs
        .iter()
        .filter(|l| l.created_at >= window_start && l.created_at <= now)
        .collect();

    let failed_logins = recent
        .iter()
        .filter(|l| l.event_type == EVENT_FAILED_LOGIN)
        .count() as u32;

    let mut per_ip: HashMap<&str, u32> = HashMap::new();
    for log in &recent {
        if let Some(ip) = log.ip_address.as_deref() {
            *per_ip.entry(ip).or_insert(0) += 1;
        }
    }
    let mut events_by_ip: Vec<IpEventCount> = per_ip
        .into_iter()
        .map(|(ip, count)| IpEventCount {
            ip_address: ip.to_string(),
            count,
        })
        .collect();
    events_by_ip.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip_address.cmp(&b.ip_address)));

    let mut alerts = Vec::new();
    if failed_logins >= settings.failed_login_threshold {
        alerts.push(SecurityAlert {
            kind: AlertKind::FailedLogins,
            subject: String::new(),
            count: failed_logins,
            threshold: settings.failed_login_threshold,
            message: format!(
                "{} failed logins in the last {} minutes",
                failed_logins, settings.window_minutes
            ),
        });
    }
    for entry in events_by_ip.iter().filter(|e| e.count >= settings.ip_event_threshold) {
        alerts.push(SecurityAlert {
            kind: AlertKind::SuspiciousIp,
            subject: entry.ip_address.clone(),
            count: entry.count,
            threshold: settings.ip_event_threshold,
            message: format!(
                "{} security events from {} in the last {} minutes",
                entry.count, entry.ip_address, settings.window_minutes
            ),
        });
    }

    SecurityReport {
        window_start,
        window_end: now,
        events_in_window: recent.len(),
        failed_logins,
        events_by_ip,
        alerts,
    }
}

/// Subject and plain-text body of the alert email
pub fn render_alert_email(report: &SecurityReport) -> (String, String) {
    let subject = format!("Security alert: {} issue(s) detected", report.alerts.len());
    let mut body = String::from("The security monitor detected the following:\n\n");
    for alert in &report.alerts {
        body.push_str("- ");
        body.push_str(&alert.message);
        body.push('\n');
    }
    body.push_str(&format!(
        "\n{} events in window, {} failed logins.\n",
        report.events_in_window, report.failed_logins
    ));
    (subject, body)
}

/// Delivery of alert emails
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Sends alerts through the Resend transactional email API
pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendNotifier {
    pub fn new(client: reqwest::Client, api_key: String, from: String) -> Self {
        Self { client, api_key, from }
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send_alert(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(RESEND_EMAILS_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [to],
                "subject": subject,
                "text": body,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Function {
                function: "resend".to_string(),
                message: format!("{}: {}", status, text),
            });
        }

        tracing::info!(%to, "Security alert email sent");
        Ok(())
    }
}

/// Fallback when no email provider is configured: alerts only reach the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_alert(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        tracing::warn!(%to, %subject, "Security alert (email delivery not configured): {}", body);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorOutcome {
    pub report: SecurityReport,
    pub notified: bool,
    /// Why the alert email could not be delivered
    pub delivery_error: Option<String>,
}

/// Analyze and, when alerts fire and alerting is on, email the summary.
///
/// A delivery failure is logged and reported in the outcome; the report is
/// still returned.
pub async fn run_security_monitor(
    logs: &[SecurityLog],
    settings: &SecuritySettings,
    now: i64,
    notifier: &dyn Notifier,
) -> MonitorOutcome {
    let report = analyze(logs, settings, now);

    let recipient = settings.alert_email.as_deref().filter(|_| settings.alerts_enabled);
    let mut delivery_error = None;
    let notified = match recipient {
        Some(to) if !report.alerts.is_empty() => {
            let (subject, body) = render_alert_email(&report);
            match notifier.send_alert(to, &subject, &body).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(%to, error = %e, "Failed to deliver security alert");
                    delivery_error = Some(e.to_string());
                    false
                }
            }
        }
        _ => false,
    };

    if !report.alerts.is_empty() {
        tracing::warn!(
            alerts = report.alerts.len(),
            failed_logins = report.failed_logins,
            notified,
            "Security monitor raised alerts"
        );
    } else {
        tracing::debug!(events = report.events_in_window, "Security monitor found nothing");
    }

    MonitorOutcome {
        report,
        notified,
        delivery_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const NOW: i64 = 1_700_000_000;

    fn log(event_type: &str, ip: Option<&str>, age_secs: i64) -> SecurityLog {
        SecurityLog {
            id: format!("{}-{}", event_type, age_secs),
            event_type: event_type.to_string(),
            ip_address: ip.map(str::to_string),
            user_id: None,
            details: String::new(),
            created_at: NOW - age_secs,
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_alert(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
            self.sent.lock().unwrap().push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_failed_login_threshold() {
        let settings = SecuritySettings::default();
        let below: Vec<_> = (0..4).map(|i| log("failed_login", None, i * 10)).collect();
        assert!(analyze(&below, &settings, NOW).alerts.is_empty());

        let at: Vec<_> = (0..5).map(|i| log("failed_login", None, i * 10)).collect();
        let report = analyze(&at, &settings, NOW);
        assert_eq!(report.failed_logins, 5);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].kind, AlertKind::FailedLogins);
    }

    #[test]
    fn test_events_outside_window_are_ignored() {
        let settings = SecuritySettings::default();
        let logs: Vec<_> = (0..10).map(|_| log("failed_login", None, 2 * 3600)).collect();
        let report = analyze(&logs, &settings, NOW);
        assert_eq!(report.events_in_window, 0);
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn test_per_ip_threshold_and_ordering() {
        let settings = SecuritySettings {
            ip_event_threshold: 3,
            failed_login_threshold: 100,
            ..SecuritySettings::default()
        };
        let mut logs = Vec::new();
        for i in 0..4 {
            logs.push(log("login", Some("198.51.100.2"), i));
        }
        for i in 0..3 {
            logs.push(log("password_reset", Some("198.51.100.1"), i));
        }
        logs.push(log("login", Some("203.0.113.9"), 1));
        logs.push(log("login", None, 1));

        let report = analyze(&logs, &settings, NOW);
        assert_eq!(report.events_in_window, 9);
        assert_eq!(report.events_by_ip[0].ip_address, "198.51.100.2");
        assert_eq!(report.events_by_ip.len(), 3);

        let flagged: Vec<&str> = report.alerts.iter().map(|a| a.subject.as_str()).collect();
        assert_eq!(flagged, vec!["198.51.100.2", "198.51.100.1"]);
        assert!(report.alerts.iter().all(|a| a.kind == AlertKind::SuspiciousIp));
    }

    #[tokio::test]
    async fn test_run_notifies_when_alerts_fire() {
        let settings = SecuritySettings {
            alert_email: Some("ops@example.com".to_string()),
            ..SecuritySettings::default()
        };
        let logs: Vec<_> = (0..6).map(|i| log("failed_login", None, i)).collect();
        let notifier = RecordingNotifier::default();

        let outcome = run_security_monitor(&logs, &settings, NOW, &notifier).await;

        assert!(outcome.notified);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ops@example.com");
    }

    #[tokio::test]
    async fn test_run_skips_notification_when_disabled() {
        let settings = SecuritySettings {
            alerts_enabled: false,
            alert_email: Some("ops@example.com".to_string()),
            ..SecuritySettings::default()
        };
        let logs: Vec<_> = (0..6).map(|i| log("failed_login", None, i)).collect();
        let notifier = RecordingNotifier::default();

        let outcome = run_security_monitor(&logs, &settings, NOW, &notifier).await;

        assert!(!outcome.notified);
        assert_eq!(outcome.report.alerts.len(), 1);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send_alert(&self, _to: &str, _subject: &str, _body: &str) -> Result<()> {
            Err(AppError::Function {
                function: "resend".to_string(),
                message: "HTTP 500".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_report() {
        let settings = SecuritySettings {
            alert_email: Some("ops@example.com".to_string()),
            ..SecuritySettings::default()
        };
        let logs: Vec<_> = (0..6).map(|i| log("failed_login", None, i)).collect();

        let outcome = run_security_monitor(&logs, &settings, NOW, &FailingNotifier).await;

        assert!(!outcome.notified);
        assert_eq!(outcome.report.alerts.len(), 1);
        assert!(outcome.delivery_error.unwrap().contains("HTTP 500"));
    }

    #[test]
    fn test_render_alert_email() {
        let logs: Vec<_> = (0..5).map(|i| log("failed_login", None, i)).collect();
        let report = analyze(&logs, &SecuritySettings::default(), NOW);
        let (subject, body) = render_alert_email(&report);
        assert!(subject.contains("1 issue"));
        assert!(body.contains("5 failed logins in the last 60 minutes"));
    }
}
