//! Health monitor: one background polling task per deployment.
//!
//! Each task re-runs [`poll_once`] on a fixed interval, caches the latest
//! report in memory and persists it on the deployment record. Starting a
//! monitor for a deployment that already has one replaces the old task, so
//! a deployment is never polled by two loops at once.

pub mod clock;
pub mod source;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::db::{self, tables, Db};
use crate::error::{AppError, Result};
use crate::health::{classify, unknown_report, HealthReport, HealthSignals};
use crate::models::Deployment;

pub use clock::{Clock, ManualClock, SystemClock};
pub use source::{FunctionStatusSource, RemoteStatus, StatusSource, UnconfiguredSource};

/// Outcome of one poll
#[derive(Debug, Clone)]
pub struct PollResult {
    pub report: HealthReport,
    /// Public IP discovered during the poll
    pub public_ip: Option<String>,
}

/// Fetch the remote status of one deployment and classify it.
///
/// A failed fetch never propagates: it turns into the all-unknown report.
pub async fn poll_once(deployment: &Deployment, source: &dyn StatusSource, clock: &dyn Clock) -> PollResult {
    let now = clock.now();

    match source.fetch(deployment).await {
        Ok(remote) => {
            let age_secs = (now.timestamp() - deployment.deployed_since()).max(0);
            let signals = HealthSignals {
                is_running: remote.is_running,
                system_ok: remote.system_ok,
                instance_ok: remote.instance_ok,
                http_ok: remote.http_ok,
                response_time_ms: remote.response_time_ms,
                deployment_age_minutes: age_secs as f64 / 60.0,
            };
            PollResult {
                report: classify(&signals, now),
                public_ip: remote.public_ip,
            }
        }
        Err(e) => {
            debug!(deployment_id = %deployment.id, error = %e, "status fetch failed");
            PollResult {
                report: unknown_report(&e.to_string(), now),
                public_ip: None,
            }
        }
    }
}

/// Per-deployment monitor state.
struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Shared pieces each polling task needs
#[derive(Clone)]
struct PollContext {
    db: Db,
    source: Arc<dyn StatusSource>,
    clock: Arc<dyn Clock>,
    latest: Arc<RwLock<HashMap<String, HealthReport>>>,
}

impl PollContext {
    async fn load(&self, deployment_id: &str) -> Result<Option<Deployment>> {
        let db = self.db.clone();
        let id = deployment_id.to_string();
        tokio::task::spawn_blocking(move || db::get_record(&db, tables::DEPLOYMENTS, &id)).await?
    }

    async fn poll_and_store(&self, deployment: &Deployment) -> Result<HealthReport> {
        let result = poll_once(deployment, self.source.as_ref(), self.clock.as_ref()).await;

        self.latest
            .write()
            .await
            .insert(deployment.id.clone(), result.report.clone());

        let db = self.db.clone();
        let id = deployment.id.clone();
        let report = result.report.clone();
        let discovered_ip = result.public_ip;
        tokio::task::spawn_blocking(move || {
            db::update_record(&db, tables::DEPLOYMENTS, &id, |d: &mut Deployment| {
                d.last_health = Some(report);
                if d.public_ip.is_none() {
                    d.public_ip = discovered_ip;
                }
                Ok(())
            })
        })
        .await??;

        Ok(result.report)
    }
}

/// Manages health polling for all monitored deployments.
pub struct HealthMonitor {
    ctx: PollContext,
    interval: Duration,
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
}

impl HealthMonitor {
    pub fn new(db: Db, source: Arc<dyn StatusSource>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            ctx: PollContext {
                db,
                source,
                clock,
                latest: Arc::new(RwLock::new(HashMap::new())),
            },
            interval,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.ctx.clock
    }

    /// Start polling a deployment, replacing any existing monitor for it.
    pub async fn start_monitor(&self, deployment_id: &str) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = self.ctx.clone();
        let interval = self.interval;
        let id = deployment_id.to_string();
        let monitors = self.monitors.clone();

        let handle = tokio::spawn(async move {
            run_poll_loop(&id, ctx, interval, shutdown_rx).await;
            // Drop our own slot once the loop ends on its own. A replaced
            // slot belongs to a newer task and must be left alone.
            let mut monitors = monitors.write().await;
            if monitors.get(&id).map(|slot| slot.shutdown_tx.is_closed()) == Some(true) {
                monitors.remove(&id);
            }
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            deployment_id.to_string(),
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(%deployment_id, interval_secs = self.interval.as_secs(), "health monitor started");
    }

    /// Stop polling a deployment. Returns whether a monitor was running.
    pub async fn stop_monitor(&self, deployment_id: &str) -> bool {
        let mut monitors = self.monitors.write().await;
        match monitors.remove(deployment_id) {
            Some(slot) => {
                let _ = slot.shutdown_tx.send(true);
                slot.handle.abort();
                info!(%deployment_id, "health monitor stopped");
                true
            }
            None => false,
        }
    }

    /// Stop all monitors (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (id, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(deployment_id = %id, "health monitor stopped");
        }
        info!("all health monitors stopped");
    }

    pub async fn active_monitors(&self) -> Vec<String> {
        let monitors = self.monitors.read().await;
        let mut ids: Vec<String> = monitors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_monitoring(&self, deployment_id: &str) -> bool {
        self.monitors.read().await.contains_key(deployment_id)
    }

    /// Latest report produced by a poll since startup
    pub async fn latest_report(&self, deployment_id: &str) -> Option<HealthReport> {
        self.ctx.latest.read().await.get(deployment_id).cloned()
    }

    /// Poll one deployment right now, outside the timer
    pub async fn check_now(&self, deployment_id: &str) -> Result<HealthReport> {
        let deployment = self
            .ctx
            .load(deployment_id)
            .await?
            .ok_or(AppError::NotFound("Deployment"))?;
        self.ctx.poll_and_store(&deployment).await
    }

    /// Forget the cached report, e.g. after the deployment is deleted
    pub async fn forget(&self, deployment_id: &str) {
        self.stop_monitor(deployment_id).await;
        self.ctx.latest.write().await.remove(deployment_id);
    }
}

/// The polling loop for a single deployment. Fixed interval, no backoff.
async fn run_poll_loop(deployment_id: &str, ctx: PollContext, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(%deployment_id, "health loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let deployment = match ctx.load(deployment_id).await {
                    Ok(Some(d)) if d.is_monitorable() => d,
                    Ok(_) => {
                        info!(%deployment_id, "deployment gone or not monitorable, ending health loop");
                        break;
                    }
                    Err(e) => {
                        error!(%deployment_id, error = %e, "failed to load deployment for health check");
                        continue;
                    }
                };

                if let Err(e) = ctx.poll_and_store(&deployment).await {
                    error!(%deployment_id, error = %e, "failed to store health report");
                }
            }
            _ = shutdown.changed() => {
                debug!(%deployment_id, "health loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthLevel;
    use crate::models::DeploymentStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    const DEPLOYED_AT: i64 = 1_700_000_000;

    struct FixedSource {
        status: Option<RemoteStatus>,
        calls: AtomicU32,
    }

    impl FixedSource {
        fn new(status: Option<RemoteStatus>) -> Self {
            Self {
                status,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl StatusSource for FixedSource {
        async fn fetch(&self, _deployment: &Deployment) -> Result<RemoteStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.status
                .clone()
                .ok_or_else(|| AppError::InvalidInput("unreachable".to_string()))
        }
    }

    fn remote(http_ok: bool, response_time_ms: Option<u64>) -> RemoteStatus {
        RemoteStatus {
            is_running: true,
            system_ok: true,
            instance_ok: true,
            http_ok,
            response_time_ms,
            public_ip: Some("54.0.0.1".to_string()),
        }
    }

    fn deployment() -> Deployment {
        Deployment {
            id: "dep1".to_string(),
            name: "site".to_string(),
            instance_id: Some("i-0123abcd".to_string()),
            public_ip: None,
            region: "us-east-1".to_string(),
            status: DeploymentStatus::Deployed,
            log: vec![],
            created_at: DEPLOYED_AT - 3600,
            last_deployed_at: Some(DEPLOYED_AT),
            last_health: None,
        }
    }

    #[tokio::test]
    async fn test_poll_once_uses_clock_for_age() {
        let source = FixedSource::new(Some(remote(false, None)));
        let clock = ManualClock::at_timestamp(DEPLOYED_AT + 120);

        let result = poll_once(&deployment(), &source, &clock).await;
        let web = result.report.component(crate::health::COMPONENT_WEB_SERVER).unwrap();
        assert_eq!(web.level, HealthLevel::Degraded);
        assert_eq!(web.remaining_minutes, Some(3));

        clock.advance(chrono::Duration::minutes(10));
        let result = poll_once(&deployment(), &source, &clock).await;
        let web = result.report.component(crate::health::COMPONENT_WEB_SERVER).unwrap();
        assert_eq!(web.level, HealthLevel::Unhealthy);
    }

    #[tokio::test]
    async fn test_poll_once_fetch_error_is_unknown() {
        let source = FixedSource::new(None);
        let clock = ManualClock::at_timestamp(DEPLOYED_AT);

        let result = poll_once(&deployment(), &source, &clock).await;
        assert_eq!(result.report.overall, HealthLevel::Unknown);
        assert!(result.public_ip.is_none());
    }

    fn monitor_with(source: Arc<dyn StatusSource>, temp_dir: &TempDir) -> HealthMonitor {
        let db = db::open_database(temp_dir.path().join("monitor.db")).unwrap();
        db::put_record(&db, tables::DEPLOYMENTS, "dep1", &deployment()).unwrap();
        HealthMonitor::new(
            db,
            source,
            Arc::new(ManualClock::at_timestamp(DEPLOYED_AT + 600)),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_check_now_persists_report_and_ip() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = monitor_with(Arc::new(FixedSource::new(Some(remote(true, Some(120))))), &temp_dir);

        let report = monitor.check_now("dep1").await.unwrap();
        assert_eq!(report.overall, HealthLevel::Healthy);
        assert_eq!(monitor.latest_report("dep1").await, Some(report.clone()));

        let stored: Deployment = db::get_record(&monitor.ctx.db, tables::DEPLOYMENTS, "dep1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_health, Some(report));
        assert_eq!(stored.public_ip.as_deref(), Some("54.0.0.1"));
    }

    #[tokio::test]
    async fn test_check_now_unknown_deployment() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = monitor_with(Arc::new(FixedSource::new(None)), &temp_dir);

        assert!(matches!(
            monitor.check_now("missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_polls_immediately_and_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(FixedSource::new(Some(remote(true, Some(50)))));
        let monitor = monitor_with(source.clone(), &temp_dir);

        monitor.start_monitor("dep1").await;
        monitor.start_monitor("dep1").await;
        assert_eq!(monitor.active_monitors().await, vec!["dep1".to_string()]);

        // The first tick fires immediately.
        for _ in 0..50 {
            if monitor.latest_report("dep1").await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(monitor.latest_report("dep1").await.is_some());
        assert!(source.calls.load(Ordering::SeqCst) >= 1);

        assert!(monitor.stop_monitor("dep1").await);
        assert!(!monitor.is_monitoring("dep1").await);
        assert!(!monitor.stop_monitor("dep1").await);
    }
}
