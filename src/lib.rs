//! Author Platform Operations Server Library
//!
//! Backend for the author platform admin: deployment records and health
//! monitoring, security-log alerting, cookie consent auditing and page
//! builder layout documents.

pub mod alerts;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod functions;
pub mod health;
pub mod models;
pub mod monitor;
pub mod progress;
pub mod routes;
pub mod security;

pub use config::Config;
pub use db::{open_database, Db};
pub use error::{AppError, Result};

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use alerts::{LogNotifier, Notifier, ResendNotifier};
use functions::FunctionClient;
use monitor::{Clock, FunctionStatusSource, HealthMonitor, StatusSource, SystemClock, UnconfiguredSource};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub monitor: Arc<HealthMonitor>,
    /// Present when `FUNCTIONS_BASE_URL` is configured
    pub functions: Option<FunctionClient>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    /// Wire production collaborators from the configuration
    pub fn new(db: Db, config: Config) -> Self {
        let http = reqwest::Client::new();

        let functions = config
            .functions_base_url
            .as_ref()
            .map(|url| FunctionClient::new(http.clone(), url.clone(), config.functions_api_key.clone()));

        let source: Arc<dyn StatusSource> = match &functions {
            Some(client) => Arc::new(FunctionStatusSource::new(
                client.clone(),
                http.clone(),
                config.http_probe_timeout(),
            )),
            None => {
                tracing::warn!("FUNCTIONS_BASE_URL not set; health checks will report unknown");
                Arc::new(UnconfiguredSource)
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.resend_api_key {
            Some(key) => Arc::new(ResendNotifier::new(http, key.clone(), config.alert_email_from.clone())),
            None => Arc::new(LogNotifier),
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::from_parts(db, config, clock, source, functions, notifier)
    }

    /// Assemble state from explicit collaborators (used by tests)
    pub fn from_parts(
        db: Db,
        config: Config,
        clock: Arc<dyn Clock>,
        source: Arc<dyn StatusSource>,
        functions: Option<FunctionClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let monitor = Arc::new(HealthMonitor::new(
            db.clone(),
            source,
            clock.clone(),
            config.health_poll_interval(),
        ));
        Self {
            db,
            config,
            clock,
            monitor,
            functions,
            notifier,
        }
    }

    /// Current Unix timestamp according to the injected clock
    pub fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }
}

/// All API routes
pub fn build_router(state: AppState) -> Router {
    use routes::*;

    Router::new()
        .route("/health", get(health_check))
        .route("/admin/stats", get(admin_stats))
        .route("/api/deployments", post(create_deployment).get(list_deployments))
        .route("/api/deployments/:id", get(get_deployment).delete(delete_deployment))
        .route("/api/deployments/:id/events", post(record_event))
        .route("/api/deployments/:id/progress", get(get_progress))
        .route("/api/deployments/:id/health", get(get_health))
        .route("/api/deployments/:id/monitor", post(start_monitoring).delete(stop_monitoring))
        .route("/api/deployments/:id/actions/:action", post(run_action))
        .route("/api/security/logs", post(record_security_log).get(list_security_logs))
        .route("/api/security/settings", get(get_security_settings).put(update_security_settings))
        .route("/api/security/monitor", post(run_monitor))
        .route("/api/cookies/categories", get(list_categories))
        .route("/api/cookies/categories/:id", put(upsert_category).delete(delete_category))
        .route("/api/cookies/settings", get(get_cookie_settings).put(update_cookie_settings))
        .route("/api/consent", post(record_consent))
        .route("/api/consent/stats", get(consent_stats))
        .route("/api/layouts/:kind", get(list_layouts))
        .route("/api/layouts/:kind/:id", put(put_layout).get(get_layout).delete(delete_layout))
        .with_state(state)
}
