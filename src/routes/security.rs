use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::alerts::{run_security_monitor, MonitorOutcome};
use crate::constants::MAX_SECURITY_LOGS_LISTED;
use crate::db::{self, tables};
use crate::error::{AppError, Result};
use crate::models::{SecurityLog, SecuritySettings};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSecurityLogRequest {
    pub event_type: String,
    pub ip_address: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct RecordSecurityLogResponse {
    pub success: bool,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListLogsParams {
    pub limit: Option<usize>,
}

async fn load_security_settings(state: &AppState) -> Result<SecuritySettings> {
    let db = state.db.clone();
    let settings = tokio::task::spawn_blocking(move || {
        db::get_record::<SecuritySettings>(&db, tables::SETTINGS, tables::SECURITY_SETTINGS_KEY)
    })
    .await??;
    Ok(settings.unwrap_or_default())
}

/// Logs created at or after `since` (Unix seconds), oldest first
async fn load_security_logs_since(state: &AppState, since: i64) -> Result<Vec<SecurityLog>> {
    let db = state.db.clone();
    let start = db::time_ordered_key(since.saturating_mul(1000), "");
    tokio::task::spawn_blocking(move || db::list_records_from::<SecurityLog>(&db, tables::SECURITY_LOGS, &start))
        .await?
}

/// Append a security event
pub async fn record_security_log(
    State(state): State<AppState>,
    Json(payload): Json<RecordSecurityLogRequest>,
) -> Result<Json<RecordSecurityLogResponse>> {
    if !SecurityLog::validate_event_type(&payload.event_type) {
        return Err(AppError::InvalidInput(
            "Event type must be 1-64 lowercase letters, digits or '_'".to_string(),
        ));
    }
    if payload.details.len() > 4_000 {
        return Err(AppError::PayloadTooLarge);
    }

    let now = state.clock.now();
    let log = SecurityLog {
        id: db::new_id(&payload.event_type),
        event_type: payload.event_type,
        ip_address: payload.ip_address.filter(|ip| !ip.trim().is_empty()),
        user_id: payload.user_id,
        details: payload.details,
        created_at: now.timestamp(),
    };

    let key = db::time_ordered_key(now.timestamp_millis(), &log.id);
    let id = log.id.clone();
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || db::put_record(&db, tables::SECURITY_LOGS, &key, &log)).await??;

    tracing::debug!(log_id = %id, "Security event recorded");

    Ok(Json(RecordSecurityLogResponse { success: true, id }))
}

/// Most recent security logs, newest first
pub async fn list_security_logs(
    State(state): State<AppState>,
    Query(params): Query<ListLogsParams>,
) -> Result<Json<Vec<SecurityLog>>> {
    let limit = params
        .limit
        .unwrap_or(MAX_SECURITY_LOGS_LISTED)
        .min(MAX_SECURITY_LOGS_LISTED);

    let db = state.db.clone();
    let logs = tokio::task::spawn_blocking(move || {
        db::list_latest_records::<SecurityLog>(&db, tables::SECURITY_LOGS, limit)
    })
    .await??;
    Ok(Json(logs))
}

pub async fn get_security_settings(State(state): State<AppState>) -> Result<Json<SecuritySettings>> {
    Ok(Json(load_security_settings(&state).await?))
}

pub async fn update_security_settings(
    State(state): State<AppState>,
    Json(settings): Json<SecuritySettings>,
) -> Result<Json<SecuritySettings>> {
    settings.validate().map_err(AppError::InvalidInput)?;

    let db = state.db.clone();
    let stored = settings.clone();
    tokio::task::spawn_blocking(move || {
        db::put_record(&db, tables::SETTINGS, tables::SECURITY_SETTINGS_KEY, &stored)
    })
    .await??;

    tracing::info!(
        failed_login_threshold = settings.failed_login_threshold,
        ip_event_threshold = settings.ip_event_threshold,
        "Security settings updated"
    );

    Ok(Json(settings))
}

/// Run the security monitor over the current window
pub async fn run_monitor(State(state): State<AppState>) -> Result<Json<MonitorOutcome>> {
    let settings = load_security_settings(&state).await?;
    let now = state.now();
    let logs = load_security_logs_since(&state, now - settings.window_minutes * 60).await?;

    let started = Utc::now();
    let outcome = run_security_monitor(&logs, &settings, now, state.notifier.as_ref()).await;

    tracing::info!(
        alerts = outcome.report.alerts.len(),
        notified = outcome.notified,
        elapsed_ms = (Utc::now() - started).num_milliseconds(),
        "Security monitor run complete"
    );

    Ok(Json(outcome))
}
