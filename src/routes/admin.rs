use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::{
    db::{self, tables},
    error::Result,
    AppError, AppState,
};

/// Query parameters for admin stats endpoint
#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    /// Admin secret key for authentication
    pub key: String,
}

/// Database statistics response
#[derive(Debug, Serialize)]
pub struct AdminStatsResponse {
    pub deployment_count: u64,
    pub deployment_event_count: u64,
    pub security_log_count: u64,
    pub consent_log_count: u64,
    pub layout_count: u64,
    pub active_monitors: usize,
    pub database_size_bytes: u64,
    pub database_size_human: String,
}

/// Format bytes into human-readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Admin stats endpoint
///
/// GET /admin/stats?key=<admin_secret_key>
pub async fn admin_stats(
    State(state): State<AppState>,
    Query(params): Query<AdminQuery>,
) -> Result<Json<AdminStatsResponse>> {
    // Disabled unless ADMIN_SECRET_KEY is set
    let admin_key = state
        .config
        .admin_secret_key
        .as_ref()
        .ok_or(AppError::Unauthorized)?;

    if params.key != *admin_key {
        tracing::warn!("Invalid admin key attempt");
        return Err(AppError::Unauthorized);
    }

    let database_size_bytes = fs::metadata(&state.config.database_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let db = state.db.clone();
    let counts = tokio::task::spawn_blocking(move || -> Result<[u64; 5]> {
        Ok([
            db::count_records(&db, tables::DEPLOYMENTS)?,
            db::count_records(&db, tables::DEPLOYMENT_EVENTS)?,
            db::count_records(&db, tables::SECURITY_LOGS)?,
            db::count_records(&db, tables::CONSENT_LOGS)?,
            db::count_records(&db, tables::LAYOUTS)?,
        ])
    })
    .await??;
    let [deployment_count, deployment_event_count, security_log_count, consent_log_count, layout_count] =
        counts;

    let active_monitors = state.monitor.active_monitors().await.len();

    tracing::info!(
        "Admin stats requested: {} deployments, {} monitors, {} database",
        deployment_count,
        active_monitors,
        format_bytes(database_size_bytes)
    );

    Ok(Json(AdminStatsResponse {
        deployment_count,
        deployment_event_count,
        security_log_count,
        consent_log_count,
        layout_count,
        active_monitors,
        database_size_bytes,
        database_size_human: format_bytes(database_size_bytes),
    }))
}
