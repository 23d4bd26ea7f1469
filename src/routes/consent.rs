use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::{self, tables};
use crate::error::{AppError, Result};
use crate::models::consent::{default_categories, resolve_categories};
use crate::models::{
    ConsentChoice, ConsentLog, ConsentStats, CookieCategory, CookieSettings, RateLimitRecord,
};
use crate::security::hash_visitor_id;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UpsertCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct DeleteCategoryResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordConsentRequest {
    /// Browser-side identifier; falls back to the forwarded client IP
    pub visitor_id: Option<String>,
    pub choice: ConsentChoice,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordConsentResponse {
    pub success: bool,
    pub categories: Vec<String>,
    #[serde(rename = "expiresAt")]
    pub expires_at: String,
}

/// Load categories, seeding the defaults the first time
fn load_or_seed_categories(db: &redb::Database) -> Result<Vec<CookieCategory>> {
    let categories: Vec<CookieCategory> = db::list_records(db, tables::COOKIE_CATEGORIES)?;
    if !categories.is_empty() {
        return Ok(categories);
    }

    let defaults = default_categories();
    for category in &defaults {
        db::put_record(db, tables::COOKIE_CATEGORIES, &category.id, category)?;
    }
    tracing::info!("Seeded default cookie categories");
    Ok(defaults)
}

pub async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<CookieCategory>>> {
    let db = state.db.clone();
    let categories = tokio::task::spawn_blocking(move || load_or_seed_categories(&db)).await??;
    Ok(Json(categories))
}

/// Create or replace a cookie category
pub async fn upsert_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpsertCategoryRequest>,
) -> Result<Json<CookieCategory>> {
    if !CookieCategory::validate_id(&id) {
        return Err(AppError::InvalidInput(
            "Category id must be 1-64 lowercase letters, digits, '-' or '_'".to_string(),
        ));
    }
    if payload.name.trim().is_empty() || payload.name.len() > 100 {
        return Err(AppError::InvalidInput("Category name must be 1-100 characters".to_string()));
    }

    let category = CookieCategory {
        id,
        name: payload.name.trim().to_string(),
        description: payload.description,
        required: payload.required,
        // Required categories cannot be switched off.
        enabled: payload.enabled || payload.required,
    };

    let db = state.db.clone();
    let stored = category.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        load_or_seed_categories(&db)?;
        db::put_record(&db, tables::COOKIE_CATEGORIES, &stored.id, &stored)
    })
    .await??;

    tracing::info!(category = %category.id, "Cookie category saved");
    Ok(Json(category))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteCategoryResponse>> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let categories = load_or_seed_categories(&db)?;
        match categories.iter().find(|c| c.id == id) {
            None => Err(AppError::NotFound("Cookie category")),
            Some(c) if c.required => Err(AppError::InvalidInput(
                "Required categories cannot be deleted".to_string(),
            )),
            Some(_) => {
                db::remove_record(&db, tables::COOKIE_CATEGORIES, &id)?;
                Ok(())
            }
        }
    })
    .await??;

    Ok(Json(DeleteCategoryResponse { success: true }))
}

pub async fn get_cookie_settings(State(state): State<AppState>) -> Result<Json<CookieSettings>> {
    let db = state.db.clone();
    let settings = tokio::task::spawn_blocking(move || {
        db::get_record::<CookieSettings>(&db, tables::SETTINGS, tables::COOKIE_SETTINGS_KEY)
    })
    .await??;
    Ok(Json(settings.unwrap_or_default()))
}

pub async fn update_cookie_settings(
    State(state): State<AppState>,
    Json(settings): Json<CookieSettings>,
) -> Result<Json<CookieSettings>> {
    settings.validate().map_err(AppError::InvalidInput)?;

    let db = state.db.clone();
    let stored = settings.clone();
    tokio::task::spawn_blocking(move || {
        db::put_record(&db, tables::SETTINGS, tables::COOKIE_SETTINGS_KEY, &stored)
    })
    .await??;

    Ok(Json(settings))
}

/// First hop of `X-Forwarded-For`
fn forwarded_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Record a visitor's consent choice
///
/// # Privacy
/// - The visitor identifier is peppered and hashed before storage
/// - Per-visitor rate limits come from the cookie settings (default 5/hour, 20/day)
pub async fn record_consent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RecordConsentRequest>,
) -> Result<Json<RecordConsentResponse>> {
    let visitor = payload
        .visitor_id
        .clone()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| forwarded_client_ip(&headers))
        .ok_or_else(|| AppError::InvalidInput("A visitor identifier is required".to_string()))?;
    if visitor.len() > 256 {
        return Err(AppError::InvalidInput("Visitor identifier too long".to_string()));
    }

    let visitor_hash = hash_visitor_id(&visitor, &state.config.visitor_id_pepper);
    let now = state.clock.now();
    let db = state.db.clone();

    let (granted, expiry_days) = tokio::task::spawn_blocking(move || -> Result<(Vec<String>, u32)> {
        let categories = load_or_seed_categories(&db)?;
        let granted = resolve_categories(payload.choice, &payload.categories, &categories)
            .map_err(AppError::InvalidInput)?;
        let settings: CookieSettings =
            db::get_record(&db, tables::SETTINGS, tables::COOKIE_SETTINGS_KEY)?.unwrap_or_default();

        let write_txn = db.begin_write()?;
        {
            let mut rate_limits = write_txn.open_table(tables::RATE_LIMITS)?;
            let mut rate_record = match redb::ReadableTable::get(&rate_limits, visitor_hash.as_str())? {
                Some(bytes) => db::decode(bytes.value())?,
                None => RateLimitRecord::new(now.timestamp()),
            };

            rate_record.check_and_increment(now.timestamp(), settings.rate_limits)?;

            let rate_bytes = db::encode(&rate_record)?;
            rate_limits.insert(visitor_hash.as_str(), rate_bytes.as_slice())?;
            drop(rate_limits);

            let log = ConsentLog {
                id: db::new_id(&visitor_hash),
                visitor_hash,
                choice: payload.choice,
                categories: granted.clone(),
                created_at: now.timestamp(),
            };
            let key = db::time_ordered_key(now.timestamp_millis(), &log.id);
            let log_bytes = db::encode(&log)?;
            let mut consent_logs = write_txn.open_table(tables::CONSENT_LOGS)?;
            consent_logs.insert(key.as_str(), log_bytes.as_slice())?;
        }
        write_txn.commit()?;

        Ok((granted, settings.consent_expiry_days))
    })
    .await??;

    tracing::info!(choice = ?payload.choice, categories = granted.len(), "Consent recorded");

    let expires_at = now + chrono::Duration::days(expiry_days as i64);
    Ok(Json(RecordConsentResponse {
        success: true,
        categories: granted,
        expires_at: expires_at.to_rfc3339(),
    }))
}

pub async fn consent_stats(State(state): State<AppState>) -> Result<Json<ConsentStats>> {
    let db = state.db.clone();
    let logs = tokio::task::spawn_blocking(move || db::list_records::<ConsentLog>(&db, tables::CONSENT_LOGS))
        .await??;
    Ok(Json(ConsentStats::from_logs(&logs)))
}
