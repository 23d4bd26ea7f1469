use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::constants::{ERR_INVALID_LAYOUT_ID, MAX_LAYOUT_DOCUMENT_BYTES};
use crate::db::{self, tables};
use crate::error::{AppError, Result};
use crate::models::layout::validate_layout_id;
use crate::models::{LayoutKind, LayoutRecord};
use crate::routes::timestamp_to_rfc3339;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResponse {
    pub kind: LayoutKind,
    pub id: String,
    pub document: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteLayoutResponse {
    pub success: bool,
}

impl TryFrom<LayoutRecord> for LayoutResponse {
    type Error = AppError;

    fn try_from(record: LayoutRecord) -> Result<Self> {
        Ok(Self {
            document: serde_json::from_str(&record.document)?,
            kind: record.kind,
            id: record.id,
            created_at: timestamp_to_rfc3339(record.created_at),
            updated_at: timestamp_to_rfc3339(record.updated_at),
        })
    }
}

fn parse_kind(kind: &str) -> Result<LayoutKind> {
    kind.parse().map_err(AppError::InvalidInput)
}

fn parse_target(kind: &str, id: &str) -> Result<LayoutKind> {
    let kind = parse_kind(kind)?;
    if !validate_layout_id(id) {
        return Err(AppError::InvalidInput(ERR_INVALID_LAYOUT_ID.to_string()));
    }
    Ok(kind)
}

/// Create or replace a layout document
///
/// The body must be a JSON object no larger than 256 KiB.
pub async fn put_layout(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<LayoutResponse>> {
    let kind = parse_target(&kind, &id)?;

    if body.len() > MAX_LAYOUT_DOCUMENT_BYTES {
        tracing::warn!(kind = kind.as_str(), size = body.len(), "Layout document too large");
        return Err(AppError::PayloadTooLarge);
    }

    let document: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid JSON document: {}", e)))?;
    if !document.is_object() {
        return Err(AppError::InvalidInput(
            "Layout document must be a JSON object".to_string(),
        ));
    }

    let now = state.now();
    let key = kind.key(&id);
    let text = document.to_string();
    let db = state.db.clone();

    let record = tokio::task::spawn_blocking(move || -> Result<LayoutRecord> {
        let created_at = db::get_record::<LayoutRecord>(&db, tables::LAYOUTS, &key)?
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let record = LayoutRecord {
            kind,
            id,
            document: text,
            created_at,
            updated_at: now,
        };
        db::put_record(&db, tables::LAYOUTS, &key, &record)?;
        Ok(record)
    })
    .await??;

    tracing::info!(kind = kind.as_str(), id = %record.id, "Layout saved");

    Ok(Json(record.try_into()?))
}

pub async fn get_layout(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<LayoutResponse>> {
    let kind = parse_target(&kind, &id)?;
    let key = kind.key(&id);
    let db = state.db.clone();

    let record = tokio::task::spawn_blocking(move || db::get_record::<LayoutRecord>(&db, tables::LAYOUTS, &key))
        .await??
        .ok_or(AppError::NotFound("Layout"))?;

    Ok(Json(record.try_into()?))
}

/// All documents of one kind, ordered by id
pub async fn list_layouts(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<LayoutResponse>>> {
    let kind = parse_kind(&kind)?;
    let prefix = kind.prefix();
    let db = state.db.clone();

    let records = tokio::task::spawn_blocking(move || {
        db::list_records_with_prefix::<LayoutRecord>(&db, tables::LAYOUTS, &prefix)
    })
    .await??;

    let layouts = records
        .into_iter()
        .map(LayoutResponse::try_from)
        .collect::<Result<Vec<_>>>()?;

    Ok(Json(layouts))
}

pub async fn delete_layout(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<DeleteLayoutResponse>> {
    let kind = parse_target(&kind, &id)?;
    let key = kind.key(&id);
    let db = state.db.clone();

    let removed = tokio::task::spawn_blocking(move || db::remove_record(&db, tables::LAYOUTS, &key)).await??;
    if !removed {
        return Err(AppError::NotFound("Layout"));
    }

    Ok(Json(DeleteLayoutResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("theme", "dark-mode").ok(), Some(LayoutKind::Theme));
        assert!(matches!(parse_target("footer", "x"), Err(AppError::InvalidInput(_))));
        assert!(matches!(parse_target("theme", "../etc"), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_response_parses_document() {
        let record = LayoutRecord {
            kind: LayoutKind::HeroBlock,
            id: "main".to_string(),
            document: r#"{"title":"Hello"}"#.to_string(),
            created_at: 0,
            updated_at: 0,
        };
        let response = LayoutResponse::try_from(record).unwrap();
        assert_eq!(response.document["title"], "Hello");
    }
}
