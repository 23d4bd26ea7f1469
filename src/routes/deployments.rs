use axum::{
    extract::{Path, Query, State},
    Json,
};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::MAX_DEPLOYMENT_LOG_LINES;
use crate::db::{self, tables};
use crate::error::{AppError, Result};
use crate::functions::DeploymentAction;
use crate::health::HealthReport;
use crate::models::{Deployment, DeploymentStatus};
use crate::progress::{
    compute_progress, events_from_legacy_log, DeploymentEvent, DeploymentProgress, DeploymentStep,
    EventOutcome,
};
use crate::routes::validate_signed_request;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub name: String,
    pub region: String,
    pub instance_id: Option<String>,
    pub public_ip: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteDeploymentResponse {
    pub success: bool,
    pub message: String,
}

/// Signed status report from the deployment backend.
///
/// Carries either one structured event (`event`, raw JSON text) or a block
/// of legacy prose log output (`log`). The signature covers
/// `"<timestamp>.<event or log>"`.
#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub event: Option<String>,
    pub log: Option<String>,
    pub signature: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct RecordEventResponse {
    pub success: bool,
    pub recorded: usize,
    pub status: DeploymentStatus,
    pub progress: DeploymentProgress,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub status: DeploymentStatus,
    pub progress: DeploymentProgress,
    pub events: Vec<DeploymentEvent>,
}

#[derive(Debug, Deserialize)]
pub struct HealthParams {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct MonitorResponse {
    pub monitoring: bool,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub action: String,
    pub function: String,
    pub result: Value,
}

async fn load_deployment(state: &AppState, id: &str) -> Result<Deployment> {
    let db = state.db.clone();
    let id = id.to_string();
    tokio::task::spawn_blocking(move || db::get_record::<Deployment>(&db, tables::DEPLOYMENTS, &id))
        .await??
        .ok_or(AppError::NotFound("Deployment"))
}

async fn load_events(state: &AppState, id: &str) -> Result<Vec<DeploymentEvent>> {
    let db = state.db.clone();
    let id = id.to_string();
    let events = tokio::task::spawn_blocking(move || {
        db::get_record::<Vec<DeploymentEvent>>(&db, tables::DEPLOYMENT_EVENTS, &id)
    })
    .await??;
    Ok(events.unwrap_or_default())
}

/// Create a deployment record
pub async fn create_deployment(
    State(state): State<AppState>,
    Json(payload): Json<CreateDeploymentRequest>,
) -> Result<Json<Deployment>> {
    if !Deployment::validate_name(&payload.name) {
        return Err(AppError::InvalidInput(
            "Name must be 1-100 characters".to_string(),
        ));
    }
    if !Deployment::validate_region(&payload.region) {
        return Err(AppError::InvalidInput(format!("Invalid region: {}", payload.region)));
    }
    if let Some(instance_id) = &payload.instance_id {
        if !Deployment::validate_instance_id(instance_id) {
            return Err(AppError::InvalidInput("Invalid instance id".to_string()));
        }
    }
    if let Some(ip) = &payload.public_ip {
        if !Deployment::validate_public_ip(ip) {
            return Err(AppError::InvalidInput("Invalid public IP".to_string()));
        }
    }

    let now = state.now();
    let deployment = Deployment {
        id: db::new_id(&payload.name),
        name: payload.name.trim().to_string(),
        instance_id: payload.instance_id,
        public_ip: payload.public_ip,
        region: payload.region,
        status: DeploymentStatus::Pending,
        log: vec![format!("Deployment record created at {}", crate::routes::timestamp_to_rfc3339(now))],
        created_at: now,
        last_deployed_at: None,
        last_health: None,
    };

    let db = state.db.clone();
    let record = deployment.clone();
    tokio::task::spawn_blocking(move || db::put_record(&db, tables::DEPLOYMENTS, &record.id, &record))
        .await??;

    tracing::info!(deployment_id = %deployment.id, name = %deployment.name, "Deployment created");

    Ok(Json(deployment))
}

/// List all deployments, newest first
pub async fn list_deployments(State(state): State<AppState>) -> Result<Json<Vec<Deployment>>> {
    let db = state.db.clone();
    let mut deployments =
        tokio::task::spawn_blocking(move || db::list_records::<Deployment>(&db, tables::DEPLOYMENTS))
            .await??;
    deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(deployments))
}

pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>> {
    Ok(Json(load_deployment(&state, &id).await?))
}

/// Delete a deployment record, its events and its monitor
pub async fn delete_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteDeploymentResponse>> {
    let db = state.db.clone();
    let key = id.clone();
    let existed = tokio::task::spawn_blocking(move || -> Result<bool> {
        let write_txn = db.begin_write()?;
        let existed;
        {
            let mut deployments = write_txn.open_table(tables::DEPLOYMENTS)?;
            existed = deployments.remove(key.as_str())?.is_some();
            drop(deployments);

            let mut events = write_txn.open_table(tables::DEPLOYMENT_EVENTS)?;
            events.remove(key.as_str())?;
        }
        write_txn.commit()?;
        Ok(existed)
    })
    .await??;

    if !existed {
        return Err(AppError::NotFound("Deployment"));
    }

    state.monitor.forget(&id).await;
    tracing::info!(deployment_id = %id, "Deployment deleted");

    Ok(Json(DeleteDeploymentResponse {
        success: true,
        message: "Deployment record and events deleted".to_string(),
    }))
}

/// Apply one event to the deployment record. Returns false when the event
/// is ignored because the deployment has been terminated.
fn apply_event(deployment: &mut Deployment, event: &DeploymentEvent) -> bool {
    if deployment.status == DeploymentStatus::Terminated {
        tracing::warn!(
            deployment_id = %deployment.id,
            step = ?event.step,
            "Ignoring event for terminated deployment"
        );
        return false;
    }

    if let Some(instance_id) = &event.instance_id {
        deployment.instance_id = Some(instance_id.clone());
    }
    if let Some(ip) = &event.public_ip {
        deployment.public_ip = Some(ip.clone());
    }

    let next = match (event.step, event.outcome) {
        (_, EventOutcome::Failed) => DeploymentStatus::Failed,
        (DeploymentStep::ApplicationDeployed, EventOutcome::Succeeded) => {
            deployment.last_deployed_at = Some(event.at);
            DeploymentStatus::Deployed
        }
        _ => DeploymentStatus::Deploying,
    };
    if deployment.status == DeploymentStatus::Deployed && next == DeploymentStatus::Deploying {
        tracing::info!(deployment_id = %deployment.id, step = ?event.step, "Redeploy started");
    }
    deployment.status = next;
    true
}

/// Payload of a status report once its signature has been checked
enum Incoming {
    Event(DeploymentEvent),
    Legacy(String),
}

/// Record signed status events from the deployment backend
///
/// # Security
/// - Requires HMAC signature over `"<timestamp>.<payload>"`
/// - Rejects timestamps more than 5 minutes away from now
pub async fn record_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<RecordEventRequest>,
) -> Result<Json<RecordEventResponse>> {
    let signed = match (&payload.event, &payload.log) {
        (Some(event), None) => event.as_str(),
        (None, Some(log)) => log.as_str(),
        _ => {
            return Err(AppError::InvalidInput(
                "Exactly one of 'event' or 'log' is required".to_string(),
            ))
        }
    };

    validate_signed_request(
        signed,
        &payload.signature,
        payload.timestamp,
        state.now(),
        &state.config.app_secret_key,
    )?;

    let incoming = match (payload.event, payload.log) {
        (Some(raw), _) => {
            let event: DeploymentEvent = serde_json::from_str(&raw)
                .map_err(|e| AppError::InvalidInput(format!("Invalid event: {}", e)))?;
            event.validate().map_err(AppError::InvalidInput)?;
            if let Some(instance_id) = &event.instance_id {
                if !Deployment::validate_instance_id(instance_id) {
                    return Err(AppError::InvalidInput("Invalid instance id".to_string()));
                }
            }
            if let Some(ip) = &event.public_ip {
                if !Deployment::validate_public_ip(ip) {
                    return Err(AppError::InvalidInput("Invalid public IP".to_string()));
                }
            }
            Incoming::Event(event)
        }
        (None, Some(log)) => Incoming::Legacy(log),
        (None, None) => Incoming::Legacy(String::new()),
    };

    let db = state.db.clone();
    let key = id.clone();
    let at = payload.timestamp;
    let (deployment, all_events, new_events) = tokio::task::spawn_blocking(
        move || -> Result<(Deployment, Vec<DeploymentEvent>, Vec<DeploymentEvent>)> {
            let write_txn = db.begin_write()?;
            let result = {
                let mut deployments = write_txn.open_table(tables::DEPLOYMENTS)?;
                let mut deployment: Deployment = match deployments.get(key.as_str())? {
                    Some(bytes) => db::decode(bytes.value())?,
                    None => {
                        tracing::warn!(deployment_id = %key, "Event for unknown deployment");
                        return Err(AppError::NotFound("Deployment"));
                    }
                };

                let mut events_table = write_txn.open_table(tables::DEPLOYMENT_EVENTS)?;
                let mut events: Vec<DeploymentEvent> = match events_table.get(key.as_str())? {
                    Some(bytes) => db::decode(bytes.value())?,
                    None => Vec::new(),
                };

                // Legacy chunks are attributed against everything recorded so far
                let new_events = match incoming {
                    Incoming::Event(event) => vec![event],
                    Incoming::Legacy(log) => events_from_legacy_log(&log, at, &events),
                };

                let applied: Vec<DeploymentEvent> = new_events
                    .into_iter()
                    .filter(|event| apply_event(&mut deployment, event))
                    .collect();
                deployment.append_log(
                    applied.iter().map(DeploymentEvent::log_line),
                    MAX_DEPLOYMENT_LOG_LINES,
                );
                events.extend(applied.iter().cloned());

                let event_bytes = db::encode(&events)?;
                events_table.insert(key.as_str(), event_bytes.as_slice())?;
                let deployment_bytes = db::encode(&deployment)?;
                deployments.insert(key.as_str(), deployment_bytes.as_slice())?;

                (deployment, events, applied)
            };
            write_txn.commit()?;
            Ok(result)
        },
    )
    .await??;

    tracing::info!(
        deployment_id = %id,
        recorded = new_events.len(),
        status = ?deployment.status,
        "Deployment events recorded"
    );

    let finished = new_events
        .iter()
        .any(|e| e.step == DeploymentStep::ApplicationDeployed && e.outcome == EventOutcome::Succeeded);
    if finished && deployment.is_monitorable() {
        state.monitor.start_monitor(&id).await;
    }

    Ok(Json(RecordEventResponse {
        success: true,
        recorded: new_events.len(),
        status: deployment.status,
        progress: compute_progress(&all_events),
    }))
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressResponse>> {
    let deployment = load_deployment(&state, &id).await?;
    let events = load_events(&state, &id).await?;

    Ok(Json(ProgressResponse {
        status: deployment.status,
        progress: compute_progress(&events),
        events,
    }))
}

/// Latest health report, polling on demand when asked to refresh or when
/// nothing has been recorded yet
pub async fn get_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HealthParams>,
) -> Result<Json<HealthReport>> {
    if !params.refresh {
        if let Some(report) = state.monitor.latest_report(&id).await {
            return Ok(Json(report));
        }
        if let Some(report) = load_deployment(&state, &id).await?.last_health {
            return Ok(Json(report));
        }
    }

    Ok(Json(state.monitor.check_now(&id).await?))
}

pub async fn start_monitoring(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MonitorResponse>> {
    let deployment = load_deployment(&state, &id).await?;
    if !deployment.is_monitorable() {
        return Err(AppError::InvalidInput(
            "Deployment has no running instance to monitor".to_string(),
        ));
    }

    state.monitor.start_monitor(&id).await;
    Ok(Json(MonitorResponse { monitoring: true }))
}

pub async fn stop_monitoring(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MonitorResponse>> {
    if !state.monitor.stop_monitor(&id).await {
        // Distinguish "no such deployment" from "not being monitored".
        load_deployment(&state, &id).await?;
    }
    Ok(Json(MonitorResponse { monitoring: false }))
}

/// Run an operator action through its serverless function
pub async fn run_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Result<Json<ActionResponse>> {
    let action: DeploymentAction = action.parse().map_err(AppError::InvalidInput)?;
    let functions = state
        .functions
        .clone()
        .ok_or(AppError::NotConfigured("Serverless functions"))?;
    let deployment = load_deployment(&state, &id).await?;

    let mut request = json!({
        "deploymentId": deployment.id,
        "instanceId": deployment.instance_id,
        "publicIp": deployment.public_ip,
        "region": deployment.region,
    });
    if let (Some(Json(Value::Object(extra))), Some(target)) = (body, request.as_object_mut()) {
        for (key, value) in extra {
            target.entry(key).or_insert(value);
        }
    }

    let function = action.function_name();
    let outcome = functions.invoke(function, &request).await;

    let line = match &outcome {
        Ok(_) => format!("→ {} ({}) succeeded", action.as_str(), function),
        Err(e) => format!("→ {} ({}) failed: {}", action.as_str(), function, e),
    };
    let started_deploy = outcome.is_ok() && action == DeploymentAction::Deploy;

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        db::update_record(&db, tables::DEPLOYMENTS, &id, |d: &mut Deployment| {
            d.append_log([line], MAX_DEPLOYMENT_LOG_LINES);
            if started_deploy {
                d.status = DeploymentStatus::Deploying;
            }
            Ok(())
        })
    })
    .await??
    .ok_or(AppError::NotFound("Deployment"))?;

    let result = outcome?;
    tracing::info!(deployment_id = %deployment.id, action = action.as_str(), "Deployment action completed");

    Ok(Json(ActionResponse {
        success: true,
        action: action.as_str().to_string(),
        function: function.to_string(),
        result,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> Deployment {
        Deployment {
            id: "d".to_string(),
            name: "n".to_string(),
            instance_id: None,
            public_ip: None,
            region: "us-east-1".to_string(),
            status: DeploymentStatus::Pending,
            log: vec![],
            created_at: 0,
            last_deployed_at: None,
            last_health: None,
        }
    }

    #[test]
    fn test_apply_event_transitions() {
        let mut d = deployment();

        let mut created = DeploymentEvent::new(DeploymentStep::InstanceCreated, EventOutcome::Succeeded, "", 10);
        created.instance_id = Some("i-0123abcd".to_string());
        apply_event(&mut d, &created);
        assert_eq!(d.status, DeploymentStatus::Deploying);
        assert_eq!(d.instance_id.as_deref(), Some("i-0123abcd"));

        let failed = DeploymentEvent::new(DeploymentStep::PackagesInstalled, EventOutcome::Failed, "apt", 20);
        apply_event(&mut d, &failed);
        assert_eq!(d.status, DeploymentStatus::Failed);

        let done = DeploymentEvent::new(DeploymentStep::ApplicationDeployed, EventOutcome::Succeeded, "", 30);
        apply_event(&mut d, &done);
        assert_eq!(d.status, DeploymentStatus::Deployed);
        assert_eq!(d.last_deployed_at, Some(30));
    }

    #[test]
    fn test_terminated_deployment_ignores_events() {
        let mut d = deployment();
        d.status = DeploymentStatus::Terminated;

        let started = DeploymentEvent::new(DeploymentStep::InstanceCreated, EventOutcome::Started, "", 10);
        assert!(!apply_event(&mut d, &started));
        assert_eq!(d.status, DeploymentStatus::Terminated);
    }

    #[test]
    fn test_redeploy_leaves_deployed() {
        let mut d = deployment();
        let done = DeploymentEvent::new(DeploymentStep::ApplicationDeployed, EventOutcome::Succeeded, "", 30);
        assert!(apply_event(&mut d, &done));

        let again = DeploymentEvent::new(DeploymentStep::PackagesInstalled, EventOutcome::Started, "", 40);
        assert!(apply_event(&mut d, &again));
        assert_eq!(d.status, DeploymentStatus::Deploying);
        assert_eq!(d.last_deployed_at, Some(30));
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(AppError::NotFound("Deployment").to_string(), "Deployment not found");
    }
}
