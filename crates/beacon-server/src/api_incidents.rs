//! REST API handlers for incident lifecycle operations.

use crate::dispatch::dispatch_event;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use beacon_incidents::{
    assign_incident, create_incident, directory, escalate_incident, get_incident,
    list_incidents_by_reporter, transition_incident, CreateIncidentParams, Incident,
    IncidentError,
};
use beacon_types::IncidentStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Error body returned by all incident endpoints.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

/// Failure inside a blocking handler closure: either a pool checkout failure
/// or a domain error.
#[derive(Debug, thiserror::Error)]
enum ApiFailure {
    #[error(transparent)]
    Incident(#[from] IncidentError),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

fn api_error(e: ApiFailure) -> (StatusCode, Json<ApiError>) {
    let status = match &e {
        ApiFailure::Incident(IncidentError::Validation(_)) => StatusCode::BAD_REQUEST,
        ApiFailure::Incident(IncidentError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        ApiFailure::Incident(IncidentError::NotFound(_)) => StatusCode::NOT_FOUND,
        ApiFailure::Incident(IncidentError::Database(db)) => {
            tracing::error!("database error in incident handler: {}", db);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ApiFailure::Pool(pe) => {
            tracing::error!("failed to get db connection: {}", pe);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ApiError {
            error: e.to_string(),
        }),
    )
}

fn join_error(e: tokio::task::JoinError) -> (StatusCode, Json<ApiError>) {
    tracing::error!("incident handler task failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            error: "internal error".to_string(),
        }),
    )
}

/// `POST /api/incidents` — report a new incident.
pub async fn create_incident_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(params): Json<CreateIncidentParams>,
) -> Result<(StatusCode, Json<Incident>), (StatusCode, Json<ApiError>)> {
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_, ApiFailure> {
        let conn = pool.get()?;
        Ok(create_incident(&conn, &params)?)
    })
    .await
    .map_err(join_error)?;

    match result {
        Ok(incident) => {
            tracing::info!(
                incident_id = %incident.incident_id,
                severity = incident.severity.as_str(),
                "incident reported"
            );
            Ok((StatusCode::CREATED, Json(incident)))
        }
        Err(e) => Err(api_error(e)),
    }
}

/// `GET /api/incidents/{incidentId}` — fetch one incident.
pub async fn get_incident_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(incident_id): Path<String>,
) -> Result<Json<Incident>, (StatusCode, Json<ApiError>)> {
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_, ApiFailure> {
        let conn = pool.get()?;
        Ok(get_incident(&conn, &incident_id)?)
    })
    .await
    .map_err(join_error)?;

    result.map(Json).map_err(api_error)
}

/// Progress snapshot derived from the incident's current status.
#[derive(Debug, Serialize)]
pub struct TrackingResponse {
    pub incident_id: String,
    pub status: IncidentStatus,
    pub progress_percentage: u8,
    pub stages: Vec<TrackingStage>,
    pub current_stage: usize,
}

/// One step in the citizen-facing progress view.
#[derive(Debug, Serialize, PartialEq)]
pub struct TrackingStage {
    pub name: &'static str,
    /// "completed", "current" or "pending".
    pub status: &'static str,
    pub icon: &'static str,
}

const TRACKING_STAGES: [(&str, &str); 4] = [
    ("Reported", "AlertTriangle"),
    ("Emergency Services Notified", "Phone"),
    ("NGO Responding", "Heart"),
    ("Resolved", "CheckCircle"),
];

fn tracking_snapshot(incident: &Incident) -> TrackingResponse {
    let (current_stage, progress_percentage) = match incident.status {
        IncidentStatus::Reported => (0, 10),
        IncidentStatus::AssignedNgo => (1, 30),
        IncidentStatus::EmergencyDispatched => (1, 50),
        IncidentStatus::NgoResponding => (2, 70),
        IncidentStatus::EscalatedGov => (2, 80),
        IncidentStatus::Resolved => (3, 100),
    };
    let last = TRACKING_STAGES.len() - 1;
    let stages = TRACKING_STAGES
        .iter()
        .enumerate()
        .map(|(i, &(name, icon))| TrackingStage {
            name,
            status: if i == current_stage && current_stage < last {
                "current"
            } else if i <= current_stage {
                "completed"
            } else {
                "pending"
            },
            icon,
        })
        .collect();
    TrackingResponse {
        incident_id: incident.incident_id.clone(),
        status: incident.status,
        progress_percentage,
        stages,
        current_stage,
    }
}

/// `GET /api/incidents/{incidentId}/track` — progress view for citizens.
pub async fn track_incident_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(incident_id): Path<String>,
) -> Result<Json<TrackingResponse>, (StatusCode, Json<ApiError>)> {
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_, ApiFailure> {
        let conn = pool.get()?;
        Ok(get_incident(&conn, &incident_id)?)
    })
    .await
    .map_err(join_error)?;

    result
        .map(|incident| Json(tracking_snapshot(&incident)))
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    #[serde(alias = "ngo_id")]
    pub responder_id: String,
}

/// `PUT /api/incidents/{incidentId}/assign` — assign a responder.
pub async fn assign_incident_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(incident_id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<Incident>, (StatusCode, Json<ApiError>)> {
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_, ApiFailure> {
        let conn = pool.get()?;
        Ok(assign_incident(&conn, &incident_id, &req.responder_id)?)
    })
    .await
    .map_err(join_error)?;

    match result {
        Ok((incident, event)) => {
            tracing::info!(
                incident_id = %incident.incident_id,
                responder = incident.assigned_ngo.as_deref().unwrap_or_default(),
                "incident assigned"
            );
            tokio::spawn(dispatch_event(state.clone(), event));
            Ok(Json(incident))
        }
        Err(e) => Err(api_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub danger_scale: i64,
    pub incident_details: String,
    pub financial_aid_estimate: Option<String>,
}

/// `PUT /api/incidents/{incidentId}/escalate` — escalate to government.
pub async fn escalate_incident_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(incident_id): Path<String>,
    Json(req): Json<EscalateRequest>,
) -> Result<Json<Incident>, (StatusCode, Json<ApiError>)> {
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_, ApiFailure> {
        let conn = pool.get()?;
        Ok(escalate_incident(
            &conn,
            &incident_id,
            req.danger_scale,
            &req.incident_details,
            req.financial_aid_estimate.as_deref(),
        )?)
    })
    .await
    .map_err(join_error)?;

    match result {
        Ok((incident, event)) => {
            tracing::info!(
                incident_id = %incident.incident_id,
                danger_scale = incident.danger_scale.unwrap_or_default(),
                "incident escalated"
            );
            tokio::spawn(dispatch_event(state.clone(), event));
            Ok(Json(incident))
        }
        Err(e) => Err(api_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    pub notes: Option<String>,
}

/// `PUT /api/incidents/{incidentId}/status` — apply a generic status change.
pub async fn update_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(incident_id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<Incident>, (StatusCode, Json<ApiError>)> {
    let Some(target) = IncidentStatus::parse(&req.status) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: format!("unrecognized status: {}", req.status),
            }),
        ));
    };

    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_, ApiFailure> {
        let conn = pool.get()?;
        Ok(transition_incident(&conn, &incident_id, target, req.notes.as_deref())?)
    })
    .await
    .map_err(join_error)?;

    match result {
        Ok((incident, event)) => {
            tracing::info!(
                incident_id = %incident.incident_id,
                status = incident.status.as_str(),
                "incident status updated"
            );
            tokio::spawn(dispatch_event(state.clone(), event));
            Ok(Json(incident))
        }
        Err(e) => Err(api_error(e)),
    }
}

/// `GET /api/incidents/user/{userId}/history` — reporter's incidents, newest
/// first.
pub async fn reporter_history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Incident>>, (StatusCode, Json<ApiError>)> {
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_, ApiFailure> {
        let conn = pool.get()?;
        Ok(list_incidents_by_reporter(&conn, &user_id)?)
    })
    .await
    .map_err(join_error)?;

    result.map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponderRequest {
    pub responder_id: Option<String>,
    pub name: String,
    pub owner_user_id: String,
}

/// `POST /api/responders` — register a responder organisation.
pub async fn register_responder_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<RegisterResponderRequest>,
) -> Result<(StatusCode, Json<directory::Responder>), (StatusCode, Json<ApiError>)> {
    let responder_id = req
        .responder_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_, ApiFailure> {
        let conn = pool.get()?;
        Ok(directory::register_responder(&conn, &responder_id, &req.name, &req.owner_user_id)?)
    })
    .await
    .map_err(join_error)?;

    match result {
        Ok(responder) => Ok((StatusCode::CREATED, Json(responder))),
        Err(ApiFailure::Incident(IncidentError::Database(rusqlite::Error::SqliteFailure(
            e,
            msg,
        )))) if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err((
                StatusCode::CONFLICT,
                Json(ApiError {
                    error: msg.unwrap_or_else(|| "responder already exists".to_string()),
                }),
            ))
        }
        Err(e) => Err(api_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterGovAuthorityRequest {
    pub jurisdiction: String,
    pub user_id: String,
    #[serde(default)]
    pub approved: bool,
}

/// `POST /api/gov/authorities` — register a government authority account.
pub async fn register_gov_authority_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<RegisterGovAuthorityRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_, ApiFailure> {
        let conn = pool.get()?;
        Ok(directory::register_gov_authority(&conn, &req.jurisdiction, &req.user_id, req.approved)?)
    })
    .await
    .map_err(join_error)?;

    result.map(|()| StatusCode::CREATED).map_err(api_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::Severity;

    fn incident_with_status(status: IncidentStatus) -> Incident {
        Incident {
            incident_id: "inc-track".to_string(),
            reporter_id: Some("user-1".to_string()),
            incident_type: "fire".to_string(),
            severity: Severity::High,
            status,
            latitude: 0.0,
            longitude: 0.0,
            address: None,
            city: None,
            state: None,
            description: None,
            people_affected: 0,
            casualties: false,
            terror_related: false,
            aid_needed: None,
            assigned_ngo: None,
            escalated_to_gov: false,
            danger_scale: None,
            escalation_reason: None,
            financial_aid_estimate: None,
            resolution_notes: None,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            assigned_at: None,
            emergency_dispatched_at: None,
            ngo_responded_at: None,
            escalated_at: None,
            resolved_at: None,
        }
    }

    #[test]
    fn tracking_progress_is_monotone_over_the_lifecycle() {
        let order = [
            IncidentStatus::Reported,
            IncidentStatus::AssignedNgo,
            IncidentStatus::EmergencyDispatched,
            IncidentStatus::NgoResponding,
            IncidentStatus::EscalatedGov,
            IncidentStatus::Resolved,
        ];
        let mut last = 0;
        for status in order {
            let snapshot = tracking_snapshot(&incident_with_status(status));
            assert!(
                snapshot.progress_percentage > last,
                "progress must strictly increase, got {} after {} for {:?}",
                snapshot.progress_percentage,
                last,
                status
            );
            last = snapshot.progress_percentage;
        }
    }

    #[test]
    fn tracking_resolved_is_final_stage_at_full_progress() {
        let snapshot = tracking_snapshot(&incident_with_status(IncidentStatus::Resolved));
        assert_eq!(snapshot.progress_percentage, 100);
        assert_eq!(snapshot.current_stage, TRACKING_STAGES.len() - 1);
        assert!(
            snapshot.stages.iter().all(|s| s.status == "completed"),
            "every stage is completed once resolved"
        );
    }

    #[test]
    fn tracking_stage_statuses_follow_current_stage() {
        let snapshot = tracking_snapshot(&incident_with_status(IncidentStatus::NgoResponding));
        let statuses: Vec<&str> = snapshot.stages.iter().map(|s| s.status).collect();
        assert_eq!(statuses, ["completed", "completed", "current", "pending"]);

        let snapshot = tracking_snapshot(&incident_with_status(IncidentStatus::Reported));
        let statuses: Vec<&str> = snapshot.stages.iter().map(|s| s.status).collect();
        assert_eq!(statuses, ["current", "pending", "pending", "pending"]);
    }

    #[test]
    fn tracking_response_uses_snake_case_keys() {
        let snapshot = tracking_snapshot(&incident_with_status(IncidentStatus::AssignedNgo));
        let json = serde_json::to_value(&snapshot).expect("serialization should not fail");
        assert!(json.get("incident_id").is_some());
        assert!(json.get("progress_percentage").is_some());
        assert!(json.get("current_stage").is_some());
        assert_eq!(
            json.pointer("/stages/0/name").and_then(|v| v.as_str()),
            Some("Reported")
        );
        assert_eq!(
            json.get("status").and_then(|v| v.as_str()),
            Some("assigned_ngo")
        );
    }
}
