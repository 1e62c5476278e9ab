//! Fan-out of domain events to WebSocket channels.
//!
//! Dispatch is fire-and-forget: the HTTP handler that produced the event has
//! already committed the state change, so delivery failures are logged and
//! never surfaced to the caller.

use crate::api_ws::OutgoingMessage;
use crate::AppState;
use beacon_incidents::directory::{approved_jurisdictions, get_responder};
use beacon_incidents::resolver::{resolve, Notification, ResolverContext};
use beacon_incidents::{get_incident, DomainEvent, Incident};
use beacon_types::EventKind;
use std::sync::Arc;

/// Resolves a domain event to its target channels and delivers the wire
/// frames. Errors are logged and swallowed.
pub async fn dispatch_event(state: Arc<AppState>, event: DomainEvent) {
    let incident_id = event.incident_id.clone();
    let pool = state.pool.clone();

    let loaded = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let incident = get_incident(&conn, &incident_id).map_err(|e| e.to_string())?;
        let responder_owner = incident
            .assigned_ngo
            .as_deref()
            .and_then(|ngo| get_responder(&conn, ngo).ok())
            .map(|r| r.owner_user_id);
        let jurisdictions: Vec<String> = approved_jurisdictions(&conn)
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|a| a.jurisdiction)
            .collect();
        Ok::<_, String>((incident, responder_owner, jurisdictions))
    })
    .await;

    let (incident, responder_owner, jurisdictions) = match loaded {
        Ok(Ok(parts)) => parts,
        Ok(Err(e)) => {
            tracing::warn!(
                incident_id = %event.incident_id,
                "skipping event dispatch, failed to load context: {}",
                e
            );
            return;
        }
        Err(e) => {
            tracing::warn!(
                incident_id = %event.incident_id,
                "event dispatch task failed: {}",
                e
            );
            return;
        }
    };

    let ctx = ResolverContext {
        responder_owner: responder_owner.clone(),
        jurisdictions,
    };
    let (targets, notification) = resolve(&event, &incident, &ctx);

    let frame = wire_message(&incident, &notification);
    let json = match serde_json::to_string(&frame) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(
                incident_id = %incident.incident_id,
                "failed to serialize event frame: {}",
                e
            );
            return;
        }
    };

    for target in &targets {
        state.registry.broadcast(target, &json).await;
    }

    // An assignment also pings the responder's owner account directly.
    if notification.kind == EventKind::IncidentAssigned {
        if let Some(owner) = &responder_owner {
            let ping = OutgoingMessage::Notification {
                title: format!("New incident: {}", incident.incident_type),
                message: format!(
                    "A {} severity incident has been assigned to your organisation",
                    incident.severity.as_str()
                ),
                notification_type: "incident_report".to_string(),
                timestamp: notification.occurred_at.clone(),
            };
            match serde_json::to_string(&ping) {
                Ok(json) => state.registry.send_to_user(owner, &json).await,
                Err(e) => {
                    tracing::error!("failed to serialize notification frame: {}", e);
                }
            }
        }
    }
}

/// Converts a resolved notification into the client-facing wire frame.
fn wire_message(incident: &Incident, notification: &Notification) -> OutgoingMessage {
    match notification.kind {
        EventKind::IncidentAssigned => OutgoingMessage::NewIncident {
            incident: serde_json::to_value(incident).unwrap_or_default(),
            timestamp: notification.occurred_at.clone(),
        },
        EventKind::IncidentEscalated => OutgoingMessage::Escalation {
            incident_id: notification.incident_id.clone(),
            data: notification.details.clone(),
            priority: "HIGH".to_string(),
            timestamp: notification.occurred_at.clone(),
        },
        EventKind::IncidentStatusChanged => OutgoingMessage::IncidentUpdate {
            incident_id: notification.incident_id.clone(),
            status: incident.status.as_str().to_string(),
            details: notification.details.clone(),
            timestamp: notification.occurred_at.clone(),
        },
    }
}
