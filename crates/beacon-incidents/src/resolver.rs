//! Escalation/assignment resolver.
//!
//! A pure mapping from (domain event, incident snapshot) to the ordered list
//! of target channel keys plus the canonical notification payload. The
//! dispatcher gathers the [`ResolverContext`] (responder owner, approved
//! jurisdictions) up front so resolution itself touches no I/O.

use crate::events::DomainEvent;
use crate::Incident;
use beacon_types::{ChannelKey, EventKind, IncidentStatus};
use serde::Serialize;

/// Routing inputs read from the directory before resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolverContext {
    /// Routable owner user id of the incident's assigned responder, if any.
    pub responder_owner: Option<String>,
    /// Approved government jurisdiction strings, in registration order.
    pub jurisdictions: Vec<String>,
}

/// The canonical notification payload constructed for an event.
///
/// Consumers key on `kind` to decide rendering.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub kind: EventKind,
    pub incident_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
    pub details: serde_json::Value,
    pub occurred_at: String,
}

/// Finds the first approved jurisdiction containing the incident's region
/// string, case-insensitively.
///
/// The region field is free text with no canonicalization, so a region whose
/// name is a substring of another can mis-route; accepted behavior for now.
pub fn match_jurisdiction<'a>(
    region: Option<&str>,
    jurisdictions: &'a [String],
) -> Option<&'a str> {
    let needle = region?.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    jurisdictions
        .iter()
        .find(|j| j.to_lowercase().contains(&needle))
        .map(String::as_str)
}

/// Resolves an event to its target channels and notification payload.
///
/// An unresolvable specific target (missing responder owner, no matching
/// jurisdiction) is dropped with a logged warning; the incident's own
/// channel is always targeted.
pub fn resolve(
    event: &DomainEvent,
    incident: &Incident,
    ctx: &ResolverContext,
) -> (Vec<ChannelKey>, Notification) {
    let mut channels = Vec::new();

    match event.kind {
        EventKind::IncidentAssigned => {
            if let Some(owner) = &ctx.responder_owner {
                channels.push(ChannelKey::User(owner.clone()));
            } else {
                tracing::warn!(
                    incident_id = %event.incident_id,
                    "assigned responder has no routable owner; dropping personal notification"
                );
            }
            channels.push(ChannelKey::Incident(event.incident_id.clone()));
        }
        EventKind::IncidentEscalated => {
            match match_jurisdiction(incident.state.as_deref(), &ctx.jurisdictions) {
                Some(jurisdiction) => {
                    channels.push(ChannelKey::Gov(jurisdiction.to_string()));
                }
                None => {
                    tracing::warn!(
                        incident_id = %event.incident_id,
                        region = incident.state.as_deref().unwrap_or(""),
                        "no approved jurisdiction matches; dropping gov escalation target"
                    );
                }
            }
            channels.push(ChannelKey::Incident(event.incident_id.clone()));
        }
        EventKind::IncidentStatusChanged => {
            channels.push(ChannelKey::Incident(event.incident_id.clone()));
            if matches!(
                incident.status,
                IncidentStatus::NgoResponding | IncidentStatus::EmergencyDispatched
            ) {
                if let Some(responder) = &incident.assigned_ngo {
                    channels.push(ChannelKey::Ngo(responder.clone()));
                }
            }
        }
    }

    let notification = Notification {
        kind: event.kind,
        incident_id: event.incident_id.clone(),
        status: Some(incident.status),
        details: event.payload.clone(),
        occurred_at: event.occurred_at.clone(),
    };

    (channels, notification)
}
