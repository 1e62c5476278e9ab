//! Domain events produced by incident transitions.

use beacon_types::EventKind;
use serde::{Deserialize, Serialize};

/// An immutable fact produced by a successful incident-state transition.
///
/// Consumed exactly once by the notification dispatcher; never persisted and
/// never retried. If the process dies between commit and dispatch, the
/// notification is lost — there is deliberately no durable outbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub incident_id: String,
    /// Event-specific details (responder info, escalation metadata, or the
    /// new status and notes).
    pub payload: serde_json::Value,
    /// ISO 8601 UTC timestamp of the transition that produced this event.
    pub occurred_at: String,
}

impl DomainEvent {
    pub fn new(
        kind: EventKind,
        incident_id: impl Into<String>,
        payload: serde_json::Value,
        occurred_at: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            incident_id: incident_id.into(),
            payload,
            occurred_at: occurred_at.into(),
        }
    }
}
