//! Incident lifecycle state machine for the Beacon platform.
//!
//! Owns per-incident status, validates and applies transitions, and records
//! the derived lifecycle milestone timestamps. Incident rows are mutated
//! only through the operations in this crate, never by direct column writes
//! from elsewhere.
//!
//! # Concurrency
//!
//! Every state-changing operation reads the current status and then applies
//! a single guarded `UPDATE ... WHERE status = <observed>`. Two concurrent
//! transitions on the same incident therefore serialize at the database:
//! the loser of the race matches zero rows and fails with
//! [`IncidentError::InvalidTransition`] instead of silently overwriting the
//! winner's result. Different incidents are mutated fully concurrently.

pub mod directory;
pub mod events;
pub mod resolver;

use beacon_types::{EventKind, IncidentStatus, Severity};
use chrono::{SecondsFormat, Utc};
pub use events::DomainEvent;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by incident operations.
///
/// All three domain variants are local to the failing call and are returned
/// synchronously; none triggers an internal retry.
#[derive(Debug, Error)]
pub enum IncidentError {
    /// Malformed input, rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Well-formed request that is illegal given the incident's current
    /// state. The incident is unchanged.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },
    /// The referenced incident or responder does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// An incident record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    /// Opaque public ID.
    pub incident_id: String,
    /// User who reported the incident, if known.
    pub reporter_id: Option<String>,
    /// Free-text incident type (e.g. "flood", "fire").
    pub incident_type: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub city: Option<String>,
    /// Free-text administrative region, used to route escalations.
    pub state: Option<String>,
    pub description: Option<String>,
    pub people_affected: i64,
    pub casualties: bool,
    pub terror_related: bool,
    pub aid_needed: Option<String>,
    /// Assigned responder reference. `assigned_at` is set iff this is set.
    pub assigned_ngo: Option<String>,
    /// `escalated_at`, `danger_scale` and `escalation_reason` are set iff
    /// this flag is true.
    pub escalated_to_gov: bool,
    pub danger_scale: Option<i64>,
    pub escalation_reason: Option<String>,
    pub financial_aid_estimate: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: String,
    pub assigned_at: Option<String>,
    pub emergency_dispatched_at: Option<String>,
    pub ngo_responded_at: Option<String>,
    pub escalated_at: Option<String>,
    pub resolved_at: Option<String>,
}

/// Parameters for reporting a new incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIncidentParams {
    pub reporter_id: Option<String>,
    pub incident_type: String,
    /// Severity string; must be one of the four recognized levels.
    pub severity: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub people_affected: i64,
    #[serde(default)]
    pub casualties: bool,
    #[serde(default)]
    pub terror_related: bool,
    pub aid_needed: Option<String>,
}

const INCIDENT_COLUMNS: &str = "incident_id, reporter_id, incident_type, severity, status,
    latitude, longitude, address, city, state, description, people_affected,
    casualties, terror_related, aid_needed, assigned_ngo, escalated_to_gov,
    danger_scale, escalation_reason, financial_aid_estimate, resolution_notes,
    created_at, assigned_at, emergency_dispatched_at, ngo_responded_at,
    escalated_at, resolved_at";

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Creates a new incident report in status `reported` with all lifecycle
/// milestone timestamps unset.
pub fn create_incident(
    conn: &Connection,
    params: &CreateIncidentParams,
) -> Result<Incident, IncidentError> {
    let severity = Severity::parse(&params.severity).ok_or_else(|| {
        IncidentError::Validation(format!("unrecognized severity: {}", params.severity))
    })?;
    if params.incident_type.trim().is_empty() {
        return Err(IncidentError::Validation(
            "incident_type must not be empty".to_string(),
        ));
    }

    let incident_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO incidents (
            incident_id, reporter_id, incident_type, severity, status,
            latitude, longitude, address, city, state, description,
            people_affected, casualties, terror_related, aid_needed, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            incident_id,
            params.reporter_id,
            params.incident_type,
            severity.as_str(),
            IncidentStatus::Reported.as_str(),
            params.latitude,
            params.longitude,
            params.address,
            params.city,
            params.state,
            params.description,
            params.people_affected,
            params.casualties,
            params.terror_related,
            params.aid_needed,
            now_iso(),
        ],
    )?;

    get_incident(conn, &incident_id)
}

/// Retrieves an incident by its public ID.
pub fn get_incident(conn: &Connection, incident_id: &str) -> Result<Incident, IncidentError> {
    conn.query_row(
        &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE incident_id = ?1"),
        [incident_id],
        map_row_to_incident,
    )
    .optional()?
    .ok_or_else(|| IncidentError::NotFound(format!("incident {incident_id}")))
}

/// Lists incidents reported by a user, newest first.
pub fn list_incidents_by_reporter(
    conn: &Connection,
    reporter_id: &str,
) -> Result<Vec<Incident>, IncidentError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INCIDENT_COLUMNS} FROM incidents
         WHERE reporter_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map([reporter_id], map_row_to_incident)?;
    let mut incidents = Vec::new();
    for row in rows {
        incidents.push(row?);
    }
    Ok(incidents)
}

/// Assigns an incident to a responder.
///
/// Legal only while the incident is still `reported`. On success sets
/// `assigned_ngo` and `assigned_at` together (they are set iff each other
/// is) and emits an `IncidentAssigned` event.
pub fn assign_incident(
    conn: &Connection,
    incident_id: &str,
    responder_id: &str,
) -> Result<(Incident, DomainEvent), IncidentError> {
    let responder = directory::get_responder(conn, responder_id)?;
    let current = get_incident(conn, incident_id)?;
    if current.status != IncidentStatus::Reported {
        return Err(IncidentError::InvalidTransition {
            from: current.status,
            to: IncidentStatus::AssignedNgo,
        });
    }

    let now = now_iso();
    let changed = conn.execute(
        "UPDATE incidents
         SET status = ?1, assigned_ngo = ?2, assigned_at = ?3
         WHERE incident_id = ?4 AND status = ?5",
        params![
            IncidentStatus::AssignedNgo.as_str(),
            responder_id,
            now,
            incident_id,
            IncidentStatus::Reported.as_str(),
        ],
    )?;
    if changed == 0 {
        return Err(transition_conflict(
            conn,
            incident_id,
            IncidentStatus::AssignedNgo,
        ));
    }

    let incident = get_incident(conn, incident_id)?;
    let event = DomainEvent::new(
        EventKind::IncidentAssigned,
        incident_id,
        json!({
            "responder_id": responder.responder_id,
            "responder_name": responder.name,
        }),
        now,
    );
    Ok((incident, event))
}

/// Escalates an incident to a government authority.
///
/// Legal from every non-terminal state, including states that have never
/// been assigned. Records the escalation metadata (`danger_scale`, reason,
/// optional financial estimate) together with the `escalated_to_gov` flag
/// and emits an `IncidentEscalated` event.
pub fn escalate_incident(
    conn: &Connection,
    incident_id: &str,
    danger_scale: i64,
    reason: &str,
    financial_aid_estimate: Option<&str>,
) -> Result<(Incident, DomainEvent), IncidentError> {
    if !(1..=5).contains(&danger_scale) {
        return Err(IncidentError::Validation(format!(
            "danger_scale must be within [1, 5], got {danger_scale}"
        )));
    }

    let current = get_incident(conn, incident_id)?;
    if current.status.is_terminal() {
        return Err(IncidentError::InvalidTransition {
            from: current.status,
            to: IncidentStatus::EscalatedGov,
        });
    }

    let now = now_iso();
    let changed = conn.execute(
        "UPDATE incidents
         SET status = ?1, escalated_to_gov = 1, escalated_at = ?2,
             danger_scale = ?3, escalation_reason = ?4, financial_aid_estimate = ?5
         WHERE incident_id = ?6 AND status = ?7",
        params![
            IncidentStatus::EscalatedGov.as_str(),
            now,
            danger_scale,
            reason,
            financial_aid_estimate,
            incident_id,
            current.status.as_str(),
        ],
    )?;
    if changed == 0 {
        return Err(transition_conflict(
            conn,
            incident_id,
            IncidentStatus::EscalatedGov,
        ));
    }

    let incident = get_incident(conn, incident_id)?;
    let event = DomainEvent::new(
        EventKind::IncidentEscalated,
        incident_id,
        json!({
            "danger_scale": danger_scale,
            "reason": reason,
            "financial_aid_estimate": financial_aid_estimate,
        }),
        now,
    );
    Ok((incident, event))
}

/// Applies a generic status change.
///
/// Enforces the forward-only lifecycle ordering: the target must rank
/// strictly after the current status. `escalated_gov` and `resolved` rank
/// after every other state and are therefore reachable from any non-terminal
/// state; nothing leaves `resolved`.
///
/// Side effects: records the matching milestone timestamp, and stores
/// `notes` as resolution notes when resolving. A transition to
/// `escalated_gov` through this path changes status only — escalation
/// metadata is recorded exclusively by [`escalate_incident`], keeping the
/// metadata tied to the `escalated_to_gov` flag.
pub fn transition_incident(
    conn: &Connection,
    incident_id: &str,
    target: IncidentStatus,
    notes: Option<&str>,
) -> Result<(Incident, DomainEvent), IncidentError> {
    let current = get_incident(conn, incident_id)?;
    if current.status.is_terminal() || target.rank() <= current.status.rank() {
        return Err(IncidentError::InvalidTransition {
            from: current.status,
            to: target,
        });
    }

    let now = now_iso();
    let changed = match target {
        IncidentStatus::EmergencyDispatched => conn.execute(
            "UPDATE incidents SET status = ?1, emergency_dispatched_at = ?2
             WHERE incident_id = ?3 AND status = ?4",
            params![target.as_str(), now, incident_id, current.status.as_str()],
        )?,
        IncidentStatus::NgoResponding => conn.execute(
            "UPDATE incidents SET status = ?1, ngo_responded_at = ?2
             WHERE incident_id = ?3 AND status = ?4",
            params![target.as_str(), now, incident_id, current.status.as_str()],
        )?,
        IncidentStatus::Resolved => conn.execute(
            "UPDATE incidents SET status = ?1, resolved_at = ?2, resolution_notes = ?3
             WHERE incident_id = ?4 AND status = ?5",
            params![target.as_str(), now, notes, incident_id, current.status.as_str()],
        )?,
        _ => conn.execute(
            "UPDATE incidents SET status = ?1
             WHERE incident_id = ?2 AND status = ?3",
            params![target.as_str(), incident_id, current.status.as_str()],
        )?,
    };
    if changed == 0 {
        return Err(transition_conflict(conn, incident_id, target));
    }

    let incident = get_incident(conn, incident_id)?;
    let event = DomainEvent::new(
        EventKind::IncidentStatusChanged,
        incident_id,
        json!({
            "status": target.as_str(),
            "notes": notes,
        }),
        now,
    );
    Ok((incident, event))
}

/// Builds the error for a transition that lost the guarded-update race.
///
/// Re-reads the incident so the error reports the status the winner left
/// behind, not the stale observation.
fn transition_conflict(
    conn: &Connection,
    incident_id: &str,
    to: IncidentStatus,
) -> IncidentError {
    match get_incident(conn, incident_id) {
        Ok(fresh) => IncidentError::InvalidTransition {
            from: fresh.status,
            to,
        },
        Err(e) => e,
    }
}

fn map_row_to_incident(row: &Row) -> rusqlite::Result<Incident> {
    let severity_str: String = row.get(3)?;
    let severity = Severity::parse(&severity_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unrecognized severity: {severity_str}").into(),
        )
    })?;

    let status_str: String = row.get(4)?;
    let status = IncidentStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unrecognized status: {status_str}").into(),
        )
    })?;

    Ok(Incident {
        incident_id: row.get(0)?,
        reporter_id: row.get(1)?,
        incident_type: row.get(2)?,
        severity,
        status,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        address: row.get(7)?,
        city: row.get(8)?,
        state: row.get(9)?,
        description: row.get(10)?,
        people_affected: row.get(11)?,
        casualties: row.get(12)?,
        terror_related: row.get(13)?,
        aid_needed: row.get(14)?,
        assigned_ngo: row.get(15)?,
        escalated_to_gov: row.get(16)?,
        danger_scale: row.get(17)?,
        escalation_reason: row.get(18)?,
        financial_aid_estimate: row.get(19)?,
        resolution_notes: row.get(20)?,
        created_at: row.get(21)?,
        assigned_at: row.get(22)?,
        emergency_dispatched_at: row.get(23)?,
        ngo_responded_at: row.get(24)?,
        escalated_at: row.get(25)?,
        resolved_at: row.get(26)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_db::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().expect("failed to open in-memory db");
        run_migrations(&conn).expect("failed to run migrations");
        directory::register_responder(&conn, "ngo-42", "Relief Works", "user-relief-admin")
            .expect("failed to register responder");
        conn
    }

    fn report(conn: &Connection) -> Incident {
        create_incident(
            conn,
            &CreateIncidentParams {
                reporter_id: Some("citizen-1".to_string()),
                incident_type: "flood".to_string(),
                severity: "critical".to_string(),
                latitude: 12.9,
                longitude: 77.6,
                address: None,
                city: Some("Bengaluru".to_string()),
                state: Some("Karnataka".to_string()),
                description: Some("river overflow".to_string()),
                people_affected: 120,
                casualties: false,
                terror_related: false,
                aid_needed: Some("boats".to_string()),
            },
        )
        .expect("create should succeed")
    }

    /// The `assigned_at` iff `assigned_ngo` and escalation-field invariants
    /// from the data model, checked after a transition.
    fn assert_invariants(incident: &Incident) {
        assert_eq!(incident.assigned_at.is_some(), incident.assigned_ngo.is_some());
        assert_eq!(incident.escalated_at.is_some(), incident.escalated_to_gov);
        assert_eq!(incident.danger_scale.is_some(), incident.escalated_to_gov);
        assert_eq!(
            incident.escalation_reason.is_some(),
            incident.escalated_to_gov
        );
        assert_eq!(
            incident.resolved_at.is_some(),
            incident.status == IncidentStatus::Resolved
        );
    }

    #[test]
    fn create_starts_reported_with_no_milestones() {
        let conn = setup_db();
        let incident = report(&conn);

        assert_eq!(incident.status, IncidentStatus::Reported);
        assert_eq!(incident.severity, Severity::Critical);
        assert!(incident.assigned_ngo.is_none());
        assert!(incident.assigned_at.is_none());
        assert!(incident.escalated_at.is_none());
        assert!(incident.resolved_at.is_none());
        assert_invariants(&incident);
    }

    #[test]
    fn create_rejects_unknown_severity() {
        let conn = setup_db();
        let err = create_incident(
            &conn,
            &CreateIncidentParams {
                reporter_id: None,
                incident_type: "fire".to_string(),
                severity: "catastrophic".to_string(),
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
            },
        )
        .unwrap_err();
        assert!(matches!(err, IncidentError::Validation(_)));
    }

    #[test]
    fn assign_sets_responder_and_timestamp_together() {
        let conn = setup_db();
        let incident = report(&conn);

        let (assigned, event) =
            assign_incident(&conn, &incident.incident_id, "ngo-42").expect("assign should succeed");
        assert_eq!(assigned.status, IncidentStatus::AssignedNgo);
        assert_eq!(assigned.assigned_ngo.as_deref(), Some("ngo-42"));
        assert!(assigned.assigned_at.is_some());
        assert_invariants(&assigned);

        assert_eq!(event.kind, EventKind::IncidentAssigned);
        assert_eq!(event.incident_id, incident.incident_id);
        assert_eq!(event.payload["responder_id"], "ngo-42");
    }

    #[test]
    fn assign_unknown_responder_is_not_found() {
        let conn = setup_db();
        let incident = report(&conn);
        let err = assign_incident(&conn, &incident.incident_id, "ngo-ghost").unwrap_err();
        assert!(matches!(err, IncidentError::NotFound(_)));
    }

    #[test]
    fn double_assign_fails_and_leaves_assignment_unchanged() {
        let conn = setup_db();
        let incident = report(&conn);
        directory::register_responder(&conn, "ngo-7", "Other Org", "user-other")
            .expect("register should succeed");

        let (first, _) =
            assign_incident(&conn, &incident.incident_id, "ngo-42").expect("assign should succeed");
        let err = assign_incident(&conn, &incident.incident_id, "ngo-7").unwrap_err();
        assert!(matches!(
            err,
            IncidentError::InvalidTransition {
                from: IncidentStatus::AssignedNgo,
                to: IncidentStatus::AssignedNgo,
            }
        ));

        let after = get_incident(&conn, &incident.incident_id).expect("get should succeed");
        assert_eq!(after.assigned_ngo, first.assigned_ngo);
        assert_eq!(after.assigned_at, first.assigned_at);
    }

    #[test]
    fn escalate_is_valid_from_every_non_terminal_state() {
        let conn = setup_db();

        // Straight from reported, never assigned.
        let incident = report(&conn);
        let (escalated, event) =
            escalate_incident(&conn, &incident.incident_id, 4, "mass casualty", None)
                .expect("escalate from reported should succeed");
        assert_eq!(escalated.status, IncidentStatus::EscalatedGov);
        assert!(escalated.escalated_to_gov);
        assert_eq!(escalated.danger_scale, Some(4));
        assert_eq!(escalated.escalation_reason.as_deref(), Some("mass casualty"));
        assert_invariants(&escalated);
        assert_eq!(event.kind, EventKind::IncidentEscalated);

        // From an in-progress response.
        let other = report(&conn);
        assign_incident(&conn, &other.incident_id, "ngo-42").expect("assign should succeed");
        transition_incident(&conn, &other.incident_id, IncidentStatus::NgoResponding, None)
            .expect("transition should succeed");
        let (escalated, _) =
            escalate_incident(&conn, &other.incident_id, 5, "situation worsening", Some("2cr"))
                .expect("escalate from ngo_responding should succeed");
        assert_eq!(escalated.status, IncidentStatus::EscalatedGov);
        assert_eq!(escalated.financial_aid_estimate.as_deref(), Some("2cr"));
    }

    #[test]
    fn escalate_rejects_out_of_range_danger_scale() {
        let conn = setup_db();
        let incident = report(&conn);
        for scale in [0, 6, -1] {
            let err = escalate_incident(&conn, &incident.incident_id, scale, "x", None)
                .unwrap_err();
            assert!(matches!(err, IncidentError::Validation(_)), "scale {scale}");
        }
        // Bounds themselves are accepted.
        escalate_incident(&conn, &incident.incident_id, 1, "minor", None)
            .expect("scale 1 should be accepted");
    }

    #[test]
    fn resolved_is_terminal_for_every_target() {
        let conn = setup_db();
        let incident = report(&conn);
        transition_incident(&conn, &incident.incident_id, IncidentStatus::Resolved, None)
            .expect("resolve should succeed");

        for target in [
            IncidentStatus::Reported,
            IncidentStatus::AssignedNgo,
            IncidentStatus::EmergencyDispatched,
            IncidentStatus::NgoResponding,
            IncidentStatus::EscalatedGov,
            IncidentStatus::Resolved,
        ] {
            let err = transition_incident(&conn, &incident.incident_id, target, None)
                .unwrap_err();
            assert!(
                matches!(err, IncidentError::InvalidTransition { .. }),
                "target {target}"
            );
        }
        let err = assign_incident(&conn, &incident.incident_id, "ngo-42").unwrap_err();
        assert!(matches!(err, IncidentError::InvalidTransition { .. }));
        let err = escalate_incident(&conn, &incident.incident_id, 3, "too late", None).unwrap_err();
        assert!(matches!(err, IncidentError::InvalidTransition { .. }));
    }

    #[test]
    fn transitions_are_forward_only() {
        let conn = setup_db();
        let incident = report(&conn);
        assign_incident(&conn, &incident.incident_id, "ngo-42").expect("assign should succeed");
        transition_incident(
            &conn,
            &incident.incident_id,
            IncidentStatus::EmergencyDispatched,
            None,
        )
        .expect("forward transition should succeed");

        // Backwards and same-state are rejected.
        for target in [IncidentStatus::Reported, IncidentStatus::EmergencyDispatched] {
            let err = transition_incident(&conn, &incident.incident_id, target, None)
                .unwrap_err();
            assert!(matches!(err, IncidentError::InvalidTransition { .. }));
        }

        let after = get_incident(&conn, &incident.incident_id).expect("get should succeed");
        assert_eq!(after.status, IncidentStatus::EmergencyDispatched);
        assert!(after.emergency_dispatched_at.is_some());
        assert_invariants(&after);
    }

    #[test]
    fn milestone_timestamps_follow_status() {
        let conn = setup_db();
        let incident = report(&conn);
        assign_incident(&conn, &incident.incident_id, "ngo-42").expect("assign should succeed");

        let (dispatched, _) = transition_incident(
            &conn,
            &incident.incident_id,
            IncidentStatus::EmergencyDispatched,
            None,
        )
        .expect("dispatch should succeed");
        assert!(dispatched.emergency_dispatched_at.is_some());
        assert!(dispatched.ngo_responded_at.is_none());

        let (responding, _) = transition_incident(
            &conn,
            &incident.incident_id,
            IncidentStatus::NgoResponding,
            None,
        )
        .expect("responding should succeed");
        assert!(responding.ngo_responded_at.is_some());

        let (resolved, event) = transition_incident(
            &conn,
            &incident.incident_id,
            IncidentStatus::Resolved,
            Some("contained"),
        )
        .expect("resolve should succeed");
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.resolution_notes.as_deref(), Some("contained"));
        assert_invariants(&resolved);
        assert_eq!(event.kind, EventKind::IncidentStatusChanged);
        assert_eq!(event.payload["status"], "resolved");
        assert_eq!(event.payload["notes"], "contained");
    }

    #[test]
    fn full_lifecycle_scenario() {
        let conn = setup_db();
        let incident = report(&conn);
        assert_eq!(incident.status, IncidentStatus::Reported);

        let (assigned, _) =
            assign_incident(&conn, &incident.incident_id, "ngo-42").expect("assign should succeed");
        assert_eq!(assigned.status, IncidentStatus::AssignedNgo);
        assert!(assigned.assigned_at.is_some());

        let (escalated, _) =
            escalate_incident(&conn, &incident.incident_id, 4, "mass casualty", None)
                .expect("escalate should succeed");
        assert_eq!(escalated.status, IncidentStatus::EscalatedGov);

        let (resolved, _) = transition_incident(
            &conn,
            &incident.incident_id,
            IncidentStatus::Resolved,
            Some("contained"),
        )
        .expect("resolve should succeed");
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert_eq!(resolved.resolution_notes.as_deref(), Some("contained"));

        let err = assign_incident(&conn, &incident.incident_id, "ngo-42").unwrap_err();
        assert!(matches!(err, IncidentError::InvalidTransition { .. }));
    }

    #[test]
    fn reporter_history_is_newest_first() {
        let conn = setup_db();
        let first = report(&conn);
        let second = report(&conn);

        let history =
            list_incidents_by_reporter(&conn, "citizen-1").expect("history should succeed");
        assert_eq!(history.len(), 2);
        let ids: Vec<&str> = history.iter().map(|i| i.incident_id.as_str()).collect();
        assert!(ids.contains(&first.incident_id.as_str()));
        assert!(ids.contains(&second.incident_id.as_str()));
        assert!(history[0].created_at >= history[1].created_at);

        assert!(list_incidents_by_reporter(&conn, "citizen-2")
            .expect("history should succeed")
            .is_empty());
    }

    /// Two racing transitions with conflicting targets: exactly one commits,
    /// the other observes `InvalidTransition`, and the persisted row matches
    /// the winner.
    #[test]
    fn concurrent_transitions_serialize_per_incident() {
        use std::sync::Barrier;

        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("race.db");
        let pool = beacon_db::create_pool(
            path.to_str().unwrap(),
            beacon_db::DbRuntimeSettings::default(),
        )
        .expect("pool creation should succeed");
        {
            let conn = pool.get().expect("should get connection");
            run_migrations(&conn).expect("migrations should succeed");
            directory::register_responder(&conn, "ngo-42", "Relief Works", "user-relief-admin")
                .expect("register should succeed");
        }
        let incident = {
            let conn = pool.get().expect("should get connection");
            report(&conn)
        };

        let barrier = std::sync::Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for notes in ["resolved by alpha team", "resolved by bravo team"] {
            let pool = pool.clone();
            let barrier = barrier.clone();
            let incident_id = incident.incident_id.clone();
            handles.push(std::thread::spawn(move || {
                let conn = pool.get().expect("should get connection");
                barrier.wait();
                transition_incident(&conn, &incident_id, IncidentStatus::Resolved, Some(notes))
                    .map(|(incident, _)| incident)
                    .map_err(|e| (e, notes))
            }));
        }

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
        let losers: Vec<_> = results.iter().filter(|r| r.is_err()).collect();
        assert_eq!(winners.len(), 1, "exactly one transition must win");
        assert_eq!(losers.len(), 1, "exactly one transition must lose");

        if let Err((err, _)) = losers[0] {
            assert!(matches!(err, IncidentError::InvalidTransition { .. }));
        }

        let winner_notes = winners[0]
            .as_ref()
            .ok()
            .and_then(|i| i.resolution_notes.clone());
        let conn = pool.get().expect("should get connection");
        let final_state =
            get_incident(&conn, &incident.incident_id).expect("get should succeed");
        assert_eq!(final_state.status, IncidentStatus::Resolved);
        assert_eq!(final_state.resolution_notes, winner_notes);
    }
}
