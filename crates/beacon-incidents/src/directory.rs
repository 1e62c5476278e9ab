//! Responder and government authority directory.
//!
//! This is the identity seam the notification layer routes through: a
//! responder reference resolves to the owner user id used for its personal
//! channel, and approved government jurisdictions are the candidate targets
//! for escalation routing. Credential handling lives elsewhere entirely.

use crate::IncidentError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A responder organization (NGO or volunteer group).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Responder {
    pub responder_id: String,
    pub name: String,
    /// Routable user id of the organization's owner/admin.
    pub owner_user_id: String,
}

/// An approved government authority account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GovAuthority {
    /// Free-text administrative region string.
    pub jurisdiction: String,
    pub user_id: String,
}

/// Registers a responder organization.
pub fn register_responder(
    conn: &Connection,
    responder_id: &str,
    name: &str,
    owner_user_id: &str,
) -> Result<Responder, IncidentError> {
    conn.execute(
        "INSERT INTO responders (responder_id, name, owner_user_id) VALUES (?1, ?2, ?3)",
        params![responder_id, name, owner_user_id],
    )?;
    Ok(Responder {
        responder_id: responder_id.to_string(),
        name: name.to_string(),
        owner_user_id: owner_user_id.to_string(),
    })
}

/// Looks up a responder by its public id.
pub fn get_responder(conn: &Connection, responder_id: &str) -> Result<Responder, IncidentError> {
    conn.query_row(
        "SELECT responder_id, name, owner_user_id FROM responders WHERE responder_id = ?1",
        [responder_id],
        map_row_to_responder,
    )
    .optional()?
    .ok_or_else(|| IncidentError::NotFound(format!("responder {responder_id}")))
}

/// Registers a government authority account.
///
/// Only approved accounts participate in escalation routing.
pub fn register_gov_authority(
    conn: &Connection,
    jurisdiction: &str,
    user_id: &str,
    approved: bool,
) -> Result<(), IncidentError> {
    let status = if approved { "approved" } else { "pending" };
    conn.execute(
        "INSERT INTO gov_authorities (jurisdiction, user_id, account_status) VALUES (?1, ?2, ?3)",
        params![jurisdiction, user_id, status],
    )?;
    Ok(())
}

/// Lists approved government authorities in registration order.
///
/// Ordering matters: escalation routing picks the first jurisdiction that
/// matches the incident's region string.
pub fn approved_jurisdictions(conn: &Connection) -> Result<Vec<GovAuthority>, IncidentError> {
    let mut stmt = conn.prepare(
        "SELECT jurisdiction, user_id FROM gov_authorities
         WHERE account_status = 'approved' ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(GovAuthority {
            jurisdiction: row.get(0)?,
            user_id: row.get(1)?,
        })
    })?;
    let mut authorities = Vec::new();
    for row in rows {
        authorities.push(row?);
    }
    Ok(authorities)
}

fn map_row_to_responder(row: &Row) -> rusqlite::Result<Responder> {
    Ok(Responder {
        responder_id: row.get(0)?,
        name: row.get(1)?,
        owner_user_id: row.get(2)?,
    })
}
