//! Shared types and constants for the Beacon incident coordination platform.
//!
//! This crate provides the foundational types used across all Beacon crates:
//! the incident severity and status enumerations, the channel key grammar
//! used by the real-time fan-out layer, and the domain event discriminant.
//!
//! No crate in the workspace depends on anything *except* `beacon-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Severity of a reported incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Returns the canonical string label stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parses a severity string (case-insensitive).
    ///
    /// Returns `None` for anything outside the four recognized levels.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Lifecycle status of an incident.
///
/// The response lifecycle is forward-only:
/// `Reported → AssignedNgo → EmergencyDispatched → NgoResponding → Resolved`,
/// with `EscalatedGov` reachable from any non-terminal state and `Resolved`
/// reachable from any state. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Reported,
    AssignedNgo,
    EmergencyDispatched,
    NgoResponding,
    EscalatedGov,
    Resolved,
}

impl IncidentStatus {
    /// Returns the canonical string label stored in the database and sent
    /// over the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reported => "reported",
            Self::AssignedNgo => "assigned_ngo",
            Self::EmergencyDispatched => "emergency_dispatched",
            Self::NgoResponding => "ngo_responding",
            Self::EscalatedGov => "escalated_gov",
            Self::Resolved => "resolved",
        }
    }

    /// Parses a status string (case-insensitive).
    ///
    /// Returns `None` for unrecognized strings; callers must reject those,
    /// never silently ignore them.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reported" => Some(Self::Reported),
            "assigned_ngo" => Some(Self::AssignedNgo),
            "emergency_dispatched" => Some(Self::EmergencyDispatched),
            "ngo_responding" => Some(Self::NgoResponding),
            "escalated_gov" => Some(Self::EscalatedGov),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// Position of this status in the forward-only lifecycle ordering.
    ///
    /// A generic transition is legal only toward a strictly greater rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Reported => 0,
            Self::AssignedNgo => 1,
            Self::EmergencyDispatched => 2,
            Self::NgoResponding => 3,
            Self::EscalatedGov => 4,
            Self::Resolved => 5,
        }
    }

    /// Whether this status is terminal. No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved)
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind discriminant for domain events produced by incident transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// An incident was assigned to a responder.
    IncidentAssigned,
    /// An incident was escalated to a government authority.
    IncidentEscalated,
    /// An incident's status changed through the generic transition path.
    IncidentStatusChanged,
}

/// Error returned when a channel key string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid channel key: {0}")]
pub struct ChannelKeyError(pub String);

/// A structured channel key of the form `{domain}:{scope-id}`.
///
/// The four domains are fixed; the scope id is an opaque string. Channels
/// identified by these keys are ephemeral — they exist in the registry only
/// while at least one subscriber is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// Updates for a specific incident: `incident:{incident-id}`.
    Incident(String),
    /// Reports and directives for a responder organization: `ngo:{ngo-id}`.
    Ngo(String),
    /// Escalations for a government jurisdiction: `gov:{jurisdiction}`.
    Gov(String),
    /// Direct notifications for a user: `user:{user-id}`.
    User(String),
}

impl ChannelKey {
    /// Returns the domain prefix of this key.
    pub fn domain(&self) -> &'static str {
        match self {
            Self::Incident(_) => "incident",
            Self::Ngo(_) => "ngo",
            Self::Gov(_) => "gov",
            Self::User(_) => "user",
        }
    }

    /// Returns the opaque scope id of this key.
    pub fn scope(&self) -> &str {
        match self {
            Self::Incident(s) | Self::Ngo(s) | Self::Gov(s) | Self::User(s) => s,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain(), self.scope())
    }
}

impl FromStr for ChannelKey {
    type Err = ChannelKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, scope) = s
            .split_once(':')
            .ok_or_else(|| ChannelKeyError(s.to_string()))?;
        if scope.is_empty() {
            return Err(ChannelKeyError(s.to_string()));
        }
        match domain {
            "incident" => Ok(Self::Incident(scope.to_string())),
            "ngo" => Ok(Self::Ngo(scope.to_string())),
            "gov" => Ok(Self::Gov(scope.to_string())),
            "user" => Ok(Self::User(scope.to_string())),
            _ => Err(ChannelKeyError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!(Severity::parse("CRITICAL"), Some(Severity::Critical));
        assert_eq!(Severity::parse("Low"), Some(Severity::Low));
        assert_eq!(Severity::parse("extreme"), None);
        assert_eq!(Severity::parse(""), None);
    }

    #[test]
    fn status_round_trips_through_labels() {
        for status in [
            IncidentStatus::Reported,
            IncidentStatus::AssignedNgo,
            IncidentStatus::EmergencyDispatched,
            IncidentStatus::NgoResponding,
            IncidentStatus::EscalatedGov,
            IncidentStatus::Resolved,
        ] {
            assert_eq!(IncidentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(IncidentStatus::parse("closed"), None);
    }

    #[test]
    fn status_serde_uses_snake_case() {
        let json = serde_json::to_string(&IncidentStatus::AssignedNgo).unwrap();
        assert_eq!(json, "\"assigned_ngo\"");
        let back: IncidentStatus = serde_json::from_str("\"escalated_gov\"").unwrap();
        assert_eq!(back, IncidentStatus::EscalatedGov);
    }

    #[test]
    fn ranks_are_strictly_increasing() {
        let order = [
            IncidentStatus::Reported,
            IncidentStatus::AssignedNgo,
            IncidentStatus::EmergencyDispatched,
            IncidentStatus::NgoResponding,
            IncidentStatus::EscalatedGov,
            IncidentStatus::Resolved,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert!(IncidentStatus::Resolved.is_terminal());
        assert!(!IncidentStatus::EscalatedGov.is_terminal());
    }

    #[test]
    fn channel_key_display_and_parse() {
        let key = ChannelKey::Incident("abc-123".to_string());
        assert_eq!(key.to_string(), "incident:abc-123");
        assert_eq!("incident:abc-123".parse::<ChannelKey>().unwrap(), key);

        assert_eq!(
            "gov:Tamil Nadu".parse::<ChannelKey>().unwrap(),
            ChannelKey::Gov("Tamil Nadu".to_string())
        );
        assert_eq!(
            "user:u-1".parse::<ChannelKey>().unwrap().domain(),
            "user"
        );
    }

    #[test]
    fn channel_key_rejects_bad_grammar() {
        assert!("incident".parse::<ChannelKey>().is_err());
        assert!("incident:".parse::<ChannelKey>().is_err());
        assert!("region:foo".parse::<ChannelKey>().is_err());
    }
}
