//! Wire types for the directory API (v2 JSON shapes).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reference to another API resource (`*_reference` objects).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(rename = "type")]
    pub ref_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Reference {
    /// Build a typed reference, e.g. `Reference::new("PABC123", "user_reference")`.
    #[must_use]
    pub fn new(id: impl Into<String>, ref_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ref_type: ref_type.into(),
            summary: None,
        }
    }

    /// Reference to a user.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, "user_reference")
    }

    /// Reference to an escalation policy.
    #[must_use]
    pub fn escalation_policy(id: impl Into<String>) -> Self {
        Self::new(id, "escalation_policy_reference")
    }

    /// Whether this reference points at the given user.
    #[must_use]
    pub fn is_user(&self, user_id: &str) -> bool {
        self.ref_type == "user_reference" && self.id == user_id
    }
}

/// Base role of a directory user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Manager,
    Responder,
    Owner,
    User,
    LimitedUser,
    Observer,
    RestrictedAccess,
}

impl UserRole {
    /// Roles that the service routes to the top of an escalation chain by
    /// default (matches the service's own onboarding convention).
    #[must_use]
    pub const fn defaults_to_first_level(self) -> bool {
        matches!(self, Self::User | Self::LimitedUser)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Responder => "responder",
            Self::Owner => "owner",
            Self::User => "user",
            Self::LimitedUser => "limited_user",
            Self::Observer => "observer",
            Self::RestrictedAccess => "restricted_access",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "responder" => Ok(Self::Responder),
            "owner" => Ok(Self::Owner),
            "user" => Ok(Self::User),
            "limited_user" | "limited" => Ok(Self::LimitedUser),
            "observer" => Ok(Self::Observer),
            "restricted_access" => Ok(Self::RestrictedAccess),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A directory user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<Reference>,
}

/// A team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
}

/// One rule (level) of an escalation policy. Rule order is level order:
/// the first rule is level 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub targets: Vec<Reference>,
}

impl EscalationRule {
    /// Whether this rule targets the given user directly.
    #[must_use]
    pub fn contains_user(&self, user_id: &str) -> bool {
        self.targets.iter().any(|t| t.is_user(user_id))
    }
}

/// An escalation policy: an ordered chain of rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,
}

impl EscalationPolicy {
    /// 1-based level indexes in which the user appears as a direct target.
    #[must_use]
    pub fn levels_containing(&self, user_id: &str) -> Vec<u32> {
        self.escalation_rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.contains_user(user_id))
            .map(|(idx, _)| u32::try_from(idx).unwrap_or(u32::MAX).saturating_add(1))
            .collect()
    }

    /// Whether the user is a direct target at any level.
    #[must_use]
    pub fn contains_user(&self, user_id: &str) -> bool {
        self.escalation_rules.iter().any(|r| r.contains_user(user_id))
    }

    /// All user ids targeted anywhere in the policy, deduplicated and ordered.
    #[must_use]
    pub fn user_ids(&self) -> BTreeSet<String> {
        self.escalation_rules
            .iter()
            .flat_map(|r| &r.targets)
            .filter(|t| t.ref_type == "user_reference")
            .map(|t| t.id.clone())
            .collect()
    }
}

/// A member of a schedule layer, optionally bounded to a half-open
/// `[start, end)` interval. Absent interval means the rotation default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerUser {
    pub user: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// One layer of an on-call schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLayer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub users: Vec<LayerUser>,
}

impl ScheduleLayer {
    /// Whether this layer includes the given user.
    #[must_use]
    pub fn contains_user(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u.user.is_user(user_id))
    }
}

/// An on-call schedule. List endpoints omit `schedule_layers`; fetch the
/// schedule by id to see layer membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub schedule_layers: Vec<ScheduleLayer>,
}

/// A current on-call entry for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oncall {
    pub escalation_policy: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Incident lifecycle status. Ordered and monotonic; `resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Triggered,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    /// Open means a responder still owes action.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Triggered | Self::Acknowledged)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An assignment of an incident to a responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignee: Reference,
}

/// An incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: IncidentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_policy: Option<Reference>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

impl Incident {
    /// Whether the incident is currently assigned to the given user.
    #[must_use]
    pub fn assigned_to(&self, user_id: &str) -> bool {
        self.assignments.iter().any(|a| a.assignee.is_user(user_id))
    }
}

/// A service, carrying the escalation policy incidents on it route through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_policy: Option<Reference>,
}
