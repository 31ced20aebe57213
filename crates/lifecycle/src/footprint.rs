//! Footprint snapshots: what a user currently touches in the directory.

use std::fmt;

use chrono::{DateTime, Utc};
use directory::{Incident, User};
use serde::Serialize;

/// One category of a footprint read.
///
/// A failed read degrades the category to [`CategorySnapshot::Unknown`] —
/// never to an empty list. Decisions that depend on an unknown category
/// must block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum CategorySnapshot<T> {
    Known(Vec<T>),
    Unknown { error: String },
}

impl<T> CategorySnapshot<T> {
    /// Build an unknown snapshot from a read error.
    pub fn unknown(error: impl fmt::Display) -> Self {
        Self::Unknown {
            error: error.to_string(),
        }
    }

    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }

    /// The items, if the read succeeded.
    #[must_use]
    pub fn known(&self) -> Option<&[T]> {
        match self {
            Self::Known(items) => Some(items),
            Self::Unknown { .. } => None,
        }
    }

    /// Whether the read succeeded and found nothing.
    #[must_use]
    pub fn is_empty_known(&self) -> bool {
        matches!(self, Self::Known(items) if items.is_empty())
    }
}

/// Team membership entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamMembership {
    pub team_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
}

/// Direct escalation-level membership entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyLevelMembership {
    pub policy_id: String,
    pub policy_name: String,
    /// 1-based level index within the policy.
    pub level: u32,
}

/// Schedule-layer membership entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleMembership {
    pub schedule_id: String,
    pub schedule_name: String,
    pub layer_id: String,
    pub layer_name: String,
}

/// An assignment that blocks deletion, found during verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Residual {
    PolicyLevel { policy_id: String, level: u32 },
    Schedule { schedule_id: String, layer_id: String },
    OpenIncident { incident_id: String },
}

impl fmt::Display for Residual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyLevel { policy_id, level } => {
                write!(f, "escalation policy {policy_id} level {level}")
            }
            Self::Schedule {
                schedule_id,
                layer_id,
            } => write!(f, "schedule {schedule_id} layer {layer_id}"),
            Self::OpenIncident { incident_id } => write!(f, "open incident {incident_id}"),
        }
    }
}

/// Point-in-time snapshot of a user's directory associations.
///
/// Snapshots are never reused across stages that need fresh truth;
/// verification always re-resolves.
#[derive(Debug, Clone, Serialize)]
pub struct Footprint {
    pub user: User,
    pub taken_at: DateTime<Utc>,
    pub teams: CategorySnapshot<TeamMembership>,
    pub policy_levels: CategorySnapshot<PolicyLevelMembership>,
    pub schedules: CategorySnapshot<ScheduleMembership>,
    pub open_incidents: CategorySnapshot<Incident>,
}

impl Footprint {
    /// Names of categories whose reads failed.
    #[must_use]
    pub fn unknown_categories(&self) -> Vec<&'static str> {
        let mut unknown = Vec::new();
        if self.teams.is_unknown() {
            unknown.push("teams");
        }
        if self.policy_levels.is_unknown() {
            unknown.push("escalation policy levels");
        }
        if self.schedules.is_unknown() {
            unknown.push("schedules");
        }
        if self.open_incidents.is_unknown() {
            unknown.push("open incidents");
        }
        unknown
    }

    /// Assignments that block deletion. Team memberships do not block.
    #[must_use]
    pub fn residuals(&self) -> Vec<Residual> {
        let mut residuals = Vec::new();
        if let Some(levels) = self.policy_levels.known() {
            residuals.extend(levels.iter().map(|m| Residual::PolicyLevel {
                policy_id: m.policy_id.clone(),
                level: m.level,
            }));
        }
        if let Some(schedules) = self.schedules.known() {
            residuals.extend(schedules.iter().map(|m| Residual::Schedule {
                schedule_id: m.schedule_id.clone(),
                layer_id: m.layer_id.clone(),
            }));
        }
        if let Some(incidents) = self.open_incidents.known() {
            residuals.extend(incidents.iter().map(|i| Residual::OpenIncident {
                incident_id: i.id.clone(),
            }));
        }
        residuals
    }

    /// Whether every category is known and nothing blocks deletion.
    #[must_use]
    pub fn is_deletable(&self) -> bool {
        self.unknown_categories().is_empty() && self.residuals().is_empty()
    }
}
