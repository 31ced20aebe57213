//! The directory API contract consumed by orchestration code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DirectoryResult;
use crate::models::{
    EscalationPolicy, Incident, Oncall, Schedule, Service, Team, User, UserRole,
};

/// Request/response contract against the remote directory.
///
/// Implemented by [`DirectoryClient`](crate::DirectoryClient) over HTTP, and
/// by in-memory fakes in tests. Methods never orchestrate: each maps to one
/// logical remote operation (some are read-modify-write under the hood, the
/// way the service's own update endpoints work).
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    /// Look a user up by email. Absence is a normal outcome for searches.
    async fn get_user_by_email(&self, email: &str) -> DirectoryResult<Option<User>>;

    /// Fetch a user by id. Absence surfaces as `NotFound`.
    async fn get_user_by_id(&self, id: &str) -> DirectoryResult<User>;

    /// Create a new user.
    async fn create_user(&self, email: &str, name: &str, role: UserRole) -> DirectoryResult<User>;

    /// Delete a user. A missing user surfaces as `NotFound`; callers decide
    /// whether that counts as success.
    async fn delete_user(&self, id: &str) -> DirectoryResult<()>;

    /// List all teams.
    async fn list_teams(&self) -> DirectoryResult<Vec<Team>>;

    /// Add a user to a team. Idempotent on the service side.
    async fn add_user_to_team(&self, team_id: &str, user_id: &str) -> DirectoryResult<()>;

    /// List all escalation policies, rules included.
    async fn list_escalation_policies(&self) -> DirectoryResult<Vec<EscalationPolicy>>;

    /// Fetch one escalation policy with its rules.
    async fn get_escalation_policy(&self, id: &str) -> DirectoryResult<EscalationPolicy>;

    /// Add a user as a direct target at the given 1-based level. Returns
    /// `false` if the user was already targeted at that level.
    async fn add_user_to_level(
        &self,
        policy_id: &str,
        user_id: &str,
        level: u32,
    ) -> DirectoryResult<bool>;

    /// Remove a user from every level of a policy. Returns whether anything
    /// changed.
    async fn remove_user_from_all_levels(
        &self,
        policy_id: &str,
        user_id: &str,
    ) -> DirectoryResult<bool>;

    /// List all schedules (layer membership is only present on [`Self::get_schedule`]).
    async fn list_schedules(&self) -> DirectoryResult<Vec<Schedule>>;

    /// Fetch one schedule with its layers.
    async fn get_schedule(&self, id: &str) -> DirectoryResult<Schedule>;

    /// Look a schedule up by name (exact, case-insensitive).
    async fn get_schedule_by_name(&self, name: &str) -> DirectoryResult<Option<Schedule>>;

    /// Add a user to a schedule layer, optionally bounded to a half-open
    /// `[start, end)` interval. Targets the named layer, or the first layer
    /// when `layer_id` is `None`. Returns `false` if already present.
    async fn add_user_to_schedule_layer(
        &self,
        schedule_id: &str,
        layer_id: Option<&str>,
        user_id: &str,
        interval: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> DirectoryResult<bool>;

    /// Remove a user from every layer of a schedule. Returns whether
    /// anything changed.
    async fn remove_user_from_schedules(
        &self,
        schedule_id: &str,
        user_id: &str,
    ) -> DirectoryResult<bool>;

    /// Current on-call entries for a user.
    async fn list_oncalls_for_user(&self, user_id: &str) -> DirectoryResult<Vec<Oncall>>;

    /// Open (triggered or acknowledged) incidents assigned to a user.
    async fn list_open_incidents_for_user(&self, user_id: &str) -> DirectoryResult<Vec<Incident>>;

    /// Fetch one incident.
    async fn get_incident(&self, id: &str) -> DirectoryResult<Incident>;

    /// Reassign an incident to a specific user.
    async fn reassign_incident_to_user(
        &self,
        incident_id: &str,
        user_id: &str,
    ) -> DirectoryResult<Incident>;

    /// Reassign an incident to an escalation policy, letting the service's
    /// own routing pick the responder.
    async fn reassign_incident_to_policy(
        &self,
        incident_id: &str,
        policy_id: &str,
    ) -> DirectoryResult<Incident>;

    /// Acknowledge an incident.
    async fn acknowledge_incident(&self, id: &str) -> DirectoryResult<Incident>;

    /// Resolve an incident.
    async fn resolve_incident(&self, id: &str) -> DirectoryResult<Incident>;

    /// List all services.
    async fn list_services(&self) -> DirectoryResult<Vec<Service>>;

    /// Resolve a service name to its escalation policy id, if any.
    async fn policy_id_for_service(&self, service_name: &str) -> DirectoryResult<Option<String>> {
        let services = self.list_services().await?;
        Ok(services
            .into_iter()
            .find(|s| s.name.eq_ignore_ascii_case(service_name))
            .and_then(|s| s.escalation_policy.map(|p| p.id)))
    }
}
