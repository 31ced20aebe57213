//! HTTP implementation of the directory contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::DirectoryApi;
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{
    Assignment, EscalationPolicy, Incident, LayerUser, Oncall, Reference, Schedule, Service, Team,
    User, UserRole,
};
use crate::retry::RetryConfig;

/// Default API endpoint.
const DEFAULT_BASE_URL: &str = "https://api.pagerduty.com";

/// Page size for list endpoints.
const PAGE_LIMIT: usize = 100;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// API base URL. Overridable for tests and on-prem deployments.
    pub base_url: String,
    /// Per-call timeout. A call that exceeds it fails as `Unavailable`.
    pub timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Typed HTTP client for the directory API.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
    retry: RetryConfig,
}

impl DirectoryClient {
    /// Create a new client with the given bearer token.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: impl Into<String>, config: DirectoryConfig) -> DirectoryResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.pagerduty+json;version=2"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("oncall-lifecycle/0.3"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            token: token.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry,
        })
    }

    /// Send one request, retrying transient failures per the retry policy.
    ///
    /// `resource` is a short human-readable label used in error diagnostics.
    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
        resource: &str,
    ) -> DirectoryResult<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0u32;

        loop {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(AUTHORIZATION, format!("Token token={}", self.token));
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(b) = body {
                request = request.json(b);
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => Self::error_from_response(response, resource).await,
                Err(e) if e.is_timeout() || e.is_connect() => DirectoryError::Unavailable {
                    status: None,
                    message: e.to_string(),
                },
                Err(e) => DirectoryError::Http(e),
            };

            if error.is_transient() && self.retry.should_retry(attempt) {
                let delay = match &error {
                    DirectoryError::RateLimited { retry_after_secs } if *retry_after_secs > 0 => {
                        Duration::from_secs(*retry_after_secs)
                    }
                    _ => self.retry.delay_for_attempt(attempt),
                };
                warn!(
                    attempt,
                    error = %error,
                    delay_secs = delay.as_secs(),
                    resource,
                    "Transient directory error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(error);
        }
    }

    /// Map a non-success response to a machine-readable error kind.
    async fn error_from_response(response: reqwest::Response, resource: &str) -> DirectoryError {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return DirectoryError::RateLimited { retry_after_secs };
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map_or_else(|_| body.clone(), |e| e.error.message);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DirectoryError::AuthFailure {
                status: status.as_u16(),
            },
            StatusCode::NOT_FOUND => DirectoryError::NotFound {
                resource: resource.to_string(),
            },
            StatusCode::CONFLICT => DirectoryError::Conflict {
                resource: resource.to_string(),
                message,
            },
            s if s.is_server_error() => DirectoryError::Unavailable {
                status: Some(s.as_u16()),
                message,
            },
            s => DirectoryError::Api {
                status: s.as_u16(),
                message,
            },
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
        resource: &str,
    ) -> DirectoryResult<T> {
        let response = self
            .send::<()>(Method::GET, path, query, None, resource)
            .await?;
        Ok(response.json().await?)
    }

    async fn put_json<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        resource: &str,
    ) -> DirectoryResult<T> {
        let response = self
            .send(Method::PUT, path, &[], Some(body), resource)
            .await?;
        Ok(response.json().await?)
    }

    /// Fetch every page of a list endpoint, following the `more` flag.
    async fn list_paginated<P: PageEnvelope>(
        &self,
        path: &str,
        base_query: &[(String, String)],
        resource: &str,
    ) -> DirectoryResult<Vec<P::Item>> {
        let mut items = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut query = base_query.to_vec();
            query.push(("limit".to_string(), PAGE_LIMIT.to_string()));
            query.push(("offset".to_string(), offset.to_string()));

            let page: P = self.get_json(path, &query, resource).await?;
            let (batch, more) = page.into_parts();
            let fetched = batch.len();
            items.extend(batch);

            if !more || fetched == 0 {
                break;
            }
            offset += fetched;
        }

        debug!(resource, count = items.len(), "Fetched paginated list");
        Ok(items)
    }

    async fn update_incident(
        &self,
        incident_id: &str,
        change: IncidentChange,
    ) -> DirectoryResult<Incident> {
        let body = IncidentUpdateBody { incident: change };
        let envelope: IncidentEnvelope = self
            .put_json(
                &format!("/incidents/{incident_id}"),
                &body,
                &format!("incident {incident_id}"),
            )
            .await?;
        Ok(envelope.incident)
    }
}

#[async_trait]
impl DirectoryApi for DirectoryClient {
    async fn get_user_by_email(&self, email: &str) -> DirectoryResult<Option<User>> {
        let query = vec![
            ("query".to_string(), email.to_string()),
            ("limit".to_string(), PAGE_LIMIT.to_string()),
        ];
        let page: UsersPage = self.get_json("/users", &query, "user search").await?;
        Ok(page
            .users
            .into_iter()
            .find(|u| u.email.eq_ignore_ascii_case(email)))
    }

    async fn get_user_by_id(&self, id: &str) -> DirectoryResult<User> {
        let envelope: UserEnvelope = self
            .get_json(&format!("/users/{id}"), &[], &format!("user {id}"))
            .await?;
        Ok(envelope.user)
    }

    async fn create_user(&self, email: &str, name: &str, role: UserRole) -> DirectoryResult<User> {
        let body = CreateUserBody {
            user: NewUser {
                kind: "user",
                name,
                email,
                role,
            },
        };
        let response = self
            .send(
                Method::POST,
                "/users",
                &[],
                Some(&body),
                &format!("user {email}"),
            )
            .await?;
        let envelope: UserEnvelope = response.json().await?;
        debug!(user_id = %envelope.user.id, email, "User created");
        Ok(envelope.user)
    }

    async fn delete_user(&self, id: &str) -> DirectoryResult<()> {
        self.send::<()>(
            Method::DELETE,
            &format!("/users/{id}"),
            &[],
            None,
            &format!("user {id}"),
        )
        .await?;
        debug!(user_id = id, "User deleted");
        Ok(())
    }

    async fn list_teams(&self) -> DirectoryResult<Vec<Team>> {
        self.list_paginated::<TeamsPage>("/teams", &[], "teams").await
    }

    async fn add_user_to_team(&self, team_id: &str, user_id: &str) -> DirectoryResult<()> {
        self.send(
            Method::PUT,
            &format!("/teams/{team_id}/users/{user_id}"),
            &[],
            Some(&serde_json::json!({})),
            &format!("team {team_id}"),
        )
        .await?;
        Ok(())
    }

    async fn list_escalation_policies(&self) -> DirectoryResult<Vec<EscalationPolicy>> {
        self.list_paginated::<PoliciesPage>("/escalation_policies", &[], "escalation policies")
            .await
    }

    async fn get_escalation_policy(&self, id: &str) -> DirectoryResult<EscalationPolicy> {
        let envelope: PolicyEnvelope = self
            .get_json(
                &format!("/escalation_policies/{id}"),
                &[],
                &format!("escalation policy {id}"),
            )
            .await?;
        Ok(envelope.escalation_policy)
    }

    async fn add_user_to_level(
        &self,
        policy_id: &str,
        user_id: &str,
        level: u32,
    ) -> DirectoryResult<bool> {
        let mut policy = self.get_escalation_policy(policy_id).await?;
        let rule_count = policy.escalation_rules.len();
        let index = usize::try_from(level).unwrap_or(usize::MAX);
        if index == 0 || index > rule_count {
            return Err(DirectoryError::Validation(format!(
                "level {level} out of range for policy {policy_id} ({rule_count} levels)"
            )));
        }

        let rule = &mut policy.escalation_rules[index - 1];
        if rule.contains_user(user_id) {
            return Ok(false);
        }
        rule.targets.push(Reference::user(user_id));

        let _: PolicyEnvelope = self
            .put_json(
                &format!("/escalation_policies/{policy_id}"),
                &PutPolicyBody {
                    escalation_policy: &policy,
                },
                &format!("escalation policy {policy_id}"),
            )
            .await?;
        debug!(policy_id, user_id, level, "Added user to escalation level");
        Ok(true)
    }

    async fn remove_user_from_all_levels(
        &self,
        policy_id: &str,
        user_id: &str,
    ) -> DirectoryResult<bool> {
        let mut policy = self.get_escalation_policy(policy_id).await?;
        let mut changed = false;
        for rule in &mut policy.escalation_rules {
            let before = rule.targets.len();
            rule.targets.retain(|t| !t.is_user(user_id));
            changed |= rule.targets.len() != before;
        }
        if !changed {
            return Ok(false);
        }

        let _: PolicyEnvelope = self
            .put_json(
                &format!("/escalation_policies/{policy_id}"),
                &PutPolicyBody {
                    escalation_policy: &policy,
                },
                &format!("escalation policy {policy_id}"),
            )
            .await?;
        debug!(policy_id, user_id, "Removed user from all escalation levels");
        Ok(true)
    }

    async fn list_schedules(&self) -> DirectoryResult<Vec<Schedule>> {
        self.list_paginated::<SchedulesPage>("/schedules", &[], "schedules")
            .await
    }

    async fn get_schedule(&self, id: &str) -> DirectoryResult<Schedule> {
        let envelope: ScheduleEnvelope = self
            .get_json(&format!("/schedules/{id}"), &[], &format!("schedule {id}"))
            .await?;
        Ok(envelope.schedule)
    }

    async fn get_schedule_by_name(&self, name: &str) -> DirectoryResult<Option<Schedule>> {
        let query = vec![("query".to_string(), name.to_string())];
        let page: SchedulesPage = self.get_json("/schedules", &query, "schedule search").await?;
        Ok(page
            .schedules
            .into_iter()
            .find(|s| s.name.eq_ignore_ascii_case(name)))
    }

    async fn add_user_to_schedule_layer(
        &self,
        schedule_id: &str,
        layer_id: Option<&str>,
        user_id: &str,
        interval: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> DirectoryResult<bool> {
        let mut schedule = self.get_schedule(schedule_id).await?;
        if schedule.schedule_layers.is_empty() {
            return Err(DirectoryError::Validation(format!(
                "schedule {schedule_id} has no layers"
            )));
        }

        let layer = match layer_id {
            Some(id) => schedule
                .schedule_layers
                .iter_mut()
                .find(|l| l.id == id)
                .ok_or_else(|| {
                    DirectoryError::Validation(format!(
                        "layer {id} not found on schedule {schedule_id}"
                    ))
                })?,
            None => &mut schedule.schedule_layers[0],
        };

        if layer.contains_user(user_id) {
            return Ok(false);
        }
        layer.users.push(LayerUser {
            user: Reference::user(user_id),
            start: interval.map(|(start, _)| start),
            end: interval.map(|(_, end)| end),
        });

        let _: ScheduleEnvelope = self
            .put_json(
                &format!("/schedules/{schedule_id}"),
                &PutScheduleBody {
                    schedule: &schedule,
                },
                &format!("schedule {schedule_id}"),
            )
            .await?;
        debug!(schedule_id, user_id, "Added user to schedule layer");
        Ok(true)
    }

    async fn remove_user_from_schedules(
        &self,
        schedule_id: &str,
        user_id: &str,
    ) -> DirectoryResult<bool> {
        let mut schedule = self.get_schedule(schedule_id).await?;
        let mut changed = false;
        for layer in &mut schedule.schedule_layers {
            let before = layer.users.len();
            layer.users.retain(|u| !u.user.is_user(user_id));
            changed |= layer.users.len() != before;
        }
        if !changed {
            return Ok(false);
        }

        let _: ScheduleEnvelope = self
            .put_json(
                &format!("/schedules/{schedule_id}"),
                &PutScheduleBody {
                    schedule: &schedule,
                },
                &format!("schedule {schedule_id}"),
            )
            .await?;
        debug!(schedule_id, user_id, "Removed user from schedule layers");
        Ok(true)
    }

    async fn list_oncalls_for_user(&self, user_id: &str) -> DirectoryResult<Vec<Oncall>> {
        let query = vec![("user_ids[]".to_string(), user_id.to_string())];
        self.list_paginated::<OncallsPage>("/oncalls", &query, "oncalls")
            .await
    }

    async fn list_open_incidents_for_user(&self, user_id: &str) -> DirectoryResult<Vec<Incident>> {
        let query = vec![
            ("user_ids[]".to_string(), user_id.to_string()),
            ("statuses[]".to_string(), "triggered".to_string()),
            ("statuses[]".to_string(), "acknowledged".to_string()),
        ];
        self.list_paginated::<IncidentsPage>("/incidents", &query, "incidents")
            .await
    }

    async fn get_incident(&self, id: &str) -> DirectoryResult<Incident> {
        let envelope: IncidentEnvelope = self
            .get_json(&format!("/incidents/{id}"), &[], &format!("incident {id}"))
            .await?;
        Ok(envelope.incident)
    }

    async fn reassign_incident_to_user(
        &self,
        incident_id: &str,
        user_id: &str,
    ) -> DirectoryResult<Incident> {
        self.update_incident(
            incident_id,
            IncidentChange {
                kind: "incident_reference",
                status: None,
                assignments: Some(vec![Assignment {
                    assignee: Reference::user(user_id),
                }]),
                escalation_policy: None,
            },
        )
        .await
    }

    async fn reassign_incident_to_policy(
        &self,
        incident_id: &str,
        policy_id: &str,
    ) -> DirectoryResult<Incident> {
        self.update_incident(
            incident_id,
            IncidentChange {
                kind: "incident_reference",
                status: None,
                assignments: None,
                escalation_policy: Some(Reference::escalation_policy(policy_id)),
            },
        )
        .await
    }

    async fn acknowledge_incident(&self, id: &str) -> DirectoryResult<Incident> {
        self.update_incident(
            id,
            IncidentChange {
                kind: "incident_reference",
                status: Some("acknowledged"),
                assignments: None,
                escalation_policy: None,
            },
        )
        .await
    }

    async fn resolve_incident(&self, id: &str) -> DirectoryResult<Incident> {
        self.update_incident(
            id,
            IncidentChange {
                kind: "incident_reference",
                status: Some("resolved"),
                assignments: None,
                escalation_policy: None,
            },
        )
        .await
    }

    async fn list_services(&self) -> DirectoryResult<Vec<Service>> {
        self.list_paginated::<ServicesPage>("/services", &[], "services")
            .await
    }
}

// =============================================================================
// Wire envelopes (internal)
// =============================================================================

/// Error body shape: `{ "error": { "message": ... } }`.
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// One page of a list endpoint.
trait PageEnvelope: DeserializeOwned {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, bool);
}

#[derive(Deserialize)]
struct UsersPage {
    users: Vec<User>,
    #[serde(default)]
    more: bool,
}

impl PageEnvelope for UsersPage {
    type Item = User;
    fn into_parts(self) -> (Vec<User>, bool) {
        (self.users, self.more)
    }
}

#[derive(Deserialize)]
struct TeamsPage {
    teams: Vec<Team>,
    #[serde(default)]
    more: bool,
}

impl PageEnvelope for TeamsPage {
    type Item = Team;
    fn into_parts(self) -> (Vec<Team>, bool) {
        (self.teams, self.more)
    }
}

#[derive(Deserialize)]
struct PoliciesPage {
    escalation_policies: Vec<EscalationPolicy>,
    #[serde(default)]
    more: bool,
}

impl PageEnvelope for PoliciesPage {
    type Item = EscalationPolicy;
    fn into_parts(self) -> (Vec<EscalationPolicy>, bool) {
        (self.escalation_policies, self.more)
    }
}

#[derive(Deserialize)]
struct SchedulesPage {
    schedules: Vec<Schedule>,
    #[serde(default)]
    more: bool,
}

impl PageEnvelope for SchedulesPage {
    type Item = Schedule;
    fn into_parts(self) -> (Vec<Schedule>, bool) {
        (self.schedules, self.more)
    }
}

#[derive(Deserialize)]
struct OncallsPage {
    oncalls: Vec<Oncall>,
    #[serde(default)]
    more: bool,
}

impl PageEnvelope for OncallsPage {
    type Item = Oncall;
    fn into_parts(self) -> (Vec<Oncall>, bool) {
        (self.oncalls, self.more)
    }
}

#[derive(Deserialize)]
struct IncidentsPage {
    incidents: Vec<Incident>,
    #[serde(default)]
    more: bool,
}

impl PageEnvelope for IncidentsPage {
    type Item = Incident;
    fn into_parts(self) -> (Vec<Incident>, bool) {
        (self.incidents, self.more)
    }
}

#[derive(Deserialize)]
struct ServicesPage {
    services: Vec<Service>,
    #[serde(default)]
    more: bool,
}

impl PageEnvelope for ServicesPage {
    type Item = Service;
    fn into_parts(self) -> (Vec<Service>, bool) {
        (self.services, self.more)
    }
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct PolicyEnvelope {
    escalation_policy: EscalationPolicy,
}

#[derive(Deserialize)]
struct ScheduleEnvelope {
    schedule: Schedule,
}

#[derive(Deserialize)]
struct IncidentEnvelope {
    incident: Incident,
}

#[derive(Serialize)]
struct CreateUserBody<'a> {
    user: NewUser<'a>,
}

#[derive(Serialize)]
struct NewUser<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    email: &'a str,
    role: UserRole,
}

#[derive(Serialize)]
struct PutPolicyBody<'a> {
    escalation_policy: &'a EscalationPolicy,
}

#[derive(Serialize)]
struct PutScheduleBody<'a> {
    schedule: &'a Schedule,
}

#[derive(Serialize)]
struct IncidentUpdateBody {
    incident: IncidentChange,
}

#[derive(Serialize)]
struct IncidentChange {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignments: Option<Vec<Assignment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    escalation_policy: Option<Reference>,
}
