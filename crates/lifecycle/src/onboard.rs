//! Onboarding: create (or reuse) a user and attach their assignments.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use directory::{DirectoryApi, DirectoryError, EscalationPolicy, User, UserRole};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::LifecycleError;

/// Requested escalation-policy attachment. Without an explicit level the
/// orchestrator consults the [`LevelSelector`], falling back to the
/// role-based default.
#[derive(Debug, Clone)]
pub struct PolicyAttachment {
    pub policy_id: String,
    /// 1-based level index.
    pub level: Option<u32>,
}

/// Requested schedule attachment, optionally bounded to a half-open
/// `[start, end)` interval.
#[derive(Debug, Clone)]
pub struct ScheduleAttachment {
    pub schedule_id: String,
    pub layer_id: Option<String>,
    pub interval: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// One onboarding request. Policy and schedule attachments are mutually
/// exclusive within a single call.
#[derive(Debug, Clone)]
pub struct OnboardingRequest {
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub team_id: Option<String>,
    pub policy: Option<PolicyAttachment>,
    pub schedule: Option<ScheduleAttachment>,
}

/// Chooses an escalation level when the request leaves it open.
///
/// Interactive selection lives outside the core; the orchestrator hands
/// over the policy (levels are its rules, in order) and accepts an index.
#[cfg_attr(test, mockall::automock)]
pub trait LevelSelector: Send + Sync {
    /// Pick a 1-based level for the user within the policy.
    ///
    /// # Errors
    /// Returns an error if no usable level can be chosen.
    fn select(&self, policy: &EscalationPolicy) -> Result<u32, LifecycleError>;
}

/// Attachment steps, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardStep {
    Team,
    PolicyLevel,
    Schedule,
}

impl fmt::Display for OnboardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Team => "team",
            Self::PolicyLevel => "policy level",
            Self::Schedule => "schedule",
        };
        f.write_str(name)
    }
}

/// Outcome of one attachment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    AlreadyPresent,
    Failed { error: String },
    Skipped { reason: String },
}

/// One step's report entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: OnboardStep,
    /// Id of the team/policy/schedule the step targeted.
    pub target: String,
    pub status: StepStatus,
}

/// Structured result of one onboarding run.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardingReport {
    pub user: User,
    /// False when an existing user with the same email was reused.
    pub created: bool,
    pub steps: Vec<StepOutcome>,
}

impl OnboardingReport {
    /// Whether every attempted step applied (or was already in place).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| {
            matches!(
                s.status,
                StepStatus::Applied | StepStatus::AlreadyPresent
            )
        })
    }
}

/// Creates or reuses a user, then applies attachments in order:
/// team, then policy level or schedule.
///
/// Creation is idempotent on email. A step failure stops the remaining
/// steps but never rolls back completed ones.
pub struct OnboardingOrchestrator {
    directory: Arc<dyn DirectoryApi>,
    allowed_domains: Vec<String>,
    level_selector: Option<Arc<dyn LevelSelector>>,
}

impl OnboardingOrchestrator {
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryApi>) -> Self {
        Self {
            directory,
            allowed_domains: Vec::new(),
            level_selector: None,
        }
    }

    /// Restrict onboarding to these email domains. Empty means any.
    #[must_use]
    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = domains;
        self
    }

    /// Collaborator for choosing a level when the request leaves it open.
    #[must_use]
    pub fn with_level_selector(mut self, selector: Arc<dyn LevelSelector>) -> Self {
        self.level_selector = Some(selector);
        self
    }

    /// Run one onboarding request.
    ///
    /// # Errors
    /// Returns `Validation` before any remote call for a malformed request,
    /// and directory errors when the user itself cannot be created or found.
    pub async fn onboard(&self, request: &OnboardingRequest) -> Result<OnboardingReport, LifecycleError> {
        self.validate(request)?;

        let (user, created) = self.find_or_create_user(request).await?;
        info!(
            user_id = %user.id,
            email = %user.email,
            created,
            "Onboarding user"
        );

        let mut steps = Vec::new();
        let mut failed = false;

        if let Some(team_id) = &request.team_id {
            let status = if failed {
                skipped_after_failure()
            } else {
                let status = self.attach_team(team_id, &user).await?;
                failed = matches!(status, StepStatus::Failed { .. });
                status
            };
            steps.push(StepOutcome {
                step: OnboardStep::Team,
                target: team_id.clone(),
                status,
            });
        }

        if let Some(policy) = &request.policy {
            let status = if failed {
                skipped_after_failure()
            } else {
                let status = self.attach_policy_level(policy, &user).await?;
                failed = matches!(status, StepStatus::Failed { .. });
                status
            };
            steps.push(StepOutcome {
                step: OnboardStep::PolicyLevel,
                target: policy.policy_id.clone(),
                status,
            });
        }

        if let Some(schedule) = &request.schedule {
            let status = if failed {
                skipped_after_failure()
            } else {
                self.attach_schedule(schedule, &user).await?
            };
            steps.push(StepOutcome {
                step: OnboardStep::Schedule,
                target: schedule.schedule_id.clone(),
                status,
            });
        }

        Ok(OnboardingReport {
            user,
            created,
            steps,
        })
    }

    /// Reject malformed requests before touching the directory.
    fn validate(&self, request: &OnboardingRequest) -> Result<(), LifecycleError> {
        if request.policy.is_some() && request.schedule.is_some() {
            return Err(LifecycleError::Validation(
                "policy and schedule attachments are mutually exclusive in a single request"
                    .to_string(),
            ));
        }

        let domain = request
            .email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                LifecycleError::Validation(format!("invalid email address: {}", request.email))
            })?;
        if !self.allowed_domains.is_empty()
            && !self
                .allowed_domains
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(domain))
        {
            return Err(LifecycleError::Validation(format!(
                "email domain {domain} is not allowed (allowed: {})",
                self.allowed_domains.join(", ")
            )));
        }

        if let Some(schedule) = &request.schedule {
            if let Some((start, end)) = schedule.interval {
                if start >= end {
                    return Err(LifecycleError::Validation(format!(
                        "schedule interval start {start} must be before end {end}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Idempotent on email: an existing user is reused, including when a
    /// concurrent creation wins the race and the create call conflicts.
    async fn find_or_create_user(
        &self,
        request: &OnboardingRequest,
    ) -> Result<(User, bool), LifecycleError> {
        if let Some(existing) = self.directory.get_user_by_email(&request.email).await? {
            debug!(user_id = %existing.id, "Reusing existing user");
            return Ok((existing, false));
        }

        match self
            .directory
            .create_user(&request.email, &request.name, request.role)
            .await
        {
            Ok(user) => Ok((user, true)),
            Err(DirectoryError::Conflict { .. }) => {
                let user = self
                    .directory
                    .get_user_by_email(&request.email)
                    .await?
                    .ok_or_else(|| {
                        LifecycleError::UserNotFound(format!(
                            "{} (creation conflicted but user is not findable)",
                            request.email
                        ))
                    })?;
                Ok((user, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn attach_team(&self, team_id: &str, user: &User) -> Result<StepStatus, LifecycleError> {
        match self.directory.add_user_to_team(team_id, &user.id).await {
            Ok(()) => Ok(StepStatus::Applied),
            Err(DirectoryError::Conflict { .. }) => Ok(StepStatus::AlreadyPresent),
            Err(e) if e.is_auth_failure() => Err(e.into()),
            Err(e) => Ok(StepStatus::Failed {
                error: e.to_string(),
            }),
        }
    }

    async fn attach_policy_level(
        &self,
        attachment: &PolicyAttachment,
        user: &User,
    ) -> Result<StepStatus, LifecycleError> {
        let level = match self.choose_level(attachment, user).await {
            Ok(level) => level,
            Err(LifecycleError::Directory(e)) if e.is_auth_failure() => return Err(e.into()),
            Err(e) => {
                return Ok(StepStatus::Failed {
                    error: e.to_string(),
                })
            }
        };

        match self
            .directory
            .add_user_to_level(&attachment.policy_id, &user.id, level)
            .await
        {
            Ok(true) => Ok(StepStatus::Applied),
            Ok(false) => Ok(StepStatus::AlreadyPresent),
            Err(e) if e.is_auth_failure() => Err(e.into()),
            Err(e) => Ok(StepStatus::Failed {
                error: e.to_string(),
            }),
        }
    }

    /// Level precedence: explicit request, then the selector, then the
    /// role default (junior roles go on top of the chain, everyone else
    /// at the end).
    async fn choose_level(
        &self,
        attachment: &PolicyAttachment,
        user: &User,
    ) -> Result<u32, LifecycleError> {
        if let Some(level) = attachment.level {
            return Ok(level);
        }

        let policy = self
            .directory
            .get_escalation_policy(&attachment.policy_id)
            .await?;
        if policy.escalation_rules.is_empty() {
            return Err(LifecycleError::Validation(format!(
                "policy {} has no escalation levels",
                policy.id
            )));
        }

        if let Some(selector) = &self.level_selector {
            return selector.select(&policy);
        }

        let last = u32::try_from(policy.escalation_rules.len()).unwrap_or(u32::MAX);
        Ok(if user.role.defaults_to_first_level() {
            1
        } else {
            last
        })
    }

    async fn attach_schedule(
        &self,
        attachment: &ScheduleAttachment,
        user: &User,
    ) -> Result<StepStatus, LifecycleError> {
        match self
            .directory
            .add_user_to_schedule_layer(
                &attachment.schedule_id,
                attachment.layer_id.as_deref(),
                &user.id,
                attachment.interval,
            )
            .await
        {
            Ok(true) => Ok(StepStatus::Applied),
            Ok(false) => Ok(StepStatus::AlreadyPresent),
            Err(e) if e.is_auth_failure() => Err(e.into()),
            Err(e) => Ok(StepStatus::Failed {
                error: e.to_string(),
            }),
        }
    }
}

fn skipped_after_failure() -> StepStatus {
    StepStatus::Skipped {
        reason: "earlier step failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_mock_is_consulted_shape() {
        // The selector contract: given a policy, return a 1-based level.
        let mut selector = MockLevelSelector::new();
        selector.expect_select().returning(|policy| {
            Ok(u32::try_from(policy.escalation_rules.len()).unwrap_or(1))
        });

        let policy = EscalationPolicy {
            id: "EP1".into(),
            name: "Primary".into(),
            escalation_rules: vec![
                directory::EscalationRule {
                    id: None,
                    targets: vec![],
                },
                directory::EscalationRule {
                    id: None,
                    targets: vec![],
                },
            ],
        };
        assert_eq!(selector.select(&policy).unwrap(), 2);
    }
}
