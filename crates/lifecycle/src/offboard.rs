//! Safe user deletion: the staged removal workflow.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use directory::{DirectoryApi, DirectoryError, User};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::LifecycleError;
use crate::footprint::{Footprint, Residual};
use crate::redistribute::{FailedIncident, IncidentRedistributor, RedistributionReport};
use crate::resolver::AssignmentResolver;

/// Stages of the deletion workflow, in execution order. `Aborted` is
/// terminal and reachable from any stage before `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStage {
    Discovering,
    Detaching,
    Redistributing,
    Verifying,
    Deleting,
    Done,
    Aborted,
}

impl DeletionStage {
    /// The stage that follows on success.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Discovering => Self::Detaching,
            Self::Detaching => Self::Redistributing,
            Self::Redistributing => Self::Verifying,
            Self::Verifying => Self::Deleting,
            Self::Deleting | Self::Done => Self::Done,
            Self::Aborted => Self::Aborted,
        }
    }
}

impl fmt::Display for DeletionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovering => "discovering",
            Self::Detaching => "detaching",
            Self::Redistributing => "redistributing",
            Self::Verifying => "verifying",
            Self::Deleting => "deleting",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Why a run aborted instead of completing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// Caller cancelled between stages.
    Cancelled,
    /// One or more footprint categories could not be read. Guessing is not
    /// an option: unknown is not empty.
    IncompleteFootprint { categories: Vec<String> },
    /// At least one incident could not be reassigned; deleting now would
    /// orphan it.
    RedistributionIncomplete { failures: Vec<FailedIncident> },
    /// The fresh verification read still shows blocking assignments.
    ResidualAssignments { residuals: Vec<Residual> },
    /// The delete call itself failed.
    DeletionFailed { cause: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled by caller"),
            Self::IncompleteFootprint { categories } => {
                write!(f, "could not read: {}", categories.join(", "))
            }
            Self::RedistributionIncomplete { failures } => {
                write!(f, "{} incident(s) could not be reassigned", failures.len())
            }
            Self::ResidualAssignments { residuals } => {
                let listed: Vec<String> = residuals.iter().map(ToString::to_string).collect();
                write!(f, "still assigned: {}", listed.join(", "))
            }
            Self::DeletionFailed { cause } => write!(f, "delete call failed: {cause}"),
        }
    }
}

/// Terminal outcome of a deletion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeletionOutcome {
    Completed,
    Aborted {
        stage: DeletionStage,
        reason: AbortReason,
    },
}

/// What a failed detachment was trying to remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetachTarget {
    PolicyLevels { policy_id: String },
    Schedule { schedule_id: String },
}

impl fmt::Display for DetachTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyLevels { policy_id } => write!(f, "escalation policy {policy_id}"),
            Self::Schedule { schedule_id } => write!(f, "schedule {schedule_id}"),
        }
    }
}

/// A detachment that failed even after its retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetachmentFailure {
    pub target: DetachTarget,
    pub error: String,
}

/// Outcomes of the detachment stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetachmentReport {
    /// Policies the user was removed from (or was already absent from).
    pub policies_detached: Vec<String>,
    /// Schedules the user was removed from (or was already absent from).
    pub schedules_detached: Vec<String>,
    /// Detachments that kept failing. These do not stop redistribution;
    /// verification is what gates the delete.
    pub failures: Vec<DetachmentFailure>,
}

impl DetachmentReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Full structured result of one deletion run.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
    pub user: User,
    pub outcome: DeletionOutcome,
    /// The discovery snapshot the run acted on.
    pub footprint: Option<Footprint>,
    pub detachment: Option<DetachmentReport>,
    pub redistribution: Option<RedistributionReport>,
    pub deleted: bool,
}

impl DeletionReport {
    fn started(user: User) -> Self {
        Self {
            user,
            outcome: DeletionOutcome::Completed,
            footprint: None,
            detachment: None,
            redistribution: None,
            deleted: false,
        }
    }

    fn aborted(mut self, stage: DeletionStage, reason: AbortReason) -> Self {
        warn!(stage = %stage, reason = %reason, "Deletion aborted");
        self.outcome = DeletionOutcome::Aborted { stage, reason };
        self
    }

    /// Whether the run reached `Done`.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, DeletionOutcome::Completed)
    }
}

/// Drives the ordered deletion workflow:
/// discover → detach → redistribute → verify → delete.
///
/// Aborting is always safe: the user still exists unless the delete call
/// was reached, and an incident is only ever *reassigned*, never dropped.
/// Runs against the same user are not coordinated across invocations;
/// callers must serialize them.
pub struct SafeDeletionOrchestrator {
    directory: Arc<dyn DirectoryApi>,
    resolver: AssignmentResolver,
    fallback_user: Option<String>,
    cancel: CancellationToken,
}

impl SafeDeletionOrchestrator {
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryApi>) -> Self {
        let resolver = AssignmentResolver::new(Arc::clone(&directory));
        Self {
            directory,
            resolver,
            fallback_user: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Alternate assignee for incidents that cannot go back to a policy.
    #[must_use]
    pub fn with_fallback_user(mut self, user_id: impl Into<String>) -> Self {
        self.fallback_user = Some(user_id.into());
        self
    }

    /// Cooperative cancellation, honored at stage boundaries. Once the
    /// delete call is in flight the run always finishes.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the full workflow for one user.
    ///
    /// Every recoverable failure lands in the returned [`DeletionReport`];
    /// `ABORTED` outcomes carry the stage and the exact resources that
    /// blocked completion.
    ///
    /// # Errors
    /// Returns an error only when the directory rejects the credentials.
    pub async fn offboard(&self, user: &User) -> Result<DeletionReport, LifecycleError> {
        let mut report = DeletionReport::started(user.clone());
        info!(user_id = %user.id, email = %user.email, "Starting safe deletion");

        // DISCOVERING
        if self.cancel.is_cancelled() {
            return Ok(report.aborted(DeletionStage::Discovering, AbortReason::Cancelled));
        }
        let footprint = self.resolver.resolve(user).await?;
        report.footprint = Some(footprint.clone());

        let unknown = footprint.unknown_categories();
        if !unknown.is_empty() {
            return Ok(report.aborted(
                DeletionStage::Discovering,
                AbortReason::IncompleteFootprint {
                    categories: unknown.iter().map(ToString::to_string).collect(),
                },
            ));
        }

        let policy_ids: BTreeSet<String> = footprint
            .policy_levels
            .known()
            .unwrap_or_default()
            .iter()
            .map(|m| m.policy_id.clone())
            .collect();
        let schedule_ids: BTreeSet<String> = footprint
            .schedules
            .known()
            .unwrap_or_default()
            .iter()
            .map(|m| m.schedule_id.clone())
            .collect();
        let open_incidents = footprint.open_incidents.known().unwrap_or_default().to_vec();

        // DETACHING
        if self.cancel.is_cancelled() {
            return Ok(report.aborted(DeletionStage::Detaching, AbortReason::Cancelled));
        }
        let detachment = self.detach_all(&user.id, &policy_ids, &schedule_ids).await?;
        if !detachment.is_clean() {
            warn!(
                user_id = %user.id,
                failures = detachment.failures.len(),
                "Detachment incomplete, proceeding to redistribution anyway"
            );
        }
        report.detachment = Some(detachment);

        // REDISTRIBUTING — on the originally-discovered incidents.
        if self.cancel.is_cancelled() {
            return Ok(report.aborted(DeletionStage::Redistributing, AbortReason::Cancelled));
        }
        let mut redistributor = IncidentRedistributor::new(Arc::clone(&self.directory));
        if let Some(fallback) = &self.fallback_user {
            redistributor = redistributor.with_fallback_user(fallback.clone());
        }
        let redistribution = redistributor
            .redistribute(&open_incidents, &user.id, &policy_ids)
            .await?;
        let failures = redistribution.failed.clone();
        report.redistribution = Some(redistribution);
        if !failures.is_empty() {
            // Already-applied reassignments stay applied; deleting now
            // would orphan the failed ones.
            return Ok(report.aborted(
                DeletionStage::Redistributing,
                AbortReason::RedistributionIncomplete { failures },
            ));
        }

        // VERIFYING — a fresh read, never the discovery snapshot.
        if self.cancel.is_cancelled() {
            return Ok(report.aborted(DeletionStage::Verifying, AbortReason::Cancelled));
        }
        let verification = self.resolver.resolve(user).await?;
        let unknown = verification.unknown_categories();
        if !unknown.is_empty() {
            return Ok(report.aborted(
                DeletionStage::Verifying,
                AbortReason::IncompleteFootprint {
                    categories: unknown.iter().map(ToString::to_string).collect(),
                },
            ));
        }
        let residuals = verification.residuals();
        if !residuals.is_empty() {
            return Ok(report.aborted(
                DeletionStage::Verifying,
                AbortReason::ResidualAssignments { residuals },
            ));
        }

        // DELETING — last cancellation checkpoint is before the call; once
        // issued, the run completes or fails.
        if self.cancel.is_cancelled() {
            return Ok(report.aborted(DeletionStage::Deleting, AbortReason::Cancelled));
        }
        match self.directory.delete_user(&user.id).await {
            // Already gone counts as deleted.
            Ok(()) | Err(DirectoryError::NotFound { .. }) => {
                report.deleted = true;
            }
            Err(e) if e.is_auth_failure() => return Err(e.into()),
            Err(e) => {
                return Ok(report.aborted(
                    DeletionStage::Deleting,
                    AbortReason::DeletionFailed {
                        cause: e.to_string(),
                    },
                ))
            }
        }

        info!(user_id = %user.id, "Safe deletion complete");
        Ok(report)
    }

    /// Remove the user from every discovered policy and schedule. Each
    /// detachment is independent and retried once; an already-removed
    /// target counts as detached.
    async fn detach_all(
        &self,
        user_id: &str,
        policy_ids: &BTreeSet<String>,
        schedule_ids: &BTreeSet<String>,
    ) -> Result<DetachmentReport, LifecycleError> {
        let mut report = DetachmentReport::default();

        for policy_id in policy_ids {
            let target = DetachTarget::PolicyLevels {
                policy_id: policy_id.clone(),
            };
            match self
                .detach_with_retry(&target, || {
                    self.directory.remove_user_from_all_levels(policy_id, user_id)
                })
                .await?
            {
                Ok(()) => report.policies_detached.push(policy_id.clone()),
                Err(error) => report.failures.push(DetachmentFailure { target, error }),
            }
        }

        for schedule_id in schedule_ids {
            let target = DetachTarget::Schedule {
                schedule_id: schedule_id.clone(),
            };
            match self
                .detach_with_retry(&target, || {
                    self.directory.remove_user_from_schedules(schedule_id, user_id)
                })
                .await?
            {
                Ok(()) => report.schedules_detached.push(schedule_id.clone()),
                Err(error) => report.failures.push(DetachmentFailure { target, error }),
            }
        }

        Ok(report)
    }

    /// One detachment attempt plus a single retry. The outer `Err` is
    /// reserved for auth failures; the inner result carries the per-item
    /// outcome.
    async fn detach_with_retry<F, Fut>(
        &self,
        target: &DetachTarget,
        attempt: F,
    ) -> Result<Result<(), String>, LifecycleError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool, DirectoryError>>,
    {
        let mut last_error = None;
        for try_number in 0..2 {
            match attempt().await {
                Ok(_) => return Ok(Ok(())),
                // Already removed out from under us: the goal state holds.
                Err(DirectoryError::NotFound { .. }) => return Ok(Ok(())),
                Err(e) if e.is_auth_failure() => return Err(e.into()),
                Err(e) => {
                    warn!(target = %target, try_number, error = %e, "Detachment attempt failed");
                    last_error = Some(e.to_string());
                }
            }
        }
        Ok(Err(last_error.unwrap_or_else(|| "unknown".to_string())))
    }
}
