//! Incident redistribution away from a departing user.

use std::collections::BTreeSet;
use std::sync::Arc;

use directory::{DirectoryApi, DirectoryError, Incident, IncidentStatus};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::LifecycleError;

/// Default bound on concurrent reassignment calls.
const DEFAULT_CONCURRENCY: usize = 4;

/// Where an incident gets reassigned to, in strict preference order:
/// the escalation policy itself (the service's own routing picks the
/// responder), else a specific peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReassignmentTarget {
    EscalationPolicy { policy_id: String },
    Peer { user_id: String },
}

/// A successfully reassigned incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReassignedIncident {
    pub incident_id: String,
    pub target: ReassignmentTarget,
}

/// An incident that needed no work (already moved or closed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedIncident {
    pub incident_id: String,
    pub reason: String,
}

/// An incident that could not be reassigned, with its cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedIncident {
    pub incident_id: String,
    pub error: String,
}

/// Per-incident outcomes of one redistribution run, each list sorted by
/// incident id so the same outcomes always produce the same report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RedistributionReport {
    pub reassigned: Vec<ReassignedIncident>,
    pub skipped: Vec<SkippedIncident>,
    pub failed: Vec<FailedIncident>,
}

impl RedistributionReport {
    /// Whether every incident was either reassigned or needed no work.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.reassigned.len() + self.skipped.len() + self.failed.len()
    }
}

enum ItemOutcome {
    Reassigned(ReassignedIncident),
    Skipped(SkippedIncident),
    Failed(FailedIncident),
}

/// Moves a set of open incidents away from an origin user.
///
/// Reassignment to the incident's escalation policy is preferred over a
/// direct peer: it keeps degrading gracefully as membership changes,
/// because the service routes it itself. Failures are per-incident; the
/// run as a whole only errors on rejected credentials. Incidents are never
/// acknowledged or resolved here.
pub struct IncidentRedistributor {
    directory: Arc<dyn DirectoryApi>,
    fallback_user: Option<String>,
    concurrency: usize,
}

impl IncidentRedistributor {
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryApi>) -> Self {
        Self {
            directory,
            fallback_user: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Explicit alternate assignee for incidents with no policy mapping.
    #[must_use]
    pub fn with_fallback_user(mut self, user_id: impl Into<String>) -> Self {
        self.fallback_user = Some(user_id.into());
        self
    }

    /// Bound on concurrent reassignment calls.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Reassign each incident away from `origin_id`.
    ///
    /// `origin_policy_ids` are the escalation policies the origin belonged
    /// to when the incidents were discovered; membership may already have
    /// been detached by the time this runs, so it cannot be re-derived from
    /// live state.
    ///
    /// # Errors
    /// Returns an error only when the directory rejects the credentials.
    pub async fn redistribute(
        &self,
        incidents: &[Incident],
        origin_id: &str,
        origin_policy_ids: &BTreeSet<String>,
    ) -> Result<RedistributionReport, LifecycleError> {
        info!(
            origin = origin_id,
            count = incidents.len(),
            "Redistributing incidents"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<Result<ItemOutcome, DirectoryError>> = JoinSet::new();
        for incident in incidents {
            let directory = Arc::clone(&self.directory);
            let semaphore = Arc::clone(&semaphore);
            let incident = incident.clone();
            let origin_id = origin_id.to_string();
            let origin_policy_ids = origin_policy_ids.clone();
            let fallback = self.fallback_user.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                redistribute_one(&*directory, &incident, &origin_id, &origin_policy_ids, fallback)
                    .await
            });
        }

        let mut report = RedistributionReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(ItemOutcome::Reassigned(item))) => report.reassigned.push(item),
                Ok(Ok(ItemOutcome::Skipped(item))) => report.skipped.push(item),
                Ok(Ok(ItemOutcome::Failed(item))) => report.failed.push(item),
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => {
                    return Err(LifecycleError::Internal(format!(
                        "reassignment task died: {e}"
                    )))
                }
            }
        }

        report.reassigned.sort_by(|a, b| a.incident_id.cmp(&b.incident_id));
        report.skipped.sort_by(|a, b| a.incident_id.cmp(&b.incident_id));
        report.failed.sort_by(|a, b| a.incident_id.cmp(&b.incident_id));

        info!(
            reassigned = report.reassigned.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Redistribution finished"
        );
        Ok(report)
    }
}

/// Handle one incident. `Err` is reserved for auth failures; everything
/// else folds into a per-incident outcome.
async fn redistribute_one(
    directory: &dyn DirectoryApi,
    incident: &Incident,
    origin_id: &str,
    origin_policy_ids: &BTreeSet<String>,
    fallback_user: Option<String>,
) -> Result<ItemOutcome, DirectoryError> {
    // Re-invoking on an already-moved incident must be a no-op success.
    let current = match directory.get_incident(&incident.id).await {
        Ok(current) => current,
        Err(e) if e.is_auth_failure() => return Err(e),
        Err(DirectoryError::NotFound { .. }) => {
            return Ok(ItemOutcome::Skipped(SkippedIncident {
                incident_id: incident.id.clone(),
                reason: "incident no longer exists".to_string(),
            }))
        }
        Err(e) => {
            return Ok(ItemOutcome::Failed(FailedIncident {
                incident_id: incident.id.clone(),
                error: format!("pre-reassignment check failed: {e}"),
            }))
        }
    };
    if current.status == IncidentStatus::Resolved {
        return Ok(ItemOutcome::Skipped(SkippedIncident {
            incident_id: incident.id.clone(),
            reason: "already resolved".to_string(),
        }));
    }
    if !current.assignments.is_empty() && !current.assigned_to(origin_id) {
        return Ok(ItemOutcome::Skipped(SkippedIncident {
            incident_id: incident.id.clone(),
            reason: "already reassigned".to_string(),
        }));
    }

    let target = match plan_target(directory, incident, origin_id, origin_policy_ids, fallback_user)
        .await
    {
        Ok(Some(target)) => target,
        Ok(None) => {
            warn!(incident_id = %incident.id, "No eligible reassignment target");
            return Ok(ItemOutcome::Failed(FailedIncident {
                incident_id: incident.id.clone(),
                error: "no eligible reassignment target".to_string(),
            }));
        }
        Err(e) if e.is_auth_failure() => return Err(e),
        Err(e) => {
            return Ok(ItemOutcome::Failed(FailedIncident {
                incident_id: incident.id.clone(),
                error: format!("target selection failed: {e}"),
            }))
        }
    };

    let result = match &target {
        ReassignmentTarget::EscalationPolicy { policy_id } => {
            directory
                .reassign_incident_to_policy(&incident.id, policy_id)
                .await
        }
        ReassignmentTarget::Peer { user_id } => {
            directory
                .reassign_incident_to_user(&incident.id, user_id)
                .await
        }
    };

    match result {
        Ok(_) => {
            debug!(incident_id = %incident.id, ?target, "Incident reassigned");
            Ok(ItemOutcome::Reassigned(ReassignedIncident {
                incident_id: incident.id.clone(),
                target,
            }))
        }
        Err(e) if e.is_auth_failure() => Err(e),
        Err(e) => Ok(ItemOutcome::Failed(FailedIncident {
            incident_id: incident.id.clone(),
            error: e.to_string(),
        })),
    }
}

/// Pick a reassignment target in strict preference order.
async fn plan_target(
    directory: &dyn DirectoryApi,
    incident: &Incident,
    origin_id: &str,
    origin_policy_ids: &BTreeSet<String>,
    fallback_user: Option<String>,
) -> Result<Option<ReassignmentTarget>, DirectoryError> {
    // 1. Known policy the origin maps to: hand the incident back to the
    //    policy and let the service route it.
    if let Some(policy_ref) = &incident.escalation_policy {
        if origin_policy_ids.contains(&policy_ref.id) {
            return Ok(Some(ReassignmentTarget::EscalationPolicy {
                policy_id: policy_ref.id.clone(),
            }));
        }
    }

    // 2. Caller-supplied alternate.
    if let Some(user_id) = fallback_user {
        return Ok(Some(ReassignmentTarget::Peer { user_id }));
    }

    // 3. Another member of the incident's policy, lowest id first.
    if let Some(policy_ref) = &incident.escalation_policy {
        let policy = directory.get_escalation_policy(&policy_ref.id).await?;
        if let Some(peer) = policy.user_ids().into_iter().find(|id| id != origin_id) {
            return Ok(Some(ReassignmentTarget::Peer { user_id: peer }));
        }
    }

    Ok(None)
}
