//! Footprint resolution: concurrent fan-out reads over the directory.

use std::sync::Arc;

use chrono::Utc;
use directory::{DirectoryApi, DirectoryError, Incident, Schedule, User};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::LifecycleError;
use crate::footprint::{
    CategorySnapshot, Footprint, PolicyLevelMembership, ScheduleMembership, TeamMembership,
};

/// Bound on concurrent per-schedule detail reads.
const SCHEDULE_SCAN_CONCURRENCY: usize = 4;

/// Resolves a user's current footprint with one concurrent read per
/// category. Read-only; never mutates directory state.
pub struct AssignmentResolver {
    directory: Arc<dyn DirectoryApi>,
}

impl AssignmentResolver {
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryApi>) -> Self {
        Self { directory }
    }

    /// Take a fresh footprint snapshot.
    ///
    /// Each category read failure degrades that category to `Unknown`
    /// rather than pretending it is empty. Authentication failures are the
    /// exception: they invalidate the whole run and propagate as errors.
    ///
    /// # Errors
    /// Returns an error only when the directory rejects the credentials.
    pub async fn resolve(&self, user: &User) -> Result<Footprint, LifecycleError> {
        debug!(user_id = %user.id, "Resolving footprint");

        let (teams, policy_levels, schedules, open_incidents) = tokio::join!(
            self.read_teams(user),
            self.read_policy_levels(user),
            self.read_schedules(user),
            self.read_open_incidents(user),
        );

        let footprint = Footprint {
            user: user.clone(),
            taken_at: Utc::now(),
            teams: teams?,
            policy_levels: policy_levels?,
            schedules: schedules?,
            open_incidents: open_incidents?,
        };

        let unknown = footprint.unknown_categories();
        if !unknown.is_empty() {
            warn!(user_id = %user.id, ?unknown, "Footprint has unknown categories");
        }
        Ok(footprint)
    }

    async fn read_teams(
        &self,
        user: &User,
    ) -> Result<CategorySnapshot<TeamMembership>, LifecycleError> {
        // Re-fetched rather than trusting the caller's user record, so the
        // snapshot reflects the directory at resolution time.
        let fresh = match self.directory.get_user_by_id(&user.id).await {
            Ok(u) => u,
            Err(e) => return degraded(e),
        };
        let mut memberships: Vec<TeamMembership> = fresh
            .teams
            .into_iter()
            .map(|t| TeamMembership {
                team_id: t.id,
                team_name: t.summary,
            })
            .collect();
        memberships.sort_by(|a, b| a.team_id.cmp(&b.team_id));
        Ok(CategorySnapshot::Known(memberships))
    }

    async fn read_policy_levels(
        &self,
        user: &User,
    ) -> Result<CategorySnapshot<PolicyLevelMembership>, LifecycleError> {
        let policies = match self.directory.list_escalation_policies().await {
            Ok(p) => p,
            Err(e) => return degraded(e),
        };
        let mut memberships: Vec<PolicyLevelMembership> = policies
            .iter()
            .flat_map(|policy| {
                policy
                    .levels_containing(&user.id)
                    .into_iter()
                    .map(|level| PolicyLevelMembership {
                        policy_id: policy.id.clone(),
                        policy_name: policy.name.clone(),
                        level,
                    })
            })
            .collect();
        memberships.sort_by(|a, b| (&a.policy_id, a.level).cmp(&(&b.policy_id, b.level)));
        Ok(CategorySnapshot::Known(memberships))
    }

    async fn read_schedules(
        &self,
        user: &User,
    ) -> Result<CategorySnapshot<ScheduleMembership>, LifecycleError> {
        let schedules = match self.directory.list_schedules().await {
            Ok(s) => s,
            Err(e) => return degraded(e),
        };

        let semaphore = Arc::new(Semaphore::new(SCHEDULE_SCAN_CONCURRENCY));
        let mut tasks: JoinSet<Result<Vec<ScheduleMembership>, DirectoryError>> = JoinSet::new();
        for schedule in schedules {
            let directory = Arc::clone(&self.directory);
            let semaphore = Arc::clone(&semaphore);
            let user_id = user.id.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let Schedule {
                    id,
                    name,
                    schedule_layers,
                } = directory.get_schedule(&schedule.id).await?;
                Ok(schedule_layers
                    .into_iter()
                    .filter(|layer| layer.contains_user(&user_id))
                    .map(|layer| ScheduleMembership {
                        schedule_id: id.clone(),
                        schedule_name: name.clone(),
                        layer_id: layer.id,
                        layer_name: layer.name,
                    })
                    .collect())
            });
        }

        let mut memberships = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(mut items)) => memberships.append(&mut items),
                Ok(Err(e)) => return degraded(e),
                Err(e) => {
                    return Ok(CategorySnapshot::Unknown {
                        error: format!("schedule scan task failed: {e}"),
                    })
                }
            }
        }
        memberships.sort_by(|a, b| {
            (&a.schedule_id, &a.layer_id).cmp(&(&b.schedule_id, &b.layer_id))
        });
        Ok(CategorySnapshot::Known(memberships))
    }

    async fn read_open_incidents(
        &self,
        user: &User,
    ) -> Result<CategorySnapshot<Incident>, LifecycleError> {
        let mut incidents = match self.directory.list_open_incidents_for_user(&user.id).await {
            Ok(i) => i,
            Err(e) => return degraded(e),
        };
        incidents.retain(|i| i.status.is_open());
        incidents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(CategorySnapshot::Known(incidents))
    }
}

/// Degrade a failed category read to `Unknown`, except for auth failures,
/// which invalidate the whole run.
fn degraded<T>(error: DirectoryError) -> Result<CategorySnapshot<T>, LifecycleError> {
    if error.is_auth_failure() {
        return Err(error.into());
    }
    Ok(CategorySnapshot::unknown(error))
}
