//! Continuous auto-acknowledge and one-shot batch resolution.
//!
//! Both run outside the lifecycle core and talk to the service purely
//! through the directory contract.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use directory::{DirectoryApi, IncidentStatus, User};
use tracing::{info, warn};

/// Polling configuration for the acknowledge watch.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Base delay between polls.
    pub interval: Duration,
    /// Backoff multiplier on consecutive poll failures.
    pub backoff_multiplier: f32,
    /// Max delay between polls.
    pub max_backoff: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5 * 60),
        }
    }
}

/// Tracks what the watch already acknowledged and how it is failing.
#[derive(Debug, Default)]
pub struct WatchState {
    acked: HashSet<String>,
    failures: u32,
}

impl WatchState {
    pub fn mark_acked(&mut self, id: &str) {
        self.acked.insert(id.to_string());
    }

    #[must_use]
    pub fn is_acked(&self, id: &str) -> bool {
        self.acked.contains(id)
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Delay before the next poll: the base interval, stretched while the
    /// service keeps failing.
    #[must_use]
    pub fn next_delay(&self, config: &WatchConfig) -> Duration {
        if self.failures == 0 {
            return config.interval;
        }
        let stretched = config.interval.as_secs_f32()
            * config
                .backoff_multiplier
                .powi(i32::try_from(self.failures).unwrap_or(i32::MAX));
        Duration::from_secs_f32(stretched.min(config.max_backoff.as_secs_f32()))
    }
}

/// Poll the user's open incidents and acknowledge anything still
/// triggered, until interrupted (ctrl-c).
pub async fn ack_watch(
    directory: &dyn DirectoryApi,
    user: &User,
    config: WatchConfig,
) -> Result<()> {
    println!(
        "Watching incidents for {} ({}) — ctrl-c to stop",
        user.name.bold(),
        user.email
    );
    let mut state = WatchState::default();

    loop {
        match poll_once(directory, user, &mut state).await {
            Ok(acked) => {
                state.record_success();
                if acked > 0 {
                    info!(acked, "Acknowledged incidents");
                }
            }
            Err(e) => {
                state.record_failure();
                warn!(error = %e, failures = state.failures, "Poll failed");
            }
        }

        let delay = state.next_delay(&config);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping watch.");
                return Ok(());
            }
        }
    }
}

async fn poll_once(
    directory: &dyn DirectoryApi,
    user: &User,
    state: &mut WatchState,
) -> Result<usize> {
    let incidents = directory.list_open_incidents_for_user(&user.id).await?;
    let mut acked = 0usize;
    for incident in incidents {
        if incident.status != IncidentStatus::Triggered || state.is_acked(&incident.id) {
            continue;
        }
        match directory.acknowledge_incident(&incident.id).await {
            Ok(_) => {
                println!("{} acknowledged {} ({})", "✓".green(), incident.id, incident.title);
                state.mark_acked(&incident.id);
                acked += 1;
            }
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "Failed to acknowledge");
            }
        }
    }
    Ok(acked)
}

/// One-shot: resolve every open incident for the user, optionally filtered
/// by urgency. Returns (resolved, failed) counts.
pub async fn resolve_batch(
    directory: &dyn DirectoryApi,
    user: &User,
    urgency: Option<&str>,
) -> Result<(usize, usize)> {
    let incidents = directory.list_open_incidents_for_user(&user.id).await?;
    if incidents.is_empty() {
        println!("No open incidents for {}.", user.email);
        return Ok((0, 0));
    }

    let mut resolved = 0usize;
    let mut failed = 0usize;
    for incident in incidents {
        if let Some(wanted) = urgency {
            if incident.urgency.as_deref() != Some(wanted) {
                continue;
            }
        }
        match directory.resolve_incident(&incident.id).await {
            Ok(_) => {
                println!("{} resolved {} ({})", "✓".green(), incident.id, incident.title);
                resolved += 1;
            }
            Err(e) => {
                println!("{} {}: {}", "✗".red(), incident.id, e);
                failed += 1;
            }
        }
    }
    Ok((resolved, failed))
}
