//! On-call roster lifecycle CLI.
//!
//! Wraps the `lifecycle` orchestrators for operators: inspect a user's
//! footprint, onboard new responders, safely offboard departing ones
//! (redistributing their incidents first), and run incident upkeep
//! (auto-acknowledge watch, batch resolution).

mod config;
mod level_select;
mod output;
mod watch;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::Confirm;
use directory::{DirectoryApi, DirectoryClient, DirectoryConfig, UserRole};
use lifecycle::{
    find_user, OnboardingOrchestrator, OnboardingRequest, PolicyAttachment,
    SafeDeletionOrchestrator, ScheduleAttachment,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::level_select::InteractiveLevelSelector;

#[derive(Parser)]
#[command(name = "oncallctl", version)]
#[command(about = "On-call roster lifecycle: onboarding, safe offboarding, incident upkeep")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API token (prefer the environment variable over the flag)
    #[arg(long, env = "PAGERDUTY_API_TOKEN", global = true, hide_env_values = true)]
    api_token: Option<String>,

    /// Path to the YAML config file
    #[arg(long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// API base URL override (on-prem or test deployments)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show user details, on-call assignments, and open incidents
    Info {
        /// User email(s) or id(s)
        #[arg(long = "user", required = true, num_args = 1..)]
        users: Vec<String>,
    },

    /// Create (or reuse) a user and attach team, policy-level, or schedule
    Onboard {
        /// User email
        #[arg(long)]
        user: String,

        /// Full name (defaults to the email local part)
        #[arg(long)]
        name: Option<String>,

        /// Role: admin, manager, responder, user, limited_user, ...
        #[arg(long, default_value = "user")]
        role: String,

        /// Team id to join
        #[arg(long)]
        team: Option<String>,

        /// Escalation policy id(s) to join (repeatable)
        #[arg(long = "policy")]
        policies: Vec<String>,

        /// Service name whose escalation policy to join
        #[arg(long)]
        service: Option<String>,

        /// Explicit 1-based escalation level (otherwise chosen interactively)
        #[arg(long)]
        level: Option<u32>,

        /// Schedule name or id to join (mutually exclusive with policies)
        #[arg(long)]
        schedule: Option<String>,

        /// Schedule layer id (defaults to the first layer)
        #[arg(long)]
        layer: Option<String>,

        /// Assignment start (RFC 3339), requires --until
        #[arg(long)]
        from: Option<String>,

        /// Assignment end (RFC 3339, exclusive), requires --from
        #[arg(long)]
        until: Option<String>,
    },

    /// Safely delete user(s): detach, redistribute incidents, verify, delete
    Offboard {
        /// User email(s) or id(s)
        #[arg(long = "user", required = true, num_args = 1..)]
        users: Vec<String>,

        /// Alternate assignee (email or id) for incidents with no policy
        #[arg(long)]
        fallback: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Continuously auto-acknowledge triggered incidents for a user
    AckWatch {
        /// User email or id
        #[arg(long)]
        user: String,

        /// Poll interval in seconds
        #[arg(long, default_value = "10")]
        interval: u64,
    },

    /// Resolve all open incidents for a user in one pass
    ResolveBatch {
        /// User email or id
        #[arg(long)]
        user: String,

        /// Only resolve incidents with this urgency (e.g. high, low)
        #[arg(long)]
        urgency: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let file = config::FileConfig::load(&cli.config)?;
    let app = config::resolve(cli.api_token.clone(), cli.base_url.clone(), file)?;

    let mut directory_config = DirectoryConfig::default();
    if let Some(base_url) = &app.base_url {
        directory_config.base_url = base_url.clone();
    }
    let client = DirectoryClient::new(app.api_token.clone(), directory_config)?;
    let directory: Arc<dyn DirectoryApi> = Arc::new(client);

    match cli.command {
        Commands::Info { users } => info(&directory, &users).await,
        Commands::Onboard {
            user,
            name,
            role,
            team,
            policies,
            service,
            level,
            schedule,
            layer,
            from,
            until,
        } => {
            onboard(
                &directory,
                &app,
                OnboardArgs {
                    email: user,
                    name,
                    role,
                    team,
                    policies,
                    service,
                    level,
                    schedule,
                    layer,
                    from,
                    until,
                },
            )
            .await
        }
        Commands::Offboard {
            users,
            fallback,
            yes,
        } => offboard(&directory, &users, fallback.as_deref(), yes).await,
        Commands::AckWatch { user, interval } => {
            let user = require_user(&directory, &user).await?;
            let config = watch::WatchConfig {
                interval: Duration::from_secs(interval.max(1)),
                ..watch::WatchConfig::default()
            };
            watch::ack_watch(&*directory, &user, config).await
        }
        Commands::ResolveBatch { user, urgency } => {
            let user = require_user(&directory, &user).await?;
            let (resolved, failed) = watch::resolve_batch(&*directory, &user, urgency.as_deref()).await?;
            println!("Resolved {resolved} incident(s), {failed} failed.");
            if failed > 0 {
                bail!("{failed} incident(s) could not be resolved");
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "oncallctl=debug,lifecycle=debug,directory=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn require_user(directory: &Arc<dyn DirectoryApi>, user_ref: &str) -> Result<directory::User> {
    find_user(&**directory, user_ref)
        .await?
        .with_context(|| format!("user not found: {user_ref}"))
}

async fn info(directory: &Arc<dyn DirectoryApi>, users: &[String]) -> Result<()> {
    for user_ref in users {
        let Some(user) = find_user(&**directory, user_ref).await? else {
            println!("{} user not found: {user_ref}", "✗".red());
            continue;
        };
        let oncalls = directory.list_oncalls_for_user(&user.id).await?;
        let incidents = directory.list_open_incidents_for_user(&user.id).await?;
        output::print_user_info(&user, &oncalls, &incidents);
    }
    Ok(())
}

struct OnboardArgs {
    email: String,
    name: Option<String>,
    role: String,
    team: Option<String>,
    policies: Vec<String>,
    service: Option<String>,
    level: Option<u32>,
    schedule: Option<String>,
    layer: Option<String>,
    from: Option<String>,
    until: Option<String>,
}

async fn onboard(
    directory: &Arc<dyn DirectoryApi>,
    app: &config::AppConfig,
    args: OnboardArgs,
) -> Result<()> {
    let role: UserRole = args
        .role
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let name = args.name.clone().unwrap_or_else(|| {
        args.email
            .split('@')
            .next()
            .unwrap_or(&args.email)
            .to_string()
    });

    let interval = match (&args.from, &args.until) {
        (Some(from), Some(until)) => Some((parse_utc(from)?, parse_utc(until)?)),
        (None, None) => None,
        _ => bail!("--from and --until must be given together"),
    };
    if interval.is_some() && args.schedule.is_none() {
        bail!("--from/--until only apply to a --schedule attachment");
    }

    let orchestrator = OnboardingOrchestrator::new(Arc::clone(directory))
        .with_allowed_domains(app.allowed_email_domains.clone())
        .with_level_selector(Arc::new(InteractiveLevelSelector));

    let base_request = OnboardingRequest {
        email: args.email.clone(),
        name,
        role,
        team_id: args.team.clone(),
        policy: None,
        schedule: None,
    };

    let mut requests = Vec::new();
    if let Some(schedule_ref) = &args.schedule {
        if !args.policies.is_empty() || args.service.is_some() {
            bail!("--schedule cannot be combined with --policy/--service");
        }
        let schedule_id = resolve_schedule_id(directory, schedule_ref).await?;
        requests.push(OnboardingRequest {
            schedule: Some(ScheduleAttachment {
                schedule_id,
                layer_id: args.layer.clone(),
                interval,
            }),
            ..base_request.clone()
        });
    } else {
        let policy_ids = resolve_policy_ids(directory, app, &args).await?;
        if policy_ids.is_empty() {
            requests.push(base_request.clone());
        }
        for (idx, policy_id) in policy_ids.into_iter().enumerate() {
            requests.push(OnboardingRequest {
                // The team only needs attaching once.
                team_id: if idx == 0 { args.team.clone() } else { None },
                policy: Some(PolicyAttachment {
                    policy_id,
                    level: args.level,
                }),
                ..base_request.clone()
            });
        }
    }

    let mut all_complete = true;
    for request in &requests {
        let report = orchestrator.onboard(request).await?;
        output::print_onboarding_report(&report);
        all_complete &= report.is_complete();
    }
    if !all_complete {
        bail!("one or more onboarding steps failed");
    }
    Ok(())
}

/// Resolution order for target policies: explicit flags, then the service's
/// policy, then the configured default.
async fn resolve_policy_ids(
    directory: &Arc<dyn DirectoryApi>,
    app: &config::AppConfig,
    args: &OnboardArgs,
) -> Result<Vec<String>> {
    let mut policy_ids = args.policies.clone();
    if let Some(service) = &args.service {
        match directory.policy_id_for_service(service).await? {
            Some(id) => policy_ids.push(id),
            None => bail!("no escalation policy found for service {service}"),
        }
    }
    if policy_ids.is_empty() {
        if let Some(default) = &app.default_policy_id {
            policy_ids.push(default.clone());
        }
    }
    policy_ids.dedup();
    Ok(policy_ids)
}

async fn resolve_schedule_id(
    directory: &Arc<dyn DirectoryApi>,
    schedule_ref: &str,
) -> Result<String> {
    Ok(match directory.get_schedule_by_name(schedule_ref).await? {
        Some(schedule) => schedule.id,
        // Not a known name: assume it is already an id.
        None => schedule_ref.to_string(),
    })
}

async fn offboard(
    directory: &Arc<dyn DirectoryApi>,
    users: &[String],
    fallback: Option<&str>,
    yes: bool,
) -> Result<()> {
    let fallback_id = match fallback {
        Some(fallback_ref) => Some(require_user(directory, fallback_ref).await?.id),
        None => None,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancellation requested; finishing the current stage...");
                cancel.cancel();
            }
        });
    }

    let mut all_completed = true;
    // Sequential on purpose: deletion runs on the same principal must
    // never overlap, and operators often pass several users at once.
    for user_ref in users {
        let Some(user) = find_user(&**directory, user_ref).await? else {
            println!("{} user not found: {user_ref}", "✗".red());
            all_completed = false;
            continue;
        };

        if !yes {
            let proceed = Confirm::new()
                .with_prompt(format!(
                    "Delete {} ({}) and redistribute their incidents?",
                    user.name, user.email
                ))
                .default(false)
                .interact()
                .context("confirmation prompt failed")?;
            if !proceed {
                println!("Skipped {}.", user.email);
                continue;
            }
        }

        let mut orchestrator = SafeDeletionOrchestrator::new(Arc::clone(directory))
            .with_cancellation(cancel.clone());
        if let Some(fallback_id) = &fallback_id {
            orchestrator = orchestrator.with_fallback_user(fallback_id.clone());
        }

        let report = orchestrator.offboard(&user).await?;
        output::print_deletion_report(&report);
        all_completed &= report.is_completed();

        if cancel.is_cancelled() {
            break;
        }
    }

    if !all_completed {
        bail!("one or more offboarding runs did not complete");
    }
    Ok(())
}

fn parse_utc(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp {value} (expected RFC 3339)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_utc() {
        let parsed = parse_utc("2026-09-01T00:00:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-09-01T00:00:00+00:00");
        assert!(parse_utc("next tuesday").is_err());
    }

    #[test]
    fn test_cli_parses_offboard() {
        let cli = Cli::try_parse_from([
            "oncallctl", "offboard", "--user", "a@example.com", "b@example.com", "--yes",
        ])
        .unwrap();
        match cli.command {
            Commands::Offboard { users, yes, .. } => {
                assert_eq!(users.len(), 2);
                assert!(yes);
            }
            _ => panic!("wrong command"),
        }
    }
}
