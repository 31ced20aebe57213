//! Terminal rendering of structured reports.

use colored::Colorize;
use directory::{Incident, Oncall, User};
use lifecycle::{
    DeletionOutcome, DeletionReport, Footprint, OnboardingReport, RedistributionReport, StepStatus,
};

pub fn print_user_info(user: &User, oncalls: &[Oncall], incidents: &[Incident]) {
    println!("\n{}", "User Details:".bold());
    println!("  Name  : {}", user.name);
    println!("  Email : {}", user.email);
    println!("  ID    : {}", user.id);
    println!("  Role  : {}", user.role);

    if user.teams.is_empty() {
        println!("  Teams : (none)");
    } else {
        println!("  Teams :");
        for team in &user.teams {
            let name = team.summary.as_deref().unwrap_or(&team.id);
            println!("    - {name} ({})", team.id);
        }
    }

    println!("\n{}", "Current on-call assignments:".bold());
    if oncalls.is_empty() {
        println!("  (not on call in any escalation policy or schedule)");
    } else {
        for oncall in oncalls {
            let policy = oncall
                .escalation_policy
                .summary
                .as_deref()
                .unwrap_or(&oncall.escalation_policy.id);
            match &oncall.schedule {
                Some(schedule) => {
                    let name = schedule.summary.as_deref().unwrap_or(&schedule.id);
                    println!("  - {policy} / {name}");
                }
                None => println!("  - {policy}"),
            }
        }
    }

    println!("\n{}", "Open incidents:".bold());
    if incidents.is_empty() {
        println!("  (none assigned)");
    } else {
        for incident in incidents {
            println!(
                "  - [{}] {} ({})",
                incident.status.to_string().yellow(),
                incident.title,
                incident.id
            );
        }
    }
}

fn print_footprint_counts(footprint: &Footprint) {
    let count = |label: &str, len: Option<usize>| match len {
        Some(n) => println!("  {label}: {n}"),
        None => println!("  {label}: {}", "unknown (read failed)".red()),
    };
    count("escalation levels", footprint.policy_levels.known().map(<[_]>::len));
    count("schedule layers", footprint.schedules.known().map(<[_]>::len));
    count("open incidents", footprint.open_incidents.known().map(<[_]>::len));
}

fn print_redistribution(report: &RedistributionReport) {
    for item in &report.reassigned {
        println!("  {} reassigned {}", "✓".green(), item.incident_id);
    }
    for item in &report.skipped {
        println!("  - skipped {} ({})", item.incident_id, item.reason);
    }
    for item in &report.failed {
        println!("  {} {}: {}", "✗".red(), item.incident_id, item.error);
    }
}

pub fn print_deletion_report(report: &DeletionReport) {
    println!(
        "\n{} {} ({})",
        "Offboarding".bold(),
        report.user.name,
        report.user.email
    );

    if let Some(footprint) = &report.footprint {
        print_footprint_counts(footprint);
    }

    if let Some(detachment) = &report.detachment {
        for policy in &detachment.policies_detached {
            println!("  {} detached from policy {policy}", "✓".green());
        }
        for schedule in &detachment.schedules_detached {
            println!("  {} detached from schedule {schedule}", "✓".green());
        }
        for failure in &detachment.failures {
            println!("  {} {}: {}", "✗".red(), failure.target, failure.error);
        }
    }

    if let Some(redistribution) = &report.redistribution {
        if redistribution.total() > 0 {
            print_redistribution(redistribution);
        }
    }

    match &report.outcome {
        DeletionOutcome::Completed => {
            println!("{}", "User deleted.".green().bold());
        }
        DeletionOutcome::Aborted { stage, reason } => {
            println!(
                "{} at {}: {}",
                "ABORTED".red().bold(),
                stage.to_string().bold(),
                reason
            );
            println!("The user was {} deleted.", "not".bold());
        }
    }
}

pub fn print_onboarding_report(report: &OnboardingReport) {
    let verb = if report.created { "Created" } else { "Found" };
    println!(
        "\n{} user {} ({}) [{}]",
        verb.bold(),
        report.user.name,
        report.user.email,
        report.user.id
    );
    for step in &report.steps {
        match &step.status {
            StepStatus::Applied => {
                println!("  {} {} {} attached", "✓".green(), step.step, step.target);
            }
            StepStatus::AlreadyPresent => {
                println!("  - {} {} already attached", step.step, step.target);
            }
            StepStatus::Failed { error } => {
                println!("  {} {} {}: {}", "✗".red(), step.step, step.target, error);
            }
            StepStatus::Skipped { reason } => {
                println!("  - {} {} skipped ({reason})", step.step, step.target);
            }
        }
    }
}
