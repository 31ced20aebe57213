//! Scenario tests for onboarding.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::FakeDirectory;
use directory::{DirectoryApi, EscalationPolicy, UserRole};
use lifecycle::{
    LevelSelector, LifecycleError, OnboardStep, OnboardingOrchestrator, OnboardingRequest,
    PolicyAttachment, ScheduleAttachment, StepStatus,
};

fn request(email: &str) -> OnboardingRequest {
    OnboardingRequest {
        email: email.to_string(),
        name: "Ana Park".to_string(),
        role: UserRole::Responder,
        team_id: None,
        policy: None,
        schedule: None,
    }
}

fn orchestrator(fake: &Arc<FakeDirectory>) -> OnboardingOrchestrator {
    OnboardingOrchestrator::new(Arc::clone(fake) as Arc<dyn DirectoryApi>)
}

#[tokio::test]
async fn repeat_onboarding_reuses_existing_user() {
    let fake = Arc::new(FakeDirectory::new());
    fake.seed_team("T1", "Platform");
    fake.seed_team("T2", "Data");

    let mut first = request("ana@example.com");
    first.team_id = Some("T1".to_string());
    let report = orchestrator(&fake).onboard(&first).await.expect("first run");
    assert!(report.created);
    assert!(report.is_complete());
    let user_id = report.user.id.clone();

    // Second call with the same email: no duplicate, new attachment applied.
    let mut second = request("ana@example.com");
    second.team_id = Some("T2".to_string());
    let report = orchestrator(&fake).onboard(&second).await.expect("second run");
    assert!(!report.created);
    assert_eq!(report.user.id, user_id);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].step, OnboardStep::Team);
    assert_eq!(report.steps[0].status, StepStatus::Applied);

    fake.inspect(|state| {
        assert_eq!(state.users.len(), 1);
        assert!(state.team_members.contains(&("T1".to_string(), user_id.clone())));
        assert!(state.team_members.contains(&("T2".to_string(), user_id.clone())));
    });
}

#[tokio::test]
async fn creation_conflict_falls_back_to_reuse() {
    let fake = Arc::new(FakeDirectory::new());
    // The search misses, then the create conflicts: a concurrent creation
    // won the race. The post-conflict lookup finds the winner.
    fake.seed_user("PX", "ana@example.com", UserRole::Responder);
    fake.hide_from_search_once("ana@example.com");

    let report = orchestrator(&fake)
        .onboard(&request("ana@example.com"))
        .await
        .expect("run");
    assert!(!report.created);
    assert_eq!(report.user.id, "PX");
}

#[tokio::test]
async fn policy_and_schedule_together_are_rejected_before_any_call() {
    let fake = Arc::new(FakeDirectory::new());
    let mut bad = request("ana@example.com");
    bad.policy = Some(PolicyAttachment {
        policy_id: "EP1".to_string(),
        level: None,
    });
    bad.schedule = Some(ScheduleAttachment {
        schedule_id: "S1".to_string(),
        layer_id: None,
        interval: None,
    });

    let err = orchestrator(&fake).onboard(&bad).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Validation(_)));
    fake.inspect(|state| assert!(state.op_log.is_empty(), "no remote call may happen"));
}

#[tokio::test]
async fn disallowed_email_domain_is_rejected_before_any_call() {
    let fake = Arc::new(FakeDirectory::new());
    let err = orchestrator(&fake)
        .with_allowed_domains(vec!["example.com".to_string()])
        .onboard(&request("mallory@evil.test"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Validation(_)));
    fake.inspect(|state| assert!(state.op_log.is_empty()));
}

#[tokio::test]
async fn junior_role_defaults_to_first_level_without_selector() {
    let fake = Arc::new(FakeDirectory::new());
    fake.seed_policy("EP1", vec![vec!["PB"], vec!["PC"]]);

    let mut req = request("newbie@example.com");
    req.role = UserRole::LimitedUser;
    req.policy = Some(PolicyAttachment {
        policy_id: "EP1".to_string(),
        level: None,
    });

    let report = orchestrator(&fake).onboard(&req).await.expect("run");
    assert!(report.is_complete());
    fake.inspect(|state| {
        let policy = &state.policies["EP1"];
        assert!(policy.escalation_rules[0].contains_user(&report.user.id));
        assert!(!policy.escalation_rules[1].contains_user(&report.user.id));
    });
}

#[tokio::test]
async fn senior_role_defaults_to_last_level_without_selector() {
    let fake = Arc::new(FakeDirectory::new());
    fake.seed_policy("EP1", vec![vec!["PB"], vec!["PC"]]);

    let mut req = request("boss@example.com");
    req.role = UserRole::Manager;
    req.policy = Some(PolicyAttachment {
        policy_id: "EP1".to_string(),
        level: None,
    });

    let report = orchestrator(&fake).onboard(&req).await.expect("run");
    assert!(report.is_complete());
    fake.inspect(|state| {
        let policy = &state.policies["EP1"];
        assert!(policy.escalation_rules[1].contains_user(&report.user.id));
    });
}

struct TopLevelSelector;

impl LevelSelector for TopLevelSelector {
    fn select(&self, _policy: &EscalationPolicy) -> Result<u32, LifecycleError> {
        Ok(1)
    }
}

#[tokio::test]
async fn selector_overrides_role_default() {
    let fake = Arc::new(FakeDirectory::new());
    fake.seed_policy("EP1", vec![vec!["PB"], vec!["PC"]]);

    let mut req = request("boss@example.com");
    req.role = UserRole::Manager;
    req.policy = Some(PolicyAttachment {
        policy_id: "EP1".to_string(),
        level: None,
    });

    let report = orchestrator(&fake)
        .with_level_selector(Arc::new(TopLevelSelector))
        .onboard(&req)
        .await
        .expect("run");
    assert!(report.is_complete());
    fake.inspect(|state| {
        assert!(state.policies["EP1"].escalation_rules[0].contains_user(&report.user.id));
    });
}

#[tokio::test]
async fn step_failure_skips_later_steps_but_keeps_earlier_ones() {
    let fake = Arc::new(FakeDirectory::new());
    fake.seed_team("T1", "Platform");
    // The policy does not exist, so that step fails.
    let mut req = request("ana@example.com");
    req.team_id = Some("T1".to_string());
    req.policy = Some(PolicyAttachment {
        policy_id: "EP-MISSING".to_string(),
        level: Some(1),
    });

    let report = orchestrator(&fake).onboard(&req).await.expect("run");
    assert!(!report.is_complete());
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[0].status, StepStatus::Applied);
    assert!(matches!(report.steps[1].status, StepStatus::Failed { .. }));

    // The team attachment is not rolled back.
    fake.inspect(|state| {
        assert!(state
            .team_members
            .contains(&("T1".to_string(), report.user.id.clone())));
    });
}

#[tokio::test]
async fn schedule_attachment_honors_interval() {
    let fake = Arc::new(FakeDirectory::new());
    fake.seed_schedule("S1", vec!["PB"]);

    let start = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 9, 15, 0, 0, 0).unwrap();
    let mut req = request("ana@example.com");
    req.schedule = Some(ScheduleAttachment {
        schedule_id: "S1".to_string(),
        layer_id: None,
        interval: Some((start, end)),
    });

    let report = orchestrator(&fake).onboard(&req).await.expect("run");
    assert!(report.is_complete());
    fake.inspect(|state| {
        let layer = &state.schedules["S1"].schedule_layers[0];
        let added = layer
            .users
            .iter()
            .find(|u| u.user.id == report.user.id)
            .expect("user on layer");
        assert_eq!(added.start, Some(start));
        assert_eq!(added.end, Some(end));
    });
}

#[tokio::test]
async fn inverted_interval_is_rejected() {
    let fake = Arc::new(FakeDirectory::new());
    let start = Utc.with_ymd_and_hms(2026, 9, 15, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
    let mut req = request("ana@example.com");
    req.schedule = Some(ScheduleAttachment {
        schedule_id: "S1".to_string(),
        layer_id: None,
        interval: Some((start, end)),
    });

    let err = orchestrator(&fake).onboard(&req).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Validation(_)));
    fake.inspect(|state| assert!(state.op_log.is_empty()));
}
