//! In-memory fake directory for orchestration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directory::{
    Assignment, DirectoryApi, DirectoryError, DirectoryResult, EscalationPolicy, EscalationRule,
    Incident, IncidentStatus, LayerUser, Oncall, Reference, Schedule, ScheduleLayer, Service, Team,
    User, UserRole,
};

/// How an injected failure should present.
#[derive(Debug, Clone, Copy)]
pub enum FailKind {
    Unavailable,
    Auth,
    NotFound,
}

fn make_error(kind: FailKind, resource: &str) -> DirectoryError {
    match kind {
        FailKind::Unavailable => DirectoryError::Unavailable {
            status: Some(503),
            message: format!("injected failure on {resource}"),
        },
        FailKind::Auth => DirectoryError::AuthFailure { status: 401 },
        FailKind::NotFound => DirectoryError::NotFound {
            resource: resource.to_string(),
        },
    }
}

#[derive(Default)]
pub struct State {
    pub users: BTreeMap<String, User>,
    pub teams: BTreeMap<String, Team>,
    pub team_members: BTreeSet<(String, String)>,
    pub policies: BTreeMap<String, EscalationPolicy>,
    pub schedules: BTreeMap<String, Schedule>,
    pub incidents: BTreeMap<String, Incident>,
    pub services: Vec<Service>,

    /// Queued failures per operation name.
    pub fail_next: BTreeMap<&'static str, VecDeque<FailKind>>,
    /// Incident ids whose reassignment always fails.
    pub always_fail_reassign: BTreeSet<String>,
    /// Simulates a concurrent re-add: after the user is detached from this
    /// schedule, they immediately reappear in its first layer.
    pub readd_after_schedule_detach: Option<(String, String)>,
    /// Simulates a lagging search index: the next email search for this
    /// address misses even though the user exists.
    pub hide_from_search_once: Option<String>,

    /// Ordered operation log, one entry per call.
    pub op_log: Vec<String>,
    pub reassign_calls: usize,
    pub delete_calls: usize,
    next_user: u32,
}

/// In-memory [`DirectoryApi`] with failure injection and an operation log.
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<State>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inspect<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.state.lock().unwrap())
    }

    pub fn always_fail_reassign(&self, incident_id: &str) {
        self.state
            .lock()
            .unwrap()
            .always_fail_reassign
            .insert(incident_id.to_string());
    }

    pub fn readd_after_schedule_detach(&self, schedule_id: &str, user_id: &str) {
        self.state.lock().unwrap().readd_after_schedule_detach =
            Some((schedule_id.to_string(), user_id.to_string()));
    }

    pub fn hide_from_search_once(&self, email: &str) {
        self.state.lock().unwrap().hide_from_search_once = Some(email.to_string());
    }

    pub fn fail_next(&self, op: &'static str, kind: FailKind) {
        self.state
            .lock()
            .unwrap()
            .fail_next
            .entry(op)
            .or_default()
            .push_back(kind);
    }

    /// Record the call and pop a queued failure for it, if any.
    fn enter(&self, op: &'static str, resource: &str) -> DirectoryResult<()> {
        let mut state = self.state.lock().unwrap();
        state.op_log.push(format!("{op}:{resource}"));
        if let Some(kind) = state.fail_next.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(make_error(kind, resource));
        }
        Ok(())
    }

    pub fn seed_user(&self, id: &str, email: &str, role: UserRole) -> User {
        let user = User {
            id: id.to_string(),
            name: format!("User {id}"),
            email: email.to_string(),
            role,
            teams: vec![],
        };
        self.state
            .lock()
            .unwrap()
            .users
            .insert(id.to_string(), user.clone());
        user
    }

    pub fn seed_team(&self, id: &str, name: &str) {
        self.state.lock().unwrap().teams.insert(
            id.to_string(),
            Team {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }

    /// Seed a policy; `rules` lists the user ids per level.
    pub fn seed_policy(&self, id: &str, rules: Vec<Vec<&str>>) {
        let policy = EscalationPolicy {
            id: id.to_string(),
            name: format!("Policy {id}"),
            escalation_rules: rules
                .into_iter()
                .map(|targets| EscalationRule {
                    id: None,
                    targets: targets.into_iter().map(Reference::user).collect(),
                })
                .collect(),
        };
        self.state
            .lock()
            .unwrap()
            .policies
            .insert(id.to_string(), policy);
    }

    /// Seed a schedule with one layer holding the given users.
    pub fn seed_schedule(&self, id: &str, layer_users: Vec<&str>) {
        let schedule = Schedule {
            id: id.to_string(),
            name: format!("Schedule {id}"),
            schedule_layers: vec![ScheduleLayer {
                id: format!("{id}-L1"),
                name: "Layer 1".to_string(),
                users: layer_users
                    .into_iter()
                    .map(|uid| LayerUser {
                        user: Reference::user(uid),
                        start: None,
                        end: None,
                    })
                    .collect(),
            }],
        };
        self.state
            .lock()
            .unwrap()
            .schedules
            .insert(id.to_string(), schedule);
    }

    pub fn seed_incident(&self, id: &str, assignee: &str, policy_id: Option<&str>) {
        let incident = Incident {
            id: id.to_string(),
            title: format!("Incident {id}"),
            status: IncidentStatus::Triggered,
            urgency: Some("high".to_string()),
            escalation_policy: policy_id.map(Reference::escalation_policy),
            assignments: vec![Assignment {
                assignee: Reference::user(assignee),
            }],
        };
        self.state
            .lock()
            .unwrap()
            .incidents
            .insert(id.to_string(), incident);
    }
}

#[async_trait]
impl DirectoryApi for FakeDirectory {
    async fn get_user_by_email(&self, email: &str) -> DirectoryResult<Option<User>> {
        self.enter("get_user_by_email", email)?;
        let mut state = self.state.lock().unwrap();
        if state
            .hide_from_search_once
            .as_deref()
            .is_some_and(|hidden| hidden.eq_ignore_ascii_case(email))
        {
            state.hide_from_search_once = None;
            return Ok(None);
        }
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_user_by_id(&self, id: &str) -> DirectoryResult<User> {
        self.enter("get_user_by_id", id)?;
        let state = self.state.lock().unwrap();
        state
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound {
                resource: format!("user {id}"),
            })
    }

    async fn create_user(&self, email: &str, name: &str, role: UserRole) -> DirectoryResult<User> {
        self.enter("create_user", email)?;
        let mut state = self.state.lock().unwrap();
        if state.users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(DirectoryError::Conflict {
                resource: format!("user {email}"),
                message: "email already exists".to_string(),
            });
        }
        state.next_user += 1;
        let user = User {
            id: format!("PU{}", state.next_user),
            name: name.to_string(),
            email: email.to_string(),
            role,
            teams: vec![],
        };
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn delete_user(&self, id: &str) -> DirectoryResult<()> {
        self.enter("delete_user", id)?;
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;
        if state.users.remove(id).is_none() {
            return Err(DirectoryError::NotFound {
                resource: format!("user {id}"),
            });
        }
        Ok(())
    }

    async fn list_teams(&self) -> DirectoryResult<Vec<Team>> {
        self.enter("list_teams", "*")?;
        Ok(self.state.lock().unwrap().teams.values().cloned().collect())
    }

    async fn add_user_to_team(&self, team_id: &str, user_id: &str) -> DirectoryResult<()> {
        self.enter("add_user_to_team", team_id)?;
        let mut state = self.state.lock().unwrap();
        if !state.teams.contains_key(team_id) {
            return Err(DirectoryError::NotFound {
                resource: format!("team {team_id}"),
            });
        }
        state
            .team_members
            .insert((team_id.to_string(), user_id.to_string()));
        let team_ref = Reference {
            id: team_id.to_string(),
            ref_type: "team_reference".to_string(),
            summary: state.teams.get(team_id).map(|t| t.name.clone()),
        };
        if let Some(user) = state.users.get_mut(user_id) {
            if !user.teams.iter().any(|t| t.id == team_id) {
                user.teams.push(team_ref);
            }
        }
        Ok(())
    }

    async fn list_escalation_policies(&self) -> DirectoryResult<Vec<EscalationPolicy>> {
        self.enter("list_escalation_policies", "*")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .policies
            .values()
            .cloned()
            .collect())
    }

    async fn get_escalation_policy(&self, id: &str) -> DirectoryResult<EscalationPolicy> {
        self.enter("get_escalation_policy", id)?;
        self.state
            .lock()
            .unwrap()
            .policies
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound {
                resource: format!("escalation policy {id}"),
            })
    }

    async fn add_user_to_level(
        &self,
        policy_id: &str,
        user_id: &str,
        level: u32,
    ) -> DirectoryResult<bool> {
        self.enter("add_user_to_level", policy_id)?;
        let mut state = self.state.lock().unwrap();
        let policy = state
            .policies
            .get_mut(policy_id)
            .ok_or_else(|| DirectoryError::NotFound {
                resource: format!("escalation policy {policy_id}"),
            })?;
        let index = usize::try_from(level).unwrap_or(usize::MAX);
        if index == 0 || index > policy.escalation_rules.len() {
            return Err(DirectoryError::Validation(format!(
                "level {level} out of range"
            )));
        }
        let rule = &mut policy.escalation_rules[index - 1];
        if rule.contains_user(user_id) {
            return Ok(false);
        }
        rule.targets.push(Reference::user(user_id));
        Ok(true)
    }

    async fn remove_user_from_all_levels(
        &self,
        policy_id: &str,
        user_id: &str,
    ) -> DirectoryResult<bool> {
        self.enter("remove_user_from_all_levels", policy_id)?;
        let mut state = self.state.lock().unwrap();
        let policy = state
            .policies
            .get_mut(policy_id)
            .ok_or_else(|| DirectoryError::NotFound {
                resource: format!("escalation policy {policy_id}"),
            })?;
        let mut changed = false;
        for rule in &mut policy.escalation_rules {
            let before = rule.targets.len();
            rule.targets.retain(|t| !t.is_user(user_id));
            changed |= rule.targets.len() != before;
        }
        Ok(changed)
    }

    async fn list_schedules(&self) -> DirectoryResult<Vec<Schedule>> {
        self.enter("list_schedules", "*")?;
        // List endpoints omit layers, like the real service.
        Ok(self
            .state
            .lock()
            .unwrap()
            .schedules
            .values()
            .map(|s| Schedule {
                id: s.id.clone(),
                name: s.name.clone(),
                schedule_layers: vec![],
            })
            .collect())
    }

    async fn get_schedule(&self, id: &str) -> DirectoryResult<Schedule> {
        self.enter("get_schedule", id)?;
        self.state
            .lock()
            .unwrap()
            .schedules
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound {
                resource: format!("schedule {id}"),
            })
    }

    async fn get_schedule_by_name(&self, name: &str) -> DirectoryResult<Option<Schedule>> {
        self.enter("get_schedule_by_name", name)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .schedules
            .values()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn add_user_to_schedule_layer(
        &self,
        schedule_id: &str,
        layer_id: Option<&str>,
        user_id: &str,
        interval: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> DirectoryResult<bool> {
        self.enter("add_user_to_schedule_layer", schedule_id)?;
        let mut state = self.state.lock().unwrap();
        let schedule =
            state
                .schedules
                .get_mut(schedule_id)
                .ok_or_else(|| DirectoryError::NotFound {
                    resource: format!("schedule {schedule_id}"),
                })?;
        let layer = match layer_id {
            Some(id) => schedule
                .schedule_layers
                .iter_mut()
                .find(|l| l.id == id)
                .ok_or_else(|| {
                    DirectoryError::Validation(format!("layer {id} not found"))
                })?,
            None => schedule
                .schedule_layers
                .first_mut()
                .ok_or_else(|| DirectoryError::Validation("schedule has no layers".to_string()))?,
        };
        if layer.contains_user(user_id) {
            return Ok(false);
        }
        layer.users.push(LayerUser {
            user: Reference::user(user_id),
            start: interval.map(|(s, _)| s),
            end: interval.map(|(_, e)| e),
        });
        Ok(true)
    }

    async fn remove_user_from_schedules(
        &self,
        schedule_id: &str,
        user_id: &str,
    ) -> DirectoryResult<bool> {
        self.enter("remove_user_from_schedules", schedule_id)?;
        let mut state = self.state.lock().unwrap();
        let readd = state.readd_after_schedule_detach.clone();
        let schedule =
            state
                .schedules
                .get_mut(schedule_id)
                .ok_or_else(|| DirectoryError::NotFound {
                    resource: format!("schedule {schedule_id}"),
                })?;
        let mut changed = false;
        for layer in &mut schedule.schedule_layers {
            let before = layer.users.len();
            layer.users.retain(|u| !u.user.is_user(user_id));
            changed |= layer.users.len() != before;
        }
        // Simulated concurrent mutation: someone re-adds the user right
        // after this detach lands.
        if let Some((readd_schedule, readd_user)) = readd {
            if readd_schedule == schedule_id && readd_user == user_id {
                if let Some(layer) = schedule.schedule_layers.first_mut() {
                    layer.users.push(LayerUser {
                        user: Reference::user(user_id),
                        start: None,
                        end: None,
                    });
                }
            }
        }
        Ok(changed)
    }

    async fn list_oncalls_for_user(&self, user_id: &str) -> DirectoryResult<Vec<Oncall>> {
        self.enter("list_oncalls_for_user", user_id)?;
        Ok(vec![])
    }

    async fn list_open_incidents_for_user(&self, user_id: &str) -> DirectoryResult<Vec<Incident>> {
        self.enter("list_open_incidents_for_user", user_id)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .incidents
            .values()
            .filter(|i| i.status.is_open() && i.assigned_to(user_id))
            .cloned()
            .collect())
    }

    async fn get_incident(&self, id: &str) -> DirectoryResult<Incident> {
        self.enter("get_incident", id)?;
        self.state
            .lock()
            .unwrap()
            .incidents
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound {
                resource: format!("incident {id}"),
            })
    }

    async fn reassign_incident_to_user(
        &self,
        incident_id: &str,
        user_id: &str,
    ) -> DirectoryResult<Incident> {
        self.enter("reassign_incident_to_user", incident_id)?;
        let mut state = self.state.lock().unwrap();
        state.reassign_calls += 1;
        if state.always_fail_reassign.contains(incident_id) {
            return Err(DirectoryError::Unavailable {
                status: Some(503),
                message: format!("injected reassignment failure for {incident_id}"),
            });
        }
        let incident =
            state
                .incidents
                .get_mut(incident_id)
                .ok_or_else(|| DirectoryError::NotFound {
                    resource: format!("incident {incident_id}"),
                })?;
        incident.assignments = vec![Assignment {
            assignee: Reference::user(user_id),
        }];
        Ok(incident.clone())
    }

    async fn reassign_incident_to_policy(
        &self,
        incident_id: &str,
        policy_id: &str,
    ) -> DirectoryResult<Incident> {
        self.enter("reassign_incident_to_policy", incident_id)?;
        let mut state = self.state.lock().unwrap();
        state.reassign_calls += 1;
        if state.always_fail_reassign.contains(incident_id) {
            return Err(DirectoryError::Unavailable {
                status: Some(503),
                message: format!("injected reassignment failure for {incident_id}"),
            });
        }
        // The service's own routing: pick the first policy member who is
        // not the current assignee.
        let current_assignee = state
            .incidents
            .get(incident_id)
            .and_then(|i| i.assignments.first().map(|a| a.assignee.id.clone()));
        let routed = state
            .policies
            .get(policy_id)
            .ok_or_else(|| DirectoryError::NotFound {
                resource: format!("escalation policy {policy_id}"),
            })?
            .user_ids()
            .into_iter()
            .find(|id| Some(id) != current_assignee.as_ref());
        let incident =
            state
                .incidents
                .get_mut(incident_id)
                .ok_or_else(|| DirectoryError::NotFound {
                    resource: format!("incident {incident_id}"),
                })?;
        if let Some(user_id) = routed {
            incident.assignments = vec![Assignment {
                assignee: Reference::user(user_id),
            }];
        }
        Ok(incident.clone())
    }

    async fn acknowledge_incident(&self, id: &str) -> DirectoryResult<Incident> {
        self.enter("acknowledge_incident", id)?;
        let mut state = self.state.lock().unwrap();
        let incident = state
            .incidents
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NotFound {
                resource: format!("incident {id}"),
            })?;
        if incident.status == IncidentStatus::Triggered {
            incident.status = IncidentStatus::Acknowledged;
        }
        Ok(incident.clone())
    }

    async fn resolve_incident(&self, id: &str) -> DirectoryResult<Incident> {
        self.enter("resolve_incident", id)?;
        let mut state = self.state.lock().unwrap();
        let incident = state
            .incidents
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NotFound {
                resource: format!("incident {id}"),
            })?;
        incident.status = IncidentStatus::Resolved;
        Ok(incident.clone())
    }

    async fn list_services(&self) -> DirectoryResult<Vec<Service>> {
        self.enter("list_services", "*")?;
        Ok(self.state.lock().unwrap().services.clone())
    }
}
