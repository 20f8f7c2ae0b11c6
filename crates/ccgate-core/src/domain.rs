// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Entity shapes for the stores in §3/§4.9: Run, Event, Todo, Plan, Team,
//! Subagent, Plugin, Token.
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub session_id: Option<String>,
    pub path: String,
    pub mode: String,
    pub client_model: String,
    pub requested_model: String,
    pub upstream_model: String,
    pub stream: bool,
    pub tool_count: u32,
    pub status: RunStatus,
    pub status_code: u16,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(id: String, path: String, mode: String, client_model: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            session_id: None,
            path,
            mode,
            requested_model: client_model.clone(),
            client_model,
            upstream_model: String::new(),
            stream: false,
            tool_count: 0,
            status: RunStatus::Running,
            status_code: 0,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, RunStatus::Running)
    }

    /// Transition to a terminal state exactly once. Returns `false` (no-op)
    /// if the run is already terminal — terminal states are immutable.
    pub fn complete(&mut self, status_code: u16, error: Option<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = if status_code < 400 { RunStatus::Completed } else { RunStatus::Failed };
        self.status_code = status_code;
        self.error = error;
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub plan_id: Option<String>,
    pub todo_id: Option<String>,
    pub team_id: Option<String>,
    pub subagent_id: Option<String>,
}

impl EventFilter {
    pub fn matches(&self, e: &Event) -> bool {
        field_matches(&self.event_type, Some(&e.event_type))
            && field_matches(&self.session_id, e.session_id.as_deref())
            && field_matches(&self.run_id, e.run_id.as_deref())
            && field_matches(&self.plan_id, e.plan_id.as_deref())
            && field_matches(&self.todo_id, e.todo_id.as_deref())
            && field_matches(&self.team_id, e.team_id.as_deref())
            && field_matches(&self.subagent_id, e.subagent_id.as_deref())
    }
}

fn field_matches(want: &Option<String>, have: Option<&str>) -> bool {
    match want {
        None => true,
        Some(w) => have == Some(w.as_str()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub plan_id: Option<String>,
    pub todo_id: Option<String>,
    pub team_id: Option<String>,
    pub subagent_id: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub plan_id: Option<String>,
    pub title: String,
    pub status: TodoStatus,
    /// Ordering key within a plan. §9 open question: todos lacking this are
    /// ordered by `created_at` instead (resolved in DESIGN.md).
    pub step_index: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Approved,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
    /// Index into `steps` of the step currently executing, if any.
    pub current_step: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(id: String, steps: Vec<PlanStep>) -> Self {
        let now = Utc::now();
        Self { id, steps, status: PlanStatus::Draft, current_step: None, created_at: now, updated_at: now }
    }

    /// Completes the currently-executing todo and starts the next pending
    /// one, never touching more than one todo per call (§3 invariant).
    pub fn advance(&mut self, todos: &mut [Todo]) {
        let mut todos_by_step: Vec<&mut Todo> = todos
            .iter_mut()
            .filter(|t| t.plan_id.as_deref() == Some(self.id.as_str()))
            .collect();
        todos_by_step.sort_by_key(|t| t.step_index.unwrap_or(u32::MAX));

        if let Some(current) = todos_by_step.iter_mut().find(|t| t.status == TodoStatus::InProgress) {
            current.status = TodoStatus::Completed;
            current.updated_at = Utc::now();
        }
        if let Some(next) = todos_by_step.iter_mut().find(|t| t.status == TodoStatus::Pending) {
            next.status = TodoStatus::InProgress;
            next.updated_at = Utc::now();
        }
        self.updated_at = Utc::now();
        if todos_by_step.iter().all(|t| t.status == TodoStatus::Completed) {
            self.status = PlanStatus::Completed;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub member_subagent_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subagent {
    pub id: String,
    pub name: String,
    pub team_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    /// Storage name: `<displayName>` for the default project, or
    /// `prj_<projectID>::<displayName>` otherwise (§3, §9 namespacing note).
    pub storage_name: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub skills: Vec<String>,
    pub hooks: Vec<String>,
    pub mcp_servers: Vec<String>,
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
}

impl Plugin {
    pub fn storage_name_for(project_id: &str, display_name: &str) -> String {
        if project_id == "default" || project_id.is_empty() {
            display_name.to_string()
        } else {
            format!("prj_{project_id}::{display_name}")
        }
    }

    pub fn belongs_to_project(project_id: &str, storage_name: &str) -> bool {
        if project_id == "default" || project_id.is_empty() {
            !storage_name.contains("::")
        } else {
            storage_name.starts_with(&format!("prj_{project_id}::"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Enabled,
    Disabled,
    Expired,
    Exhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub value: String,
    pub user_id: Option<String>,
    pub name: String,
    pub status: TokenStatus,
    pub quota: u64,
    pub unlimited_quota: bool,
    pub used: u64,
    pub models: Vec<String>,
    pub subnet: Vec<String>,
    pub group: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl Token {
    /// A token is usable iff enabled, not expired, has remaining quota (or
    /// unlimited), and the requested model / client IP pass any configured
    /// allow-lists (§3 invariant).
    pub fn is_usable_for(&self, model: &str, client_ip: Option<&str>) -> bool {
        if self.status != TokenStatus::Enabled {
            return false;
        }
        if let Some(expiry) = self.expired_at {
            if Utc::now() >= expiry {
                return false;
            }
        }
        if !self.unlimited_quota && self.used >= self.quota {
            return false;
        }
        if !self.models.is_empty() && !self.models.iter().any(|m| m == model) {
            return false;
        }
        if !self.subnet.is_empty() {
            let allowed: HashSet<&str> = self.subnet.iter().map(String::as_str).collect();
            match client_ip {
                Some(ip) if allowed.contains(ip) => {}
                _ => return false,
            }
        }
        true
    }

    pub fn group_or_default(&self) -> String {
        self.group.clone().unwrap_or_else(|| "default".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Run ───────────────────────────────────────────────────────────────────

    #[test]
    fn new_run_starts_running() {
        let r = Run::new("run_1".into(), "/v1/messages".into(), "chat".into(), "claude-test".into());
        assert_eq!(r.status, RunStatus::Running);
        assert!(!r.is_terminal());
    }

    #[test]
    fn complete_below_400_marks_completed() {
        let mut r = Run::new("run_1".into(), "/v1/messages".into(), "chat".into(), "m".into());
        assert!(r.complete(200, None));
        assert_eq!(r.status, RunStatus::Completed);
        assert!(r.completed_at.is_some());
    }

    #[test]
    fn complete_at_or_above_400_marks_failed() {
        let mut r = Run::new("run_1".into(), "/v1/messages".into(), "chat".into(), "m".into());
        assert!(r.complete(500, Some("boom".into())));
        assert_eq!(r.status, RunStatus::Failed);
    }

    #[test]
    fn complete_is_a_no_op_once_terminal() {
        let mut r = Run::new("run_1".into(), "/v1/messages".into(), "chat".into(), "m".into());
        r.complete(200, None);
        let completed_at = r.completed_at;
        assert!(!r.complete(500, Some("late".into())));
        assert_eq!(r.status, RunStatus::Completed);
        assert_eq!(r.completed_at, completed_at);
    }

    // ── EventFilter ───────────────────────────────────────────────────────────

    fn sample_event(session_id: &str, event_type: &str) -> Event {
        Event {
            id: "evt_1".into(),
            event_type: event_type.into(),
            session_id: Some(session_id.into()),
            run_id: None,
            plan_id: None,
            todo_id: None,
            team_id: None,
            subagent_id: None,
            data: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn filter_matches_on_session_id() {
        let filter = EventFilter { session_id: Some("s1".into()), ..Default::default() };
        assert!(filter.matches(&sample_event("s1", "todo.created")));
        assert!(!filter.matches(&sample_event("s2", "todo.created")));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EventFilter::default();
        assert!(filter.matches(&sample_event("s1", "todo.created")));
    }

    #[test]
    fn filter_combines_fields_conjunctively() {
        let filter = EventFilter {
            session_id: Some("s1".into()),
            event_type: Some("plan.updated".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&sample_event("s1", "todo.created")));
    }

    // ── Plan / Todo advancement ───────────────────────────────────────────────

    #[test]
    fn advance_completes_in_progress_and_starts_next_pending() {
        let mut plan = Plan::new(
            "plan_1".into(),
            vec![PlanStep { title: "a".into(), description: "".into() }, PlanStep { title: "b".into(), description: "".into() }],
        );
        let mut todos = vec![
            Todo {
                id: "t1".into(),
                plan_id: Some("plan_1".into()),
                title: "a".into(),
                status: TodoStatus::InProgress,
                step_index: Some(0),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            Todo {
                id: "t2".into(),
                plan_id: Some("plan_1".into()),
                title: "b".into(),
                status: TodoStatus::Pending,
                step_index: Some(1),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        ];
        plan.advance(&mut todos);
        assert_eq!(todos[0].status, TodoStatus::Completed);
        assert_eq!(todos[1].status, TodoStatus::InProgress);
    }

    #[test]
    fn advance_marks_plan_completed_when_all_todos_done() {
        let mut plan = Plan::new("plan_1".into(), vec![PlanStep { title: "a".into(), description: "".into() }]);
        let mut todos = vec![Todo {
            id: "t1".into(),
            plan_id: Some("plan_1".into()),
            title: "a".into(),
            status: TodoStatus::InProgress,
            step_index: Some(0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }];
        plan.advance(&mut todos);
        assert_eq!(plan.status, PlanStatus::Completed);
    }

    // ── Plugin project scoping ────────────────────────────────────────────────

    #[test]
    fn default_project_storage_name_has_no_prefix() {
        assert_eq!(Plugin::storage_name_for("default", "foo"), "foo");
        assert!(Plugin::belongs_to_project("default", "foo"));
    }

    #[test]
    fn non_default_project_storage_name_is_prefixed() {
        let name = Plugin::storage_name_for("proj1", "foo");
        assert_eq!(name, "prj_proj1::foo");
        assert!(Plugin::belongs_to_project("proj1", &name));
        assert!(!Plugin::belongs_to_project("proj2", &name));
    }

    // ── Token usability ───────────────────────────────────────────────────────

    fn sample_token() -> Token {
        Token {
            id: "tok_1".into(),
            value: "secret".into(),
            user_id: None,
            name: "t".into(),
            status: TokenStatus::Enabled,
            quota: 1000,
            unlimited_quota: false,
            used: 0,
            models: vec![],
            subnet: vec![],
            group: None,
            expired_at: None,
        }
    }

    #[test]
    fn disabled_token_is_not_usable() {
        let mut t = sample_token();
        t.status = TokenStatus::Disabled;
        assert!(!t.is_usable_for("m", None));
    }

    #[test]
    fn exhausted_quota_is_not_usable_unless_unlimited() {
        let mut t = sample_token();
        t.used = 1000;
        assert!(!t.is_usable_for("m", None));
        t.unlimited_quota = true;
        assert!(t.is_usable_for("m", None));
    }

    #[test]
    fn model_allow_list_restricts_usage() {
        let mut t = sample_token();
        t.models = vec!["gpt-4o".into()];
        assert!(!t.is_usable_for("claude-opus-4-5", None));
        assert!(t.is_usable_for("gpt-4o", None));
    }

    #[test]
    fn subnet_allow_list_restricts_usage() {
        let mut t = sample_token();
        t.subnet = vec!["127.0.0.1".into()];
        assert!(!t.is_usable_for("m", Some("10.0.0.1")));
        assert!(t.is_usable_for("m", Some("127.0.0.1")));
    }

    #[test]
    fn group_or_default_falls_back_when_absent() {
        let t = sample_token();
        assert_eq!(t.group_or_default(), "default");
    }
}
