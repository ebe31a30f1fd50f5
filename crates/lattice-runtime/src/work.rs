//! Task lifecycle tracking.
//!
//! The tracker owns every task the orchestrator has accepted and drives
//! it through the state machine:
//!
//! ```text
//! pending → assigned → in-progress → completed
//!                                  → failed  ⇄ pending (retry)
//!                                  → timeout ⇄ pending (retry)
//! pending|assigned|in-progress → cancelled
//! ```
//!
//! `completed` and `cancelled` are terminal. A retry resets the
//! transient fields (assignee, timestamps, progress, result) and
//! increments `retry_count`, bounded by `max_retries`.
//!
//! # Indices
//!
//! Three secondary indices are kept consistent with the primary map on
//! every mutation:
//!
//! - agent instance → set of task ids (assign/retry/cancel rebuild it)
//! - workflow plan id → set of task ids (set at create time)
//! - workflow step id → task id (one-to-one; correlates incoming
//!   `task.result` / `task.progress` messages to tracked tasks)

use chrono::{DateTime, Utc};
use lattice_protocol::TaskResultStatus;
use lattice_types::{AgentConfigId, AgentInstanceId, CorrelationId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

/// Default scheduling priority.
const DEFAULT_PRIORITY: u8 = 50;

/// Default retry budget.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Remaining-time ratio below which a deadlined task counts as at-risk.
const AT_RISK_RATIO: f64 = 0.20;

/// Lifecycle state of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    /// Completed and cancelled tasks never change state again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Assigned or in-progress: counted as an agent's active work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }
}

/// One task under lifecycle tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTask {
    pub task_id: TaskId,
    pub correlation_id: CorrelationId,
    /// What the agent is asked to do.
    pub task: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<AgentInstanceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<AgentConfigId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_plan_id: Option<String>,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl TrackedTask {
    fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// A non-terminal task whose remaining deadline budget has dropped
    /// below 20% of its original budget.
    #[must_use]
    pub fn is_at_risk(&self, now: DateTime<Utc>) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        if self.status.is_terminal() || deadline <= now {
            return false;
        }
        let total = (deadline - self.created_at).num_milliseconds();
        if total <= 0 {
            return false;
        }
        let remaining = (deadline - now).num_milliseconds();
        (remaining as f64 / total as f64) < AT_RISK_RATIO
    }
}

/// Options for [`WorkTracker::create_task`].
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task: String,
    pub priority: Option<u8>,
    pub requested_by: Option<AgentConfigId>,
    pub workflow_step_id: Option<String>,
    pub workflow_plan_id: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub max_retries: Option<u32>,
    pub tags: Vec<String>,
    /// Inherit an exchange's correlation id; minted when absent.
    pub correlation_id: Option<CorrelationId>,
}

impl NewTask {
    /// Starts an options struct with just the task text.
    #[must_use]
    pub fn named(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority.min(100));
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the workflow correlation hooks.
    #[must_use]
    pub fn with_workflow(
        mut self,
        step_id: Option<impl Into<String>>,
        plan_id: Option<impl Into<String>>,
    ) -> Self {
        self.workflow_step_id = step_id.map(Into::into);
        self.workflow_plan_id = plan_id.map(Into::into);
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Filter for [`WorkTracker::list_tasks`]; omitted fields match all.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<AgentInstanceId>,
    pub workflow_plan_id: Option<String>,
    pub requested_by: Option<AgentConfigId>,
    pub tag: Option<String>,
}

/// Aggregate counts over all tracked tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkSummary {
    pub total: usize,
    pub pending: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub cancelled: usize,
    /// Mean duration over completed tasks with both timestamps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<i64>,
    /// Non-terminal tasks with under 20% of their deadline budget left.
    pub at_risk: usize,
}

/// Per-agent task statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWorkload {
    pub agent_instance_id: AgentInstanceId,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<i64>,
}

/// Filtered snapshot with summary and workloads attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkReport {
    pub generated_at: DateTime<Utc>,
    pub tasks: Vec<TrackedTask>,
    pub summary: WorkSummary,
    pub workloads: Vec<AgentWorkload>,
}

/// Owns the task map and its indices.
///
/// All expected-failure paths (`unknown id`, illegal transition) return
/// `false`; the outer surface converts those to RPC errors where
/// appropriate.
#[derive(Debug, Default)]
pub struct WorkTracker {
    tasks: HashMap<TaskId, TrackedTask>,
    by_agent: HashMap<AgentInstanceId, HashSet<TaskId>>,
    by_plan: HashMap<String, HashSet<TaskId>>,
    by_step: HashMap<String, TaskId>,
}

impl WorkTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a task in `pending` and registers its workflow indices.
    pub fn create_task(&mut self, options: NewTask) -> TrackedTask {
        let task = TrackedTask {
            task_id: TaskId::new(),
            correlation_id: options.correlation_id.unwrap_or_else(CorrelationId::new),
            task: options.task,
            status: TaskStatus::Pending,
            assigned_to: None,
            requested_by: options.requested_by,
            workflow_step_id: options.workflow_step_id,
            workflow_plan_id: options.workflow_plan_id,
            priority: options.priority.unwrap_or(DEFAULT_PRIORITY),
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            deadline: options.deadline,
            progress_percent: None,
            status_line: None,
            result: None,
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            tags: options.tags,
        };

        if let Some(plan) = &task.workflow_plan_id {
            self.by_plan
                .entry(plan.clone())
                .or_default()
                .insert(task.task_id);
        }
        if let Some(step) = &task.workflow_step_id {
            self.by_step.insert(step.clone(), task.task_id);
        }
        self.tasks.insert(task.task_id, task.clone());
        task
    }

    /// Hands a task to an agent. Allowed from `pending` or `failed`.
    pub fn assign_task(&mut self, task_id: &TaskId, agent: &AgentInstanceId) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Failed) {
            return false;
        }

        if let Some(previous) = task.assigned_to {
            remove_index(&mut self.by_agent, &previous, task_id);
        }
        task.status = TaskStatus::Assigned;
        task.assigned_to = Some(*agent);
        task.assigned_at = Some(Utc::now());
        self.by_agent.entry(*agent).or_default().insert(*task_id);
        true
    }

    /// Marks an assigned task as running.
    pub fn start_task(&mut self, task_id: &TaskId) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if task.status != TaskStatus::Assigned {
            return false;
        }
        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        true
    }

    /// Records progress. Idempotent; allowed in any non-terminal state.
    pub fn update_progress(
        &mut self,
        task_id: &TaskId,
        percent: Option<u8>,
        status_line: Option<String>,
    ) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if task.status.is_terminal() {
            return false;
        }
        if let Some(p) = percent {
            task.progress_percent = Some(p.min(100));
        }
        if let Some(line) = status_line {
            task.status_line = Some(line);
        }
        true
    }

    /// Finishes a task with the agent-reported outcome.
    ///
    /// `success` and `partial` complete the task; `timeout` times it
    /// out; `failure` fails it. Allowed from `assigned` or
    /// `in-progress`.
    pub fn complete_task(
        &mut self,
        task_id: &TaskId,
        outcome: TaskResultStatus,
        result: Option<String>,
    ) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if !task.status.is_active() {
            return false;
        }

        task.status = match outcome {
            TaskResultStatus::Success | TaskResultStatus::Partial => TaskStatus::Completed,
            TaskResultStatus::Timeout => TaskStatus::Timeout,
            TaskResultStatus::Failure => TaskStatus::Failed,
        };
        task.completed_at = Some(Utc::now());
        task.progress_percent = Some(100);
        task.result = result;
        true
    }

    /// Cancels a task. Rejected once `completed` or `cancelled`.
    pub fn cancel_task(&mut self, task_id: &TaskId) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if matches!(task.status, TaskStatus::Completed | TaskStatus::Cancelled) {
            return false;
        }
        task.status = TaskStatus::Cancelled;
        true
    }

    /// Returns a failed or timed-out task to `pending` for another
    /// attempt, clearing the transient fields. Bounded by
    /// `max_retries`.
    pub fn retry_task(&mut self, task_id: &TaskId) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if !matches!(task.status, TaskStatus::Failed | TaskStatus::Timeout) {
            return false;
        }
        if task.retry_count >= task.max_retries {
            return false;
        }

        if let Some(previous) = task.assigned_to {
            remove_index(&mut self.by_agent, &previous, task_id);
        }
        task.retry_count += 1;
        task.status = TaskStatus::Pending;
        task.assigned_to = None;
        task.assigned_at = None;
        task.started_at = None;
        task.completed_at = None;
        task.progress_percent = None;
        task.status_line = None;
        task.result = None;
        true
    }

    /// Looks up one task.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<&TrackedTask> {
        self.tasks.get(task_id)
    }

    /// Resolves a workflow step id to its task id.
    #[must_use]
    pub fn task_for_step(&self, step_id: &str) -> Option<TaskId> {
        self.by_step.get(step_id).copied()
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Filtered task snapshot, sorted by priority descending.
    ///
    /// Uses the agent or plan index for O(matches) access when those
    /// filters are present; remaining predicates are applied on top.
    #[must_use]
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<TrackedTask> {
        let candidates: Vec<&TrackedTask> = if let Some(agent) = &filter.assigned_to {
            self.ids_to_tasks(self.by_agent.get(agent))
        } else if let Some(plan) = &filter.workflow_plan_id {
            self.ids_to_tasks(self.by_plan.get(plan))
        } else {
            self.tasks.values().collect()
        };

        let mut matched: Vec<TrackedTask> = candidates
            .into_iter()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .assigned_to
                    .map_or(true, |a| t.assigned_to == Some(a))
            })
            .filter(|t| {
                filter
                    .workflow_plan_id
                    .as_ref()
                    .map_or(true, |p| t.workflow_plan_id.as_ref() == Some(p))
            })
            .filter(|t| {
                filter
                    .requested_by
                    .as_ref()
                    .map_or(true, |r| t.requested_by.as_ref() == Some(r))
            })
            .filter(|t| {
                filter
                    .tag
                    .as_ref()
                    .map_or(true, |tag| t.tags.iter().any(|x| x == tag))
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.priority.cmp(&a.priority));
        matched
    }

    fn ids_to_tasks(&self, ids: Option<&HashSet<TaskId>>) -> Vec<&TrackedTask> {
        ids.map(|set| set.iter().filter_map(|id| self.tasks.get(id)).collect())
            .unwrap_or_default()
    }

    /// Counts per status, average completed duration, at-risk count.
    #[must_use]
    pub fn summary(&self) -> WorkSummary {
        let now = Utc::now();
        let mut summary = WorkSummary {
            total: self.tasks.len(),
            pending: 0,
            assigned: 0,
            in_progress: 0,
            completed: 0,
            failed: 0,
            timeout: 0,
            cancelled: 0,
            average_duration_ms: None,
            at_risk: 0,
        };

        let mut duration_sum = 0i64;
        let mut duration_count = 0i64;
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Assigned => summary.assigned += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Timeout => summary.timeout += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
            if task.status == TaskStatus::Completed {
                if let Some(ms) = task.duration_ms() {
                    duration_sum += ms;
                    duration_count += 1;
                }
            }
            if task.is_at_risk(now) {
                summary.at_risk += 1;
            }
        }
        if duration_count > 0 {
            summary.average_duration_ms = Some(duration_sum / duration_count);
        }
        summary
    }

    /// Per-agent statistics over every agent that owns at least one task.
    #[must_use]
    pub fn agent_workloads(&self) -> Vec<AgentWorkload> {
        let mut workloads: Vec<AgentWorkload> = self
            .by_agent
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(agent, ids)| {
                let mut active = 0;
                let mut completed = 0;
                let mut failed = 0;
                let mut duration_sum = 0i64;
                let mut duration_count = 0i64;

                for task in ids.iter().filter_map(|id| self.tasks.get(id)) {
                    if task.status.is_active() {
                        active += 1;
                    }
                    match task.status {
                        TaskStatus::Completed => {
                            completed += 1;
                            if let Some(ms) = task.duration_ms() {
                                duration_sum += ms;
                                duration_count += 1;
                            }
                        }
                        TaskStatus::Failed | TaskStatus::Timeout => failed += 1,
                        _ => {}
                    }
                }

                AgentWorkload {
                    agent_instance_id: *agent,
                    active_tasks: active,
                    completed_tasks: completed,
                    failed_tasks: failed,
                    average_duration_ms: (duration_count > 0)
                        .then(|| duration_sum / duration_count),
                }
            })
            .collect();

        workloads.sort_by_key(|w| w.agent_instance_id.uuid());
        workloads
    }

    /// Filtered snapshot plus summary and workloads, stamped now.
    #[must_use]
    pub fn generate_report(
        &self,
        workflow_plan_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> WorkReport {
        let filter = TaskFilter {
            workflow_plan_id: workflow_plan_id.map(str::to_string),
            ..TaskFilter::default()
        };
        let tasks: Vec<TrackedTask> = self
            .list_tasks(&filter)
            .into_iter()
            .filter(|t| since.map_or(true, |cutoff| t.created_at >= cutoff))
            .collect();

        WorkReport {
            generated_at: Utc::now(),
            tasks,
            summary: self.summary(),
            workloads: self.agent_workloads(),
        }
    }

    /// Sweeps terminal tasks older than `max_age` (by `completed_at`,
    /// falling back to `created_at`) and purges their index entries.
    /// Returns the number removed.
    pub fn cleanup(&mut self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(24));

        let stale: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .filter(|t| t.completed_at.unwrap_or(t.created_at) < cutoff)
            .map(|t| t.task_id)
            .collect();

        for task_id in &stale {
            if let Some(task) = self.tasks.remove(task_id) {
                if let Some(agent) = task.assigned_to {
                    remove_index(&mut self.by_agent, &agent, task_id);
                }
                if let Some(plan) = &task.workflow_plan_id {
                    if let Some(set) = self.by_plan.get_mut(plan) {
                        set.remove(task_id);
                        if set.is_empty() {
                            self.by_plan.remove(plan);
                        }
                    }
                }
                if let Some(step) = &task.workflow_step_id {
                    self.by_step.remove(step);
                }
            }
        }
        if !stale.is_empty() {
            debug!(removed = stale.len(), "cleaned up terminal tasks");
        }
        stale.len()
    }
}

fn remove_index(
    index: &mut HashMap<AgentInstanceId, HashSet<TaskId>>,
    agent: &AgentInstanceId,
    task_id: &TaskId,
) {
    if let Some(set) = index.get_mut(agent) {
        set.remove(task_id);
        if set.is_empty() {
            index.remove(agent);
        }
    }
}
