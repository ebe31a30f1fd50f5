//! The orchestrator: composition root of the coordination core.
//!
//! One orchestrator instance per gateway. It owns the router, role
//! manager, work tracker and security manager, wires the built-in
//! subscription handlers, selects agents for submitted tasks, and runs
//! the two lifecycle timers (cleanup, announce).
//!
//! # Lock Order
//!
//! ```text
//! router  →  work | roles | security | heartbeats  →  listeners
//! ```
//!
//! Built-in handlers run under the router lock and take exactly one
//! domain lock. Public operations never take the router lock while
//! holding a domain lock. Event listeners may be invoked under the
//! router lock (handler-originated events) and must not re-enter the
//! orchestrator.
//!
//! # Agent Selection
//!
//! For a submitted task:
//!
//! 1. A pinned `target_agent_instance_id` wins if locally registered,
//!    otherwise no agent is selected.
//! 2. Otherwise candidates are the local agents, intersected with the
//!    holders of `target_role_id` when given.
//! 3. Candidates are ranked by heartbeat load ascending, then role
//!    priority descending; the first wins.
//! 4. No candidate is not an error: the task stays `pending` and
//!    dashboards show it as queued.

use crate::config::CoreConfig;
use crate::events::{EventListener, OrchestratorEvent};
use crate::roles::{Role, RoleAssignment, RoleManager, RoleState};
use crate::router::{
    PeerGateway, PeerStatus, PeerTransport, Router, SendOptions, SubscriptionFilter,
};
use crate::work::{
    NewTask, TaskFilter, TrackedTask, WorkReport, WorkSummary, WorkTracker,
};
use chrono::{DateTime, Utc};
use lattice_auth::{AuditEntry, SecurityManager, SecurityPolicy, Verdict};
use lattice_protocol::{validate, DiscoveryAction, MeshMessage, MessagePayload, ValidationError};
use lattice_types::{AgentConfigId, AgentIdentity, AgentInstanceId, GatewayId, RoleId, TaskId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default role priority when a candidate has no assignment.
const UNASSIGNED_PRIORITY: u8 = 50;

/// The latest heartbeat seen from an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatRecord {
    pub load: f32,
    pub active_tasks: Option<u32>,
    pub status_line: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Options for [`Orchestrator::submit_task`].
#[derive(Debug, Clone, Default)]
pub struct SubmitTask {
    /// What to do; sanitized and bounded at the boundary.
    pub task: String,
    pub priority: Option<u8>,
    /// Restrict candidates to holders of this role.
    pub target_role_id: Option<RoleId>,
    /// Pin the task to one agent instance.
    pub target_agent_instance_id: Option<AgentInstanceId>,
    pub workflow_step_id: Option<String>,
    pub workflow_plan_id: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub max_retries: Option<u32>,
    pub tags: Vec<String>,
    pub requested_by: Option<AgentConfigId>,
}

impl SubmitTask {
    /// Starts a submission with just the task text.
    #[must_use]
    pub fn named(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    /// Restricts candidates to holders of `role_id`.
    #[must_use]
    pub fn with_target_role(mut self, role_id: impl Into<RoleId>) -> Self {
        self.target_role_id = Some(role_id.into());
        self
    }

    /// Pins the task to one agent instance.
    #[must_use]
    pub fn with_target_agent(mut self, instance_id: AgentInstanceId) -> Self {
        self.target_agent_instance_id = Some(instance_id);
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

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

struct Inner {
    config: CoreConfig,
    identity: AgentIdentity,
    router: Mutex<Router>,
    roles: Mutex<RoleManager>,
    work: Mutex<WorkTracker>,
    security: Mutex<SecurityManager>,
    heartbeats: Mutex<HashMap<AgentInstanceId, HeartbeatRecord>>,
    listeners: Mutex<Vec<EventListener>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    /// Clones the listener list out of its lock, then invokes each.
    fn emit(&self, event: &OrchestratorEvent) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(event);
        }
    }
}

/// The coordination core a gateway embeds.
///
/// Cheap to clone; clones share the same instance. The core holds no
/// static state — multiple orchestrators coexist in one process (tests
/// build meshes this way).
///
/// # Example
///
/// ```
/// use lattice_runtime::{CoreConfig, Orchestrator, SubmitTask};
/// use lattice_types::{AgentIdentity, AgentInstanceId};
///
/// let orchestrator = Orchestrator::new(CoreConfig::new("gw-a"));
/// let coder = AgentIdentity::new(AgentInstanceId::new(), "coder-1", "gw-a");
/// orchestrator.register_agent(coder.clone()).expect("valid id");
/// orchestrator
///     .assign_role(&coder.instance_id, &"coder".into(), "setup")
///     .expect("builtin role");
///
/// let task = orchestrator
///     .submit_task(SubmitTask::named("implement the parser").with_target_role("coder"))
///     .expect("valid submission");
/// assert_eq!(task.assigned_to, Some(coder.instance_id));
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Creates an orchestrator with defaults (no-op transport, random
    /// signing secret).
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        Self::build(config, None, SecurityManager::new())
    }

    /// Creates an orchestrator with an injected peer transport.
    #[must_use]
    pub fn with_transport(config: CoreConfig, transport: Arc<dyn PeerTransport>) -> Self {
        Self::build(config, Some(transport), SecurityManager::new())
    }

    /// Creates an orchestrator with a caller-built security manager
    /// (e.g. a shared mesh secret).
    #[must_use]
    pub fn with_security(config: CoreConfig, security: SecurityManager) -> Self {
        Self::build(config, None, security)
    }

    fn build(
        config: CoreConfig,
        transport: Option<Arc<dyn PeerTransport>>,
        security: SecurityManager,
    ) -> Self {
        let identity = AgentIdentity::orchestrator(config.gateway_id.clone());

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let mut router = match transport {
                Some(transport) => Router::with_transport(config.gateway_id.clone(), transport),
                None => Router::new(config.gateway_id.clone()),
            };
            Self::wire_handlers(&mut router, weak.clone(), config.gateway_id.clone());

            Inner {
                config,
                identity,
                router: Mutex::new(router),
                roles: Mutex::new(RoleManager::new()),
                work: Mutex::new(WorkTracker::new()),
                security: Mutex::new(security),
                heartbeats: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                timers: Mutex::new(Vec::new()),
            }
        });

        Self { inner }
    }

    /// Subscribes the four built-in handlers. Each upgrades the weak
    /// reference, takes one domain lock, and returns.
    fn wire_handlers(router: &mut Router, weak: Weak<Inner>, local_gateway: GatewayId) {
        // task.result: correlate via the step index, finish the task.
        // Results without a workflow step id are silently ignored.
        let handle = weak.clone();
        router.subscribe(
            SubscriptionFilter::for_type("task.result"),
            Arc::new(move |message: &MeshMessage| {
                let Some(inner) = handle.upgrade() else {
                    return Ok(());
                };
                let MessagePayload::TaskResult {
                    status,
                    result,
                    workflow_step_id: Some(step_id),
                    ..
                } = &message.payload
                else {
                    return Ok(());
                };

                let completion = {
                    let mut work = inner.work.lock();
                    work.task_for_step(step_id).and_then(|task_id| {
                        work.complete_task(&task_id, *status, result.clone())
                            .then(|| (task_id, work.task(&task_id).map(|t| t.status)))
                    })
                };
                if let Some((task_id, Some(task_status))) = completion {
                    inner.emit(&OrchestratorEvent::TaskCompleted {
                        task_id,
                        status: task_status,
                        result: result.clone(),
                    });
                }
                Ok(())
            }),
        );

        // task.progress: correlate via the step index, record progress.
        let handle = weak.clone();
        router.subscribe(
            SubscriptionFilter::for_type("task.progress"),
            Arc::new(move |message: &MeshMessage| {
                let Some(inner) = handle.upgrade() else {
                    return Ok(());
                };
                let MessagePayload::TaskProgress {
                    percent,
                    status_line,
                    workflow_step_id: Some(step_id),
                } = &message.payload
                else {
                    return Ok(());
                };

                let updated = {
                    let mut work = inner.work.lock();
                    work.task_for_step(step_id).and_then(|task_id| {
                        work.update_progress(&task_id, *percent, status_line.clone())
                            .then_some(task_id)
                    })
                };
                if let Some(task_id) = updated {
                    inner.emit(&OrchestratorEvent::TaskProgress {
                        task_id,
                        percent: *percent,
                        status_line: status_line.clone(),
                    });
                }
                Ok(())
            }),
        );

        // heartbeat: remember the latest per sender.
        let handle = weak.clone();
        router.subscribe(
            SubscriptionFilter::for_type("heartbeat"),
            Arc::new(move |message: &MeshMessage| {
                let Some(inner) = handle.upgrade() else {
                    return Ok(());
                };
                let MessagePayload::Heartbeat {
                    load,
                    active_tasks,
                    status_line,
                } = &message.payload
                else {
                    return Ok(());
                };

                inner.heartbeats.lock().insert(
                    message.envelope.from.instance_id,
                    HeartbeatRecord {
                        load: *load,
                        active_tasks: *active_tasks,
                        status_line: status_line.clone(),
                        received_at: Utc::now(),
                    },
                );
                Ok(())
            }),
        );

        // agent.discovery: surface join/leave of non-local agents.
        let handle = weak;
        router.subscribe(
            SubscriptionFilter::for_type("agent.discovery"),
            Arc::new(move |message: &MeshMessage| {
                let Some(inner) = handle.upgrade() else {
                    return Ok(());
                };
                let MessagePayload::AgentDiscovery {
                    action,
                    agent: Some(agent),
                } = &message.payload
                else {
                    return Ok(());
                };
                if agent.gateway_id == local_gateway {
                    return Ok(());
                }

                match action {
                    DiscoveryAction::Join | DiscoveryAction::Announce => {
                        inner.emit(&OrchestratorEvent::AgentJoined {
                            agent: agent.clone(),
                        });
                    }
                    DiscoveryAction::Leave => {
                        inner.emit(&OrchestratorEvent::AgentLeft {
                            agent: agent.clone(),
                        });
                    }
                }
                Ok(())
            }),
        );
    }

    /// The gateway this orchestrator serves.
    #[must_use]
    pub fn gateway_id(&self) -> GatewayId {
        self.inner.config.gateway_id.clone()
    }

    /// The fixed system identity used as `from` on core-originated
    /// messages.
    #[must_use]
    pub fn identity(&self) -> AgentIdentity {
        self.inner.identity.clone()
    }

    /// Registers an event listener (kept until the orchestrator drops).
    pub fn on_event(&self, listener: EventListener) {
        self.inner.listeners.lock().push(listener);
    }

    // ─── Agents ─────────────────────────────────────────────────────

    /// Registers a local agent and announces it to the mesh.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] when the config id fails the pattern check.
    pub fn register_agent(&self, agent: AgentIdentity) -> Result<(), ValidationError> {
        validate::validate_agent_config_id(agent.config_id.as_str())?;

        let mut router = self.inner.router.lock();
        router.register_local_agent(agent.clone());
        router.send(
            self.inner.identity.clone(),
            None,
            MessagePayload::AgentDiscovery {
                action: DiscoveryAction::Join,
                agent: Some(agent.clone()),
            },
            SendOptions::default(),
        );
        drop(router);

        info!(agent = %agent, "registered local agent");
        Ok(())
    }

    /// Removes a local agent, announces its departure, and evicts its
    /// heartbeat and rate-limit state.
    pub fn unregister_agent(&self, instance_id: &AgentInstanceId) -> bool {
        let mut router = self.inner.router.lock();
        let Some(agent) = router.unregister_local_agent(instance_id) else {
            return false;
        };
        router.send(
            self.inner.identity.clone(),
            None,
            MessagePayload::AgentDiscovery {
                action: DiscoveryAction::Leave,
                agent: Some(agent.clone()),
            },
            SendOptions::default(),
        );
        drop(router);

        self.inner.heartbeats.lock().remove(instance_id);
        self.inner.security.lock().forget_agent(&agent.config_id);
        info!(agent = %agent, "unregistered local agent");
        true
    }

    /// Snapshot of locally registered agents.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentIdentity> {
        self.inner.router.lock().local_agents()
    }

    /// The latest heartbeat seen from an instance.
    #[must_use]
    pub fn heartbeat(&self, instance_id: &AgentInstanceId) -> Option<HeartbeatRecord> {
        self.inner.heartbeats.lock().get(instance_id).cloned()
    }

    // ─── Peers ──────────────────────────────────────────────────────

    /// Adds or replaces a peer gateway.
    pub fn register_peer(&self, peer: PeerGateway) {
        self.inner.router.lock().register_peer(peer);
    }

    /// Removes a peer gateway.
    pub fn remove_peer(&self, gateway_id: &GatewayId) -> bool {
        self.inner.router.lock().remove_peer(gateway_id).is_some()
    }

    /// Updates a peer's connection status.
    pub fn set_peer_status(&self, gateway_id: &GatewayId, status: PeerStatus) -> bool {
        self.inner.router.lock().set_peer_status(gateway_id, status)
    }

    // ─── Roles ──────────────────────────────────────────────────────

    /// Defines or redefines a role.
    pub fn define_role(&self, role: Role) {
        self.inner.roles.lock().define_role(role);
    }

    /// Removes a role definition.
    pub fn remove_role(&self, role_id: &RoleId) -> bool {
        self.inner.roles.lock().remove_role(role_id)
    }

    /// Snapshot of all role definitions.
    #[must_use]
    pub fn list_roles(&self) -> Vec<Role> {
        self.inner.roles.lock().list_roles()
    }

    /// Assigns a role to a locally registered agent and announces it.
    ///
    /// Returns `None` when the instance is not local, the role is
    /// unknown, or the role's quota is full.
    pub fn assign_role(
        &self,
        instance_id: &AgentInstanceId,
        role_id: &RoleId,
        assigned_by: &str,
    ) -> Option<RoleAssignment> {
        let agent = self.inner.router.lock().local_agent(instance_id).cloned()?;

        let assignment = self
            .inner
            .roles
            .lock()
            .assign_role(&agent, role_id, assigned_by)?;

        let mut router = self.inner.router.lock();
        // keep the routed identity's role current for role-filtered subscriptions
        router.register_local_agent(agent.clone().with_role(role_id.clone()));
        router.send(
            self.inner.identity.clone(),
            None,
            MessagePayload::RoleAssign {
                role_id: role_id.clone(),
                agent_instance_id: *instance_id,
            },
            SendOptions::default(),
        );
        drop(router);

        Some(assignment)
    }

    /// Removes an instance's role assignment.
    pub fn unassign_role(&self, instance_id: &AgentInstanceId) -> bool {
        let removed = self.inner.roles.lock().unassign_role(instance_id);
        if removed {
            let mut router = self.inner.router.lock();
            if let Some(agent) = router.local_agent(instance_id).cloned() {
                let mut cleared = agent;
                cleared.role_id = None;
                router.register_local_agent(cleared);
            }
        }
        removed
    }

    /// Snapshot of every role assignment.
    #[must_use]
    pub fn list_assignments(&self) -> Vec<RoleAssignment> {
        self.inner.roles.lock().list_assignments()
    }

    /// Checkpoint of the role manager.
    #[must_use]
    pub fn export_roles(&self) -> RoleState {
        self.inner.roles.lock().export_state()
    }

    /// Restores a role checkpoint (total replace).
    pub fn import_roles(&self, state: RoleState) {
        self.inner.roles.lock().import_state(state);
    }

    // ─── Tasks ──────────────────────────────────────────────────────

    /// Accepts a task, selects an agent, and dispatches `task.assign`.
    ///
    /// With no matching agent the task stays `pending` — a normal
    /// state, not an error.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] when the description exceeds the boundary
    /// bound. The stored text is sanitized first.
    pub fn submit_task(&self, submit: SubmitTask) -> Result<TrackedTask, ValidationError> {
        let task_text = validate::sanitize_text(&submit.task);
        validate::validate_task_description(&task_text)?;

        let created = self.inner.work.lock().create_task(NewTask {
            task: task_text,
            priority: submit.priority,
            requested_by: submit.requested_by,
            workflow_step_id: submit.workflow_step_id,
            workflow_plan_id: submit.workflow_plan_id,
            deadline: submit.deadline,
            max_retries: submit.max_retries,
            tags: submit.tags,
            correlation_id: None,
        });

        let Some(agent) = self.select_agent(
            submit.target_role_id.as_ref(),
            submit.target_agent_instance_id.as_ref(),
        ) else {
            debug!(task = %created.task_id, "no matching agent, task stays pending");
            return Ok(created);
        };

        {
            let mut work = self.inner.work.lock();
            work.assign_task(&created.task_id, &agent.instance_id);
            work.start_task(&created.task_id);
        }

        let mut router = self.inner.router.lock();
        router.send(
            self.inner.identity.clone(),
            Some(agent.clone()),
            MessagePayload::TaskAssign {
                task_id: created.task_id,
                task: created.task.clone(),
                priority: created.priority,
                workflow_step_id: created.workflow_step_id.clone(),
                workflow_plan_id: created.workflow_plan_id.clone(),
                deadline: created.deadline,
                tags: created.tags.clone(),
            },
            SendOptions {
                correlation_id: Some(created.correlation_id),
                ttl_seconds: None,
            },
        );
        drop(router);

        debug!(task = %created.task_id, agent = %agent, "task dispatched");
        Ok(self
            .inner
            .work
            .lock()
            .task(&created.task_id)
            .cloned()
            .unwrap_or(created))
    }

    /// Ranks local candidates by (heartbeat load asc, role priority
    /// desc) and returns the winner.
    fn select_agent(
        &self,
        target_role: Option<&RoleId>,
        target_instance: Option<&AgentInstanceId>,
    ) -> Option<AgentIdentity> {
        let router = self.inner.router.lock();

        if let Some(instance) = target_instance {
            return router.local_agent(instance).cloned();
        }

        let mut candidates = router.local_agents();
        drop(router);

        if let Some(role_id) = target_role {
            let holders = self.inner.roles.lock().agents_with_role(role_id);
            candidates.retain(|agent| holders.contains(&agent.instance_id));
        }
        if candidates.is_empty() {
            return None;
        }

        // one domain lock at a time: snapshot priorities, then loads
        let priorities: HashMap<AgentInstanceId, u8> = {
            let roles = self.inner.roles.lock();
            candidates
                .iter()
                .filter_map(|agent| {
                    roles
                        .assignment(&agent.instance_id)
                        .and_then(|a| a.role.priority)
                        .map(|p| (agent.instance_id, p))
                })
                .collect()
        };
        let heartbeats = self.inner.heartbeats.lock();
        let mut ranked: Vec<(f32, u8, AgentIdentity)> = candidates
            .into_iter()
            .map(|agent| {
                let load = heartbeats
                    .get(&agent.instance_id)
                    .map_or(0.0, |hb| hb.load);
                let priority = priorities
                    .get(&agent.instance_id)
                    .copied()
                    .unwrap_or(UNASSIGNED_PRIORITY);
                (load, priority, agent)
            })
            .collect();
        drop(heartbeats);

        ranked.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });
        ranked.into_iter().next().map(|(_, _, agent)| agent)
    }

    /// Cancels a task (see [`WorkTracker::cancel_task`]).
    pub fn cancel_task(&self, task_id: &TaskId) -> bool {
        self.inner.work.lock().cancel_task(task_id)
    }

    /// Retries a failed or timed-out task.
    pub fn retry_task(&self, task_id: &TaskId) -> bool {
        self.inner.work.lock().retry_task(task_id)
    }

    /// Records progress reported through the outer surface.
    pub fn update_progress(
        &self,
        task_id: &TaskId,
        percent: Option<u8>,
        status_line: Option<String>,
    ) -> bool {
        self.inner
            .work
            .lock()
            .update_progress(task_id, percent, status_line)
    }

    /// Looks up one task.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<TrackedTask> {
        self.inner.work.lock().task(task_id).cloned()
    }

    /// Filtered task snapshot.
    #[must_use]
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<TrackedTask> {
        self.inner.work.lock().list_tasks(filter)
    }

    /// Aggregate counts over all tasks.
    #[must_use]
    pub fn summary(&self) -> WorkSummary {
        self.inner.work.lock().summary()
    }

    /// Filtered report with summary and workloads.
    #[must_use]
    pub fn report(
        &self,
        workflow_plan_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> WorkReport {
        self.inner.work.lock().generate_report(workflow_plan_id, since)
    }

    // ─── Security ───────────────────────────────────────────────────

    /// Stores a security policy.
    pub fn set_policy(&self, policy: SecurityPolicy) {
        self.inner.security.lock().set_policy(policy);
    }

    /// Removes a stored policy; the agent falls back to defaults.
    pub fn remove_policy(&self, agent_id: &AgentConfigId) -> bool {
        self.inner.security.lock().remove_policy(agent_id)
    }

    /// The effective policy for an agent (stored or defaults).
    #[must_use]
    pub fn policy(&self, agent_id: &AgentConfigId) -> SecurityPolicy {
        self.inner.security.lock().policy(agent_id)
    }

    /// The most recent audit entries.
    #[must_use]
    pub fn audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        self.inner.security.lock().audit_log(limit)
    }

    /// The most recent audit entries for one agent.
    #[must_use]
    pub fn agent_audit_log(
        &self,
        agent_id: &AgentConfigId,
        limit: usize,
    ) -> Vec<AuditEntry> {
        self.inner.security.lock().agent_audit_log(agent_id, limit)
    }

    /// Deep-copied snapshot of all stored policies.
    #[must_use]
    pub fn export_policies(&self) -> Vec<SecurityPolicy> {
        self.inner.security.lock().export_policies()
    }

    /// Restores a policy snapshot (total replace).
    pub fn import_policies(&self, policies: Vec<SecurityPolicy>) {
        self.inner.security.lock().import_policies(policies);
    }

    // ─── Inbound gate ───────────────────────────────────────────────

    /// Gates a message arriving from outside (peer transport or local
    /// agent process) and routes it when allowed.
    pub fn deliver_inbound(&self, message: MeshMessage) -> Verdict {
        let verdict = self.inner.security.lock().authorize(&message);
        if verdict.allowed {
            self.inner.router.lock().route(message);
        } else {
            debug!(
                id = %message.envelope.message_id,
                reason = verdict.reason.as_deref().unwrap_or(""),
                "inbound message denied"
            );
        }
        verdict
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Announces local agents and starts the cleanup and announce
    /// timers. Idempotent; requires a tokio runtime.
    pub fn start(&self) {
        {
            let mut timers = self.inner.timers.lock();
            if !timers.is_empty() {
                return;
            }

            let cleanup = Arc::clone(&self.inner);
            timers.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(cleanup.config.cleanup_interval);
                ticker.tick().await; // immediate first tick
                loop {
                    ticker.tick().await;
                    let removed = cleanup.work.lock().cleanup(cleanup.config.cleanup_max_age);
                    if removed > 0 {
                        info!(removed, "periodic task cleanup");
                    }
                }
            }));

            let announce = Arc::clone(&self.inner);
            timers.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(announce.config.announce_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    announce_agents(&announce, DiscoveryAction::Announce);
                }
            }));
        }

        announce_agents(&self.inner, DiscoveryAction::Announce);
        info!(gateway = %self.inner.config.gateway_id, "orchestrator started");
    }

    /// Cancels the timers and broadcasts a `leave` for every local
    /// agent. [`shutdown`](Self::shutdown) is an alias.
    pub fn stop(&self) {
        for timer in self.inner.timers.lock().drain(..) {
            timer.abort();
        }
        announce_agents(&self.inner, DiscoveryAction::Leave);
        info!(gateway = %self.inner.config.gateway_id, "orchestrator stopped");
    }

    /// Alias for [`stop`](Self::stop).
    pub fn shutdown(&self) {
        self.stop();
    }
}

/// Broadcasts one discovery payload per local agent.
fn announce_agents(inner: &Inner, action: DiscoveryAction) {
    let mut router = inner.router.lock();
    for agent in router.local_agents() {
        router.send(
            inner.identity.clone(),
            None,
            MessagePayload::AgentDiscovery {
                action,
                agent: Some(agent),
            },
            SendOptions::default(),
        );
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("gateway_id", &self.inner.config.gateway_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::TaskStatus;
    use lattice_protocol::{Envelope, TaskResultStatus};
    use parking_lot::Mutex as PlMutex;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(CoreConfig::new("gw-test"))
    }

    fn local_agent(core: &Orchestrator, config: &str) -> AgentIdentity {
        let agent = AgentIdentity::new(AgentInstanceId::new(), config, "gw-test");
        core.register_agent(agent.clone()).expect("register");
        agent
    }

    fn deliver_heartbeat(core: &Orchestrator, agent: &AgentIdentity, load: f32) {
        let envelope = Envelope::broadcast(agent.clone());
        core.inner.router.lock().route(MeshMessage::new(
            envelope,
            MessagePayload::Heartbeat {
                load,
                active_tasks: None,
                status_line: None,
            },
        ));
    }

    #[test]
    fn register_rejects_bad_config_id() {
        let core = orchestrator();
        let bad = AgentIdentity::new(AgentInstanceId::new(), "Not Valid", "gw-test");
        assert!(core.register_agent(bad).is_err());
        assert!(core.agents().is_empty());
    }

    #[test]
    fn submit_with_no_agents_stays_pending() {
        let core = orchestrator();
        let task = core
            .submit_task(SubmitTask::named("queued work"))
            .expect("submit");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());
    }

    #[test]
    fn submit_dispatches_to_role_holder() {
        let core = orchestrator();
        let coder = local_agent(&core, "coder-1");
        core.assign_role(&coder.instance_id, &"coder".into(), "test")
            .expect("assign role");

        let task = core
            .submit_task(SubmitTask::named("implement X").with_target_role("coder"))
            .expect("submit");

        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_to, Some(coder.instance_id));
    }

    #[test]
    fn submit_with_wrong_role_stays_pending() {
        let core = orchestrator();
        let coder = local_agent(&core, "coder-1");
        core.assign_role(&coder.instance_id, &"coder".into(), "test")
            .expect("assign role");

        let task = core
            .submit_task(SubmitTask::named("review X").with_target_role("reviewer"))
            .expect("submit");
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn selection_prefers_lower_load() {
        let core = orchestrator();
        let busy = local_agent(&core, "busy");
        let idle = local_agent(&core, "idle");
        deliver_heartbeat(&core, &busy, 0.9);
        deliver_heartbeat(&core, &idle, 0.1);

        let task = core.submit_task(SubmitTask::named("work")).expect("submit");
        assert_eq!(task.assigned_to, Some(idle.instance_id));
    }

    #[test]
    fn selection_breaks_load_ties_by_priority() {
        let core = orchestrator();
        let executor = local_agent(&core, "exec");
        let monitor = local_agent(&core, "mon");
        core.assign_role(&executor.instance_id, &"executor".into(), "test")
            .expect("assign");
        core.assign_role(&monitor.instance_id, &"monitor".into(), "test")
            .expect("assign");
        // identical (absent) load → monitor's priority 80 beats executor's 40

        let task = core.submit_task(SubmitTask::named("work")).expect("submit");
        assert_eq!(task.assigned_to, Some(monitor.instance_id));
    }

    #[test]
    fn pinned_target_wins_even_unregistered_role() {
        let core = orchestrator();
        let a = local_agent(&core, "a");
        let _b = local_agent(&core, "b");

        let task = core
            .submit_task(SubmitTask::named("work").with_target_agent(a.instance_id))
            .expect("submit");
        assert_eq!(task.assigned_to, Some(a.instance_id));

        // pinned to an unknown instance: stays pending
        let task = core
            .submit_task(SubmitTask::named("work").with_target_agent(AgentInstanceId::new()))
            .expect("submit");
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn task_result_completes_via_step_index() {
        let core = orchestrator();
        let coder = local_agent(&core, "coder-1");
        core.assign_role(&coder.instance_id, &"coder".into(), "test")
            .expect("assign");

        let events = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        core.on_event(Arc::new(move |event| {
            sink.lock().push(event.clone());
        }));

        let task = core
            .submit_task(
                SubmitTask::named("step work")
                    .with_target_role("coder")
                    .with_workflow(Some("step-42"), None::<String>),
            )
            .expect("submit");
        assert_eq!(task.status, TaskStatus::InProgress);

        // agent reports progress, then success
        let envelope = Envelope::broadcast(coder.clone());
        core.inner.router.lock().route(MeshMessage::new(
            envelope,
            MessagePayload::TaskProgress {
                percent: Some(50),
                status_line: Some("halfway".into()),
                workflow_step_id: Some("step-42".into()),
            },
        ));
        let envelope = Envelope::broadcast(coder.clone());
        core.inner.router.lock().route(MeshMessage::new(
            envelope,
            MessagePayload::TaskResult {
                status: TaskResultStatus::Success,
                result: Some("done".into()),
                workflow_step_id: Some("step-42".into()),
                duration_ms: Some(10),
            },
        ));

        let finished = core.task(&task.task_id).expect("task");
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.progress_percent, Some(100));
        assert_eq!(finished.result.as_deref(), Some("done"));

        let seen = events.lock();
        assert!(seen
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::TaskProgress { .. })));
        assert!(seen.iter().any(|e| matches!(
            e,
            OrchestratorEvent::TaskCompleted { status: TaskStatus::Completed, .. }
        )));
    }

    #[test]
    fn task_result_without_step_id_is_ignored() {
        let core = orchestrator();
        let coder = local_agent(&core, "coder-1");

        let task = core
            .submit_task(SubmitTask::named("work").with_target_agent(coder.instance_id))
            .expect("submit");

        let envelope = Envelope::broadcast(coder);
        core.inner.router.lock().route(MeshMessage::new(
            envelope,
            MessagePayload::TaskResult {
                status: TaskResultStatus::Success,
                result: None,
                workflow_step_id: None,
                duration_ms: None,
            },
        ));

        // unkeyed result: deliberately dropped
        assert_eq!(
            core.task(&task.task_id).expect("task").status,
            TaskStatus::InProgress
        );
    }

    #[test]
    fn heartbeats_are_recorded_and_evicted() {
        let core = orchestrator();
        let agent = local_agent(&core, "worker");
        deliver_heartbeat(&core, &agent, 0.4);

        let record = core.heartbeat(&agent.instance_id).expect("heartbeat");
        assert!((record.load - 0.4).abs() < f32::EPSILON);

        assert!(core.unregister_agent(&agent.instance_id));
        assert!(core.heartbeat(&agent.instance_id).is_none());
    }

    #[test]
    fn discovery_from_peer_gateway_emits_joined() {
        let core = orchestrator();
        let events = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        core.on_event(Arc::new(move |event| {
            sink.lock().push(event.clone());
        }));

        let remote = AgentIdentity::new(AgentInstanceId::new(), "remote", "gw-other");
        let envelope = Envelope::broadcast(remote.clone());
        core.inner.router.lock().route(MeshMessage::new(
            envelope,
            MessagePayload::AgentDiscovery {
                action: DiscoveryAction::Join,
                agent: Some(remote.clone()),
            },
        ));

        // local announcements do not emit
        let local = local_agent(&core, "local");
        let envelope = Envelope::broadcast(local.clone());
        core.inner.router.lock().route(MeshMessage::new(
            envelope,
            MessagePayload::AgentDiscovery {
                action: DiscoveryAction::Announce,
                agent: Some(local),
            },
        ));

        let seen = events.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(
            &seen[0],
            OrchestratorEvent::AgentJoined { agent } if agent.config_id == remote.config_id
        ));
    }

    #[test]
    fn role_quota_flow_end_to_end() {
        let core = orchestrator();
        core.define_role(Role::new("monitor", "Monitor").with_max_concurrent(1));

        let a1 = local_agent(&core, "a1");
        let a2 = local_agent(&core, "a2");

        assert!(core.assign_role(&a1.instance_id, &"monitor".into(), "ops").is_some());
        assert!(core.assign_role(&a2.instance_id, &"monitor".into(), "ops").is_none());

        assert!(core.unassign_role(&a1.instance_id));
        assert!(core.assign_role(&a2.instance_id, &"monitor".into(), "ops").is_some());
    }

    #[test]
    fn deliver_inbound_applies_security_gate() {
        let core = orchestrator();
        let sender = AgentIdentity::new(AgentInstanceId::new(), "chatty", "gw-test");

        let mut policy = SecurityPolicy::default_for("chatty");
        policy.max_messages_per_minute = 1;
        core.set_policy(policy);

        let first = MeshMessage::new(
            Envelope::broadcast(sender.clone()),
            MessagePayload::Heartbeat {
                load: 0.0,
                active_tasks: None,
                status_line: None,
            },
        );
        assert!(core.deliver_inbound(first).allowed);

        let second = MeshMessage::new(
            Envelope::broadcast(sender),
            MessagePayload::Heartbeat {
                load: 0.0,
                active_tasks: None,
                status_line: None,
            },
        );
        let verdict = core.deliver_inbound(second);
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason.as_deref(), Some("rate limit exceeded"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_and_stop_lifecycle() {
        let core = orchestrator();
        let _agent = local_agent(&core, "worker");

        core.start();
        core.start(); // idempotent
        assert_eq!(core.inner.timers.lock().len(), 2);

        core.stop();
        assert!(core.inner.timers.lock().is_empty());

        // shutdown alias is safe after stop
        core.shutdown();
    }

    #[test]
    fn submit_sanitizes_task_text() {
        let core = orchestrator();
        let task = core
            .submit_task(SubmitTask::named("do\u{0} the\u{200B} thing"))
            .expect("submit");
        assert_eq!(task.task, "do the thing");
    }

    #[test]
    fn submit_rejects_oversized_description() {
        let core = orchestrator();
        let oversized = "x".repeat(validate::MAX_DESCRIPTION_LEN + 1);
        assert!(core.submit_task(SubmitTask::named(oversized)).is_err());
    }
}
