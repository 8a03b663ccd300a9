//! Session registry: the single source of truth for sessions, agents, and
//! the waiting queue.
//!
//! All state lives behind one lock. Every transition checks the current
//! state and applies its effect inside one write-lock scope, so concurrent
//! callers observe each transition atomically. Reads take the shared lock and
//! return owned copies. No method here performs I/O; callers deliver the
//! returned outcomes after the lock is released.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use handoff_core::{AgentId, ConnectionId, SessionId};
use parking_lot::RwLock;
use serde::Serialize;

use crate::errors::{BrokerError, Result};
use crate::queue::WaitingQueue;
use crate::session::{
    ActiveSession, CustomerSession, Message, QueueEntry, SenderRole, SessionPhase, SessionState,
    UnassignedSession,
};

/// Registry capacity limits.
#[derive(Clone, Debug)]
pub struct RegistryLimits {
    /// Maximum number of live sessions.
    pub max_sessions: usize,
    /// Display names are truncated to this many characters.
    pub max_display_name_chars: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_sessions: 1_000,
            max_display_name_chars: 64,
        }
    }
}

/// Parameters for [`SessionRegistry::create_session`].
#[derive(Clone, Debug)]
pub struct NewSession {
    /// Pre-allocated session ID.
    pub session_id: SessionId,
    /// User-supplied display name; blank or absent names are generated.
    pub display_name: Option<String>,
    /// Customer connection the session is attached to.
    pub connection_id: ConnectionId,
    /// Opaque summary of the automated conversation before escalation.
    pub context: Option<String>,
}

/// A dashboard-visible change produced by one registry mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DashboardChange {
    /// A session entered the waiting queue.
    Arrived {
        /// The new queue entry.
        entry: QueueEntry,
        /// Queue length after the change.
        queue_size: usize,
    },
    /// A session was bound to an agent.
    Accepted {
        /// Accepted session.
        session_id: SessionId,
        /// Agent now bound.
        agent_id: AgentId,
        /// Queue length after the change.
        queue_size: usize,
    },
    /// A waiting session left the queue without being accepted.
    LeftQueue {
        /// Departed session.
        session_id: SessionId,
        /// Queue length after the change.
        queue_size: usize,
    },
    /// The agent of an active session dropped.
    Unassigned {
        /// Session that lost its agent.
        session_id: SessionId,
        /// Customer display name.
        display_name: String,
    },
    /// A session that had left the queue was closed.
    Closed {
        /// Closed session.
        session_id: SessionId,
    },
}

/// Outcome of a session creation.
#[derive(Clone, Debug)]
pub struct CreatedSession {
    /// Queue projection of the new session.
    pub entry: QueueEntry,
    /// 1-based queue position.
    pub position: usize,
    /// Notification for agent dashboards.
    pub change: DashboardChange,
}

/// Outcome of a successful accept.
#[derive(Clone, Debug)]
pub struct AcceptedSession {
    /// Accepted session.
    pub session_id: SessionId,
    /// Customer display name.
    pub display_name: String,
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// State before the accept (waiting or agent-disconnected).
    pub previous: SessionState,
    /// Notification for agent dashboards.
    pub change: DashboardChange,
}

/// Outcome of a customer message append.
#[derive(Clone, Debug)]
pub struct CustomerPosted {
    /// The appended message.
    pub message: Message,
    /// Agent to forward to, when the session is active.
    pub forward_to: Option<AgentId>,
}

/// Outcome of removing a session.
#[derive(Clone, Debug)]
pub struct ClosedSession {
    /// Removed session.
    pub session_id: SessionId,
    /// Customer display name.
    pub display_name: String,
    /// State at removal.
    pub previous: SessionState,
    /// Agent that was bound, if the session was active.
    pub agent_id: Option<AgentId>,
    /// Customer connection that was attached.
    pub connection_id: ConnectionId,
    /// Notification for agent dashboards.
    pub change: DashboardChange,
}

/// Consistent view for a freshly connected agent dashboard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DashboardSnapshot {
    /// Waiting queue in arrival order.
    pub waiting: Vec<QueueEntry>,
    /// Active bindings.
    pub active: Vec<ActiveSession>,
    /// Sessions whose agent dropped.
    pub unassigned: Vec<UnassignedSession>,
}

/// A connected agent as seen by the registry.
#[derive(Clone, Debug)]
pub struct AgentRecord {
    /// Agent identifier.
    pub id: AgentId,
    /// When the agent connected.
    pub connected_at: DateTime<Utc>,
    /// Sessions currently bound to this agent.
    pub sessions: BTreeSet<SessionId>,
}

/// Registry counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Connected agent IDs.
    pub agents: Vec<AgentId>,
    /// Live session IDs.
    pub sessions: Vec<SessionId>,
    /// Sessions in the waiting queue.
    pub queue_size: usize,
    /// Sessions bound to an agent.
    pub active_sessions: usize,
    /// Sessions whose agent dropped.
    pub unassigned_sessions: usize,
    /// Sessions closed since startup.
    pub closed_total: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<SessionId, CustomerSession>,
    queue: WaitingQueue,
    agents: HashMap<AgentId, AgentRecord>,
    unnamed_seq: u64,
    closed_total: u64,
}

impl RegistryState {
    fn session(&self, session_id: &SessionId) -> Result<&CustomerSession> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| BrokerError::not_found(session_id))
    }

    fn session_mut(&mut self, session_id: &SessionId) -> Result<&mut CustomerSession> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| BrokerError::not_found(session_id))
    }

    /// Erase a session and every index that refers to it.
    fn erase(&mut self, session_id: &SessionId) -> Option<ClosedSession> {
        let session = self.sessions.remove(session_id)?;
        self.closed_total += 1;
        let previous = session.state();
        let agent_id = session.phase.bound_agent().cloned();

        let change = match &session.phase {
            SessionPhase::Waiting => {
                let _ = self.queue.remove(session_id);
                DashboardChange::LeftQueue {
                    session_id: session_id.clone(),
                    queue_size: self.queue.len(),
                }
            }
            SessionPhase::Active { agent_id } => {
                if let Some(agent) = self.agents.get_mut(agent_id) {
                    let _ = agent.sessions.remove(session_id);
                }
                DashboardChange::Closed {
                    session_id: session_id.clone(),
                }
            }
            SessionPhase::AgentDisconnected { .. } => DashboardChange::Closed {
                session_id: session_id.clone(),
            },
        };

        Some(ClosedSession {
            session_id: session.id,
            display_name: session.display_name,
            previous,
            agent_id,
            connection_id: session.connection_id,
            change,
        })
    }

    fn snapshot(&self) -> DashboardSnapshot {
        let mut active: Vec<ActiveSession> = Vec::new();
        let mut unassigned: Vec<UnassignedSession> = Vec::new();
        for session in self.sessions.values() {
            match &session.phase {
                SessionPhase::Active { agent_id } => active.push(ActiveSession {
                    session_id: session.id.clone(),
                    agent_id: agent_id.clone(),
                }),
                SessionPhase::AgentDisconnected { previous_agent } => {
                    unassigned.push(UnassignedSession {
                        session_id: session.id.clone(),
                        display_name: session.display_name.clone(),
                        previous_agent_id: previous_agent.clone(),
                    });
                }
                SessionPhase::Waiting => {}
            }
        }
        active.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        unassigned.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        DashboardSnapshot {
            waiting: self.queue.snapshot(),
            active,
            unassigned,
        }
    }
}

/// Thread-safe owner of all session and agent state.
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
    limits: RegistryLimits,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            limits,
        }
    }

    /// Allocate a new session in `waiting` and append it to the queue.
    pub fn create_session(&self, request: NewSession) -> Result<CreatedSession> {
        let mut state = self.state.write();
        if state.sessions.len() >= self.limits.max_sessions {
            return Err(BrokerError::CapacityExhausted {
                limit: self.limits.max_sessions,
            });
        }
        if state.sessions.contains_key(&request.session_id) {
            return Err(BrokerError::AlreadyEscalated {
                session_id: request.session_id,
            });
        }

        let display_name = match normalize_display_name(
            request.display_name.as_deref(),
            self.limits.max_display_name_chars,
        ) {
            Some(name) => name,
            None => {
                state.unnamed_seq += 1;
                format!("Customer {}", state.unnamed_seq)
            }
        };

        let mut messages = Vec::new();
        if let Some(context) = request.context.filter(|c| !c.trim().is_empty()) {
            messages.push(Message::now(SenderRole::System, context));
        }

        let session = CustomerSession {
            id: request.session_id.clone(),
            display_name,
            created_at: Utc::now(),
            phase: SessionPhase::Waiting,
            messages,
            connection_id: request.connection_id,
        };
        let entry = session.queue_entry();
        let _ = state.queue.enqueue(entry.clone());
        let _ = state.sessions.insert(request.session_id.clone(), session);

        let position = state.queue.position(&request.session_id).unwrap_or(0);
        let queue_size = state.queue.len();
        Ok(CreatedSession {
            entry: entry.clone(),
            position,
            change: DashboardChange::Arrived { entry, queue_size },
        })
    }

    /// Copy of a live session.
    pub fn get(&self, session_id: &SessionId) -> Result<CustomerSession> {
        self.state.read().session(session_id).cloned()
    }

    /// Waiting queue in arrival order.
    pub fn list_waiting(&self) -> Vec<QueueEntry> {
        self.state.read().queue.snapshot()
    }

    /// All active bindings.
    pub fn list_active(&self) -> Vec<ActiveSession> {
        self.state.read().snapshot().active
    }

    /// Sessions whose agent dropped.
    pub fn list_unassigned(&self) -> Vec<UnassignedSession> {
        self.state.read().snapshot().unassigned
    }

    /// Erase a session in any state. Unknown IDs are a no-op.
    pub fn remove(&self, session_id: &SessionId) -> Option<ClosedSession> {
        self.state.write().erase(session_id)
    }

    /// Remove a session on customer disconnect.
    ///
    /// Ignored (returns `None`) when `connection_id` is no longer the
    /// connection attached to the session, so a stale socket cannot close a
    /// session that was rebound to a new one.
    pub fn customer_disconnected(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Option<ClosedSession> {
        let mut state = self.state.write();
        let attached = state.sessions.get(session_id)?.connection_id == *connection_id;
        if !attached {
            return None;
        }
        state.erase(session_id)
    }

    /// Register an agent and take its initial dashboard snapshot atomically.
    ///
    /// `on_registered` runs while the write lock is held, before any later
    /// mutation can commit. It must not block.
    pub fn register_agent<F>(&self, agent_id: AgentId, on_registered: F) -> DashboardSnapshot
    where
        F: FnOnce(&DashboardSnapshot),
    {
        let mut state = self.state.write();
        let _ = state.agents.insert(
            agent_id.clone(),
            AgentRecord {
                id: agent_id,
                connected_at: Utc::now(),
                sessions: BTreeSet::new(),
            },
        );
        let snapshot = state.snapshot();
        on_registered(&snapshot);
        snapshot
    }

    /// Remove an agent; every session it held becomes `agent-disconnected`.
    pub fn unregister_agent(&self, agent_id: &AgentId) -> Vec<DashboardChange> {
        let mut state = self.state.write();
        let Some(record) = state.agents.remove(agent_id) else {
            return Vec::new();
        };

        let mut changes = Vec::with_capacity(record.sessions.len());
        for session_id in record.sessions {
            let Some(session) = state.sessions.get_mut(&session_id) else {
                continue;
            };
            if session.phase.bound_agent() != Some(agent_id) {
                continue;
            }
            session.phase = SessionPhase::AgentDisconnected {
                previous_agent: agent_id.clone(),
            };
            changes.push(DashboardChange::Unassigned {
                session_id,
                display_name: session.display_name.clone(),
            });
        }
        changes
    }

    /// Copy of a connected agent's record.
    pub fn agent(&self, agent_id: &AgentId) -> Option<AgentRecord> {
        self.state.read().agents.get(agent_id).cloned()
    }

    /// Bind `agent_id` to a waiting or agent-disconnected session.
    ///
    /// The state check and the bind happen under one write lock, so of two
    /// racing accepts exactly one succeeds.
    pub fn accept(&self, agent_id: &AgentId, session_id: &SessionId) -> Result<AcceptedSession> {
        let mut state = self.state.write();
        if !state.agents.contains_key(agent_id) {
            return Err(BrokerError::Unreachable {
                target: format!("agent {agent_id}"),
            });
        }

        let session = state.session_mut(session_id)?;
        let previous = session.state();
        if !previous.accepts_agent() {
            return Err(BrokerError::InvalidTransition {
                session_id: session_id.clone(),
                state: previous,
                action: "accept",
            });
        }
        session.phase = SessionPhase::Active {
            agent_id: agent_id.clone(),
        };
        let display_name = session.display_name.clone();
        let messages = session.messages.clone();

        if previous == SessionState::Waiting {
            let _ = state.queue.remove(session_id);
        }
        if let Some(agent) = state.agents.get_mut(agent_id) {
            let _ = agent.sessions.insert(session_id.clone());
        }

        Ok(AcceptedSession {
            session_id: session_id.clone(),
            display_name,
            messages,
            previous,
            change: DashboardChange::Accepted {
                session_id: session_id.clone(),
                agent_id: agent_id.clone(),
                queue_size: state.queue.len(),
            },
        })
    }

    /// Append a customer message.
    ///
    /// Messages sent before an agent is bound are held in the log and shown
    /// to the accepting agent.
    pub fn append_customer_message(
        &self,
        session_id: &SessionId,
        text: String,
    ) -> Result<CustomerPosted> {
        let mut state = self.state.write();
        let session = state.session_mut(session_id)?;
        let message = Message::now(SenderRole::Customer, text);
        session.messages.push(message.clone());
        Ok(CustomerPosted {
            message,
            forward_to: session.phase.bound_agent().cloned(),
        })
    }

    /// Append an agent message to a session bound to that agent.
    pub fn append_agent_message(
        &self,
        agent_id: &AgentId,
        session_id: &SessionId,
        text: String,
    ) -> Result<Message> {
        let mut state = self.state.write();
        let session = state.session_mut(session_id)?;
        match &session.phase {
            SessionPhase::Active { agent_id: bound } if bound == agent_id => {}
            SessionPhase::Active { .. } => {
                return Err(BrokerError::NotBound {
                    session_id: session_id.clone(),
                    agent_id: agent_id.clone(),
                });
            }
            phase => {
                return Err(BrokerError::InvalidTransition {
                    session_id: session_id.clone(),
                    state: phase.state(),
                    action: "message",
                });
            }
        }
        let message = Message::now(SenderRole::Agent, text);
        session.messages.push(message.clone());
        Ok(message)
    }

    /// Attach a new customer connection to a live session.
    ///
    /// Returns the previously attached connection.
    pub fn rebind_customer(
        &self,
        session_id: &SessionId,
        connection_id: ConnectionId,
    ) -> Result<(ConnectionId, CustomerSession)> {
        let mut state = self.state.write();
        let session = state.session_mut(session_id)?;
        let previous = std::mem::replace(&mut session.connection_id, connection_id);
        Ok((previous, session.clone()))
    }

    /// Current state of a session.
    pub fn state_of(&self, session_id: &SessionId) -> Result<SessionState> {
        self.state.read().session(session_id).map(CustomerSession::state)
    }

    /// Consistent dashboard view.
    pub fn dashboard(&self) -> DashboardSnapshot {
        self.state.read().snapshot()
    }

    /// Registry counters.
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        let mut agents: Vec<AgentId> = state.agents.keys().cloned().collect();
        agents.sort();
        let mut sessions: Vec<SessionId> = state.sessions.keys().cloned().collect();
        sessions.sort();
        let mut active_sessions = 0;
        let mut unassigned_sessions = 0;
        for session in state.sessions.values() {
            match session.state() {
                SessionState::Active => active_sessions += 1,
                SessionState::AgentDisconnected => unassigned_sessions += 1,
                SessionState::Waiting | SessionState::Closed => {}
            }
        }
        RegistryStats {
            agents,
            sessions,
            queue_size: state.queue.len(),
            active_sessions,
            unassigned_sessions,
            closed_total: state.closed_total,
        }
    }

    /// Number of queued sessions.
    pub fn queue_len(&self) -> usize {
        self.state.read().queue.len()
    }

    /// Check that queue membership and agent bindings agree with each
    /// session's phase. Returns the first violation found.
    pub fn verify_invariants(&self) -> std::result::Result<(), String> {
        let state = self.state.read();
        for session in state.sessions.values() {
            let queued = state.queue.contains(&session.id);
            match &session.phase {
                SessionPhase::Waiting if !queued => {
                    return Err(format!("{} is waiting but not queued", session.id));
                }
                SessionPhase::Active { agent_id } => {
                    if queued {
                        return Err(format!("{} is active but queued", session.id));
                    }
                    let held = state
                        .agents
                        .get(agent_id)
                        .is_some_and(|a| a.sessions.contains(&session.id));
                    if !held {
                        return Err(format!("{} is bound to {agent_id} which does not hold it", session.id));
                    }
                }
                SessionPhase::AgentDisconnected { .. } if queued => {
                    return Err(format!("{} is agent-disconnected but queued", session.id));
                }
                _ => {}
            }
        }
        for entry in state.queue.snapshot() {
            let waiting = state
                .sessions
                .get(&entry.session_id)
                .is_some_and(|s| s.phase == SessionPhase::Waiting);
            if !waiting {
                return Err(format!("queued {} is not a waiting session", entry.session_id));
            }
        }
        for agent in state.agents.values() {
            for session_id in &agent.sessions {
                let bound = state
                    .sessions
                    .get(session_id)
                    .and_then(|s| s.phase.bound_agent())
                    == Some(&agent.id);
                if !bound {
                    return Err(format!("{} holds {session_id} without a binding", agent.id));
                }
            }
        }
        Ok(())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryLimits::default())
    }
}

/// Trim and truncate a user-supplied name; `None` when nothing usable is left.
fn normalize_display_name(raw: Option<&str>, max_chars: usize) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max_chars).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn new_session(registry: &SessionRegistry, id: &str, name: Option<&str>) -> CreatedSession {
        registry
            .create_session(NewSession {
                session_id: SessionId::from(id),
                display_name: name.map(str::to_string),
                connection_id: ConnectionId::from(format!("conn_{id}")),
                context: None,
            })
            .unwrap()
    }

    fn agent(registry: &SessionRegistry, id: &str) -> AgentId {
        let agent_id = AgentId::from(id);
        let _ = registry.register_agent(agent_id.clone(), |_| {});
        agent_id
    }

    fn waiting_ids(registry: &SessionRegistry) -> Vec<String> {
        registry
            .list_waiting()
            .into_iter()
            .map(|e| e.session_id.into_inner())
            .collect()
    }

    #[test]
    fn create_session_enqueues_waiting() {
        let registry = SessionRegistry::default();
        let created = new_session(&registry, "s1", Some("Alice"));
        assert_eq!(created.position, 1);
        assert_eq!(created.entry.display_name, "Alice");
        assert_matches!(created.change, DashboardChange::Arrived { queue_size: 1, .. });
        assert_eq!(registry.state_of(&SessionId::from("s1")).unwrap(), SessionState::Waiting);
        assert_eq!(waiting_ids(&registry), ["s1"]);
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn blank_display_names_are_generated() {
        let registry = SessionRegistry::default();
        let a = new_session(&registry, "s1", None);
        let b = new_session(&registry, "s2", Some("   "));
        let c = new_session(&registry, "s3", Some("  Bob  "));
        assert_eq!(a.entry.display_name, "Customer 1");
        assert_eq!(b.entry.display_name, "Customer 2");
        assert_eq!(c.entry.display_name, "Bob");
    }

    #[test]
    fn long_display_names_are_truncated() {
        let registry = SessionRegistry::new(RegistryLimits {
            max_display_name_chars: 4,
            ..RegistryLimits::default()
        });
        let created = new_session(&registry, "s1", Some("Bartholomew"));
        assert_eq!(created.entry.display_name, "Bart");
    }

    #[test]
    fn context_becomes_system_message() {
        let registry = SessionRegistry::default();
        let _ = registry
            .create_session(NewSession {
                session_id: SessionId::from("s1"),
                display_name: None,
                connection_id: ConnectionId::from("c1"),
                context: Some("Asked about Bali packages".into()),
            })
            .unwrap();
        let session = registry.get(&SessionId::from("s1")).unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].sender, SenderRole::System);
    }

    #[test]
    fn capacity_limit_is_reported() {
        let registry = SessionRegistry::new(RegistryLimits {
            max_sessions: 1,
            ..RegistryLimits::default()
        });
        let _ = new_session(&registry, "s1", None);
        let err = registry
            .create_session(NewSession {
                session_id: SessionId::from("s2"),
                display_name: None,
                connection_id: ConnectionId::from("c2"),
                context: None,
            })
            .unwrap_err();
        assert_eq!(err, BrokerError::CapacityExhausted { limit: 1 });
        assert_eq!(registry.queue_len(), 1);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let registry = SessionRegistry::default();
        assert_matches!(
            registry.get(&SessionId::from("nope")),
            Err(BrokerError::SessionNotFound { .. })
        );
    }

    #[test]
    fn accept_binds_and_dequeues() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let _ = new_session(&registry, "s1", Some("Alice"));
        let accepted = registry.accept(&x, &SessionId::from("s1")).unwrap();
        assert_eq!(accepted.previous, SessionState::Waiting);
        assert_eq!(accepted.display_name, "Alice");
        assert_matches!(accepted.change, DashboardChange::Accepted { queue_size: 0, .. });
        assert!(registry.list_waiting().is_empty());
        assert_eq!(
            registry.list_active(),
            vec![ActiveSession {
                session_id: SessionId::from("s1"),
                agent_id: x.clone(),
            }]
        );
        assert!(registry.agent(&x).unwrap().sessions.contains(&SessionId::from("s1")));
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn accepting_middle_entry_keeps_queue_order() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let _ = new_session(&registry, "a", None);
        let _ = new_session(&registry, "b", None);
        let _ = new_session(&registry, "c", None);
        let _ = registry.accept(&x, &SessionId::from("b")).unwrap();
        assert_eq!(waiting_ids(&registry), ["a", "c"]);
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn second_accept_is_invalid_transition() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let y = agent(&registry, "agent_y");
        let _ = new_session(&registry, "s1", None);
        let _ = registry.accept(&x, &SessionId::from("s1")).unwrap();
        let err = registry.accept(&y, &SessionId::from("s1")).unwrap_err();
        assert_eq!(err.state(), Some(SessionState::Active));
        assert_eq!(
            registry.get(&SessionId::from("s1")).unwrap().phase.bound_agent(),
            Some(&x)
        );
        assert!(registry.agent(&y).unwrap().sessions.is_empty());
    }

    #[test]
    fn accept_unknown_session_is_not_found() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        assert_matches!(
            registry.accept(&x, &SessionId::from("ghost")),
            Err(BrokerError::SessionNotFound { .. })
        );
        assert_eq!(registry.stats().sessions.len(), 0);
    }

    #[test]
    fn accept_from_unregistered_agent_is_rejected() {
        let registry = SessionRegistry::default();
        let _ = new_session(&registry, "s1", None);
        assert_matches!(
            registry.accept(&AgentId::from("agent_gone"), &SessionId::from("s1")),
            Err(BrokerError::Unreachable { .. })
        );
        assert_eq!(registry.state_of(&SessionId::from("s1")).unwrap(), SessionState::Waiting);
    }

    #[test]
    fn concurrent_accepts_have_one_winner() {
        for _ in 0..50 {
            let registry = Arc::new(SessionRegistry::default());
            let agents: Vec<AgentId> = (0..8).map(|i| agent(&registry, &format!("agent_{i}"))).collect();
            let _ = new_session(&registry, "s1", None);

            let handles: Vec<_> = agents
                .into_iter()
                .map(|a| {
                    let registry = Arc::clone(&registry);
                    std::thread::spawn(move || registry.accept(&a, &SessionId::from("s1")))
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let wins = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(wins, 1);
            for err in results.iter().filter_map(|r| r.as_ref().err()) {
                assert_eq!(err.state(), Some(SessionState::Active));
            }
            registry.verify_invariants().unwrap();
        }
    }

    #[test]
    fn agent_disconnect_unassigns_without_requeue() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let _ = new_session(&registry, "s1", Some("Alice"));
        let _ = new_session(&registry, "s2", None);
        let _ = registry.accept(&x, &SessionId::from("s1")).unwrap();
        let before = registry.list_waiting();

        let changes = registry.unregister_agent(&x);
        assert_eq!(
            changes,
            vec![DashboardChange::Unassigned {
                session_id: SessionId::from("s1"),
                display_name: "Alice".into(),
            }]
        );
        assert_eq!(
            registry.state_of(&SessionId::from("s1")).unwrap(),
            SessionState::AgentDisconnected
        );
        assert_eq!(registry.list_waiting(), before);
        assert!(registry.list_active().is_empty());
        assert_eq!(registry.list_unassigned().len(), 1);
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn unassigned_session_can_be_reaccepted_by_another_agent() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let _ = new_session(&registry, "s1", None);
        let _ = registry.accept(&x, &SessionId::from("s1")).unwrap();
        let _ = registry.unregister_agent(&x);

        let y = agent(&registry, "agent_y");
        let accepted = registry.accept(&y, &SessionId::from("s1")).unwrap();
        assert_eq!(accepted.previous, SessionState::AgentDisconnected);
        assert_eq!(registry.state_of(&SessionId::from("s1")).unwrap(), SessionState::Active);
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn message_log_keeps_append_order() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let sid = SessionId::from("s1");
        let _ = new_session(&registry, "s1", None);
        let _ = registry.accept(&x, &sid).unwrap();

        let posted = registry.append_customer_message(&sid, "m1".into()).unwrap();
        assert_eq!(posted.forward_to, Some(x.clone()));
        let _ = registry.append_agent_message(&x, &sid, "m2".into()).unwrap();
        let _ = registry.append_customer_message(&sid, "m3".into()).unwrap();

        let log: Vec<String> = registry
            .get(&sid)
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(log, ["m1", "m2", "m3"]);
    }

    #[test]
    fn waiting_customer_messages_are_held() {
        let registry = SessionRegistry::default();
        let sid = SessionId::from("s1");
        let _ = new_session(&registry, "s1", None);
        let posted = registry.append_customer_message(&sid, "hello?".into()).unwrap();
        assert_eq!(posted.forward_to, None);

        let x = agent(&registry, "agent_x");
        let accepted = registry.accept(&x, &sid).unwrap();
        assert_eq!(accepted.messages.len(), 1);
        assert_eq!(accepted.messages[0].text, "hello?");
    }

    #[test]
    fn agent_message_requires_binding() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let y = agent(&registry, "agent_y");
        let sid = SessionId::from("s1");
        let _ = new_session(&registry, "s1", None);

        assert_matches!(
            registry.append_agent_message(&x, &sid, "early".into()),
            Err(BrokerError::InvalidTransition { state: SessionState::Waiting, .. })
        );
        let _ = registry.accept(&x, &sid).unwrap();
        assert_matches!(
            registry.append_agent_message(&y, &sid, "intrude".into()),
            Err(BrokerError::NotBound { .. })
        );
        assert!(registry.get(&sid).unwrap().messages.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::default();
        let _ = new_session(&registry, "s1", None);
        let _ = new_session(&registry, "s2", None);

        let closed = registry.remove(&SessionId::from("s1")).unwrap();
        assert_eq!(closed.previous, SessionState::Waiting);
        assert_matches!(closed.change, DashboardChange::LeftQueue { queue_size: 1, .. });
        let after_first = (registry.list_waiting(), registry.stats());

        assert!(registry.remove(&SessionId::from("s1")).is_none());
        assert!(registry.remove(&SessionId::from("never")).is_none());
        assert_eq!((registry.list_waiting(), registry.stats()), after_first);
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn removing_active_session_releases_agent() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let sid = SessionId::from("s1");
        let _ = new_session(&registry, "s1", None);
        let _ = registry.accept(&x, &sid).unwrap();

        let closed = registry.remove(&sid).unwrap();
        assert_eq!(closed.previous, SessionState::Active);
        assert_eq!(closed.agent_id, Some(x.clone()));
        assert_eq!(closed.change, DashboardChange::Closed { session_id: sid.clone() });
        assert!(registry.agent(&x).unwrap().sessions.is_empty());
        assert_eq!(registry.stats().closed_total, 1);
    }

    #[test]
    fn stale_connection_disconnect_is_ignored() {
        let registry = SessionRegistry::default();
        let sid = SessionId::from("s1");
        let _ = new_session(&registry, "s1", None);
        let (old, _) = registry.rebind_customer(&sid, ConnectionId::from("conn_new")).unwrap();
        assert_eq!(old.as_str(), "conn_s1");

        assert!(registry.customer_disconnected(&sid, &old).is_none());
        assert_eq!(registry.state_of(&sid).unwrap(), SessionState::Waiting);

        let closed = registry
            .customer_disconnected(&sid, &ConnectionId::from("conn_new"))
            .unwrap();
        assert_eq!(closed.previous, SessionState::Waiting);
        assert!(registry.get(&sid).is_err());
    }

    #[test]
    fn register_agent_snapshot_is_consistent() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let _ = new_session(&registry, "a", None);
        let _ = new_session(&registry, "b", None);
        let _ = registry.accept(&x, &SessionId::from("a")).unwrap();

        let mut seen = None;
        let snapshot = registry.register_agent(AgentId::from("agent_y"), |s| seen = Some(s.clone()));
        assert_eq!(seen.as_ref(), Some(&snapshot));
        assert_eq!(snapshot.waiting.len(), 1);
        assert_eq!(snapshot.waiting[0].session_id.as_str(), "b");
        assert_eq!(snapshot.active.len(), 1);
        assert!(snapshot.unassigned.is_empty());
    }

    #[test]
    fn unregister_unknown_agent_is_noop() {
        let registry = SessionRegistry::default();
        assert!(registry.unregister_agent(&AgentId::from("ghost")).is_empty());
    }

    #[test]
    fn stats_count_by_state() {
        let registry = SessionRegistry::default();
        let x = agent(&registry, "agent_x");
        let _ = new_session(&registry, "a", None);
        let _ = new_session(&registry, "b", None);
        let _ = new_session(&registry, "c", None);
        let _ = registry.accept(&x, &SessionId::from("a")).unwrap();
        let _ = registry.accept(&x, &SessionId::from("b")).unwrap();
        let _ = registry.unregister_agent(&x);

        let stats = registry.stats();
        assert!(stats.agents.is_empty());
        assert_eq!(stats.sessions.len(), 3);
        assert_eq!(stats.queue_size, 1);
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.unassigned_sessions, 2);
    }
}
