//! Dashboard notifications.
//!
//! Every registry mutation that changes what agent dashboards show produces
//! one [`DashboardChange`]; the notifier turns it into one agent event and
//! fans it out after the mutation committed.

use std::sync::Arc;

use tracing::debug;

use crate::events::AgentEvent;
use crate::multiplexer::{BroadcastReport, ConnectionMultiplexer};
use crate::registry::DashboardChange;

/// Agent event for a dashboard change.
pub fn dashboard_event(change: DashboardChange) -> AgentEvent {
    match change {
        DashboardChange::Arrived { entry, queue_size } => AgentEvent::CustomerArrived {
            session_id: entry.session_id,
            display_name: entry.display_name,
            arrival_time: entry.arrival_time,
            queue_size,
        },
        DashboardChange::Accepted {
            session_id,
            agent_id,
            queue_size,
        } => AgentEvent::CustomerAccepted {
            session_id,
            agent_id,
            queue_size,
        },
        DashboardChange::LeftQueue {
            session_id,
            queue_size,
        } => AgentEvent::CustomerLeftQueue {
            session_id,
            queue_size,
        },
        DashboardChange::Unassigned {
            session_id,
            display_name,
        } => AgentEvent::SessionUnassigned {
            session_id,
            display_name,
        },
        DashboardChange::Closed { session_id } => AgentEvent::CustomerClosed { session_id },
    }
}

/// Broadcasts dashboard changes to all connected agents.
pub struct QueueNotifier {
    mux: Arc<ConnectionMultiplexer>,
}

impl QueueNotifier {
    /// Create a notifier over the given multiplexer.
    pub fn new(mux: Arc<ConnectionMultiplexer>) -> Self {
        Self { mux }
    }

    /// Fan out one change.
    pub fn publish(&self, change: DashboardChange) -> BroadcastReport {
        let event = dashboard_event(change);
        let report = self.mux.broadcast_to_agents(&event);
        if !report.failed.is_empty() {
            debug!(failed = report.failed.len(), "dashboard notification partially delivered");
        }
        report
    }

    /// Fan out several changes in order.
    pub fn publish_all(&self, changes: impl IntoIterator<Item = DashboardChange>) {
        for change in changes {
            let _ = self.publish(change);
        }
    }
}
