//! Binds broker endpoints to the generic session loop.

use std::sync::Arc;

use handoff_broker::{
    AgentEndpoint, ClientConnection, CloseReason, ConnectionRole, CustomerEndpoint, CustomerEvent,
    SessionBroker,
};

/// What the session loop needs from the broker side of one socket.
pub trait SessionEndpoint: Send + 'static {
    /// Role label for logs and metrics.
    const ROLE: ConnectionRole;

    /// Attach a freshly upgraded connection.
    fn open(broker: Arc<SessionBroker>, conn: Arc<ClientConnection>) -> Self;

    /// Handle one inbound text frame.
    fn on_text(&mut self, text: &str);

    /// Whether the connection still owes its first command.
    fn awaiting_hello(&self) -> bool {
        false
    }

    /// The hello deadline passed while [`awaiting_hello`](Self::awaiting_hello).
    fn on_hello_timeout(&self) {}

    /// The socket closed.
    fn on_disconnect(&self);
}

impl SessionEndpoint for CustomerEndpoint {
    const ROLE: ConnectionRole = ConnectionRole::Customer;

    fn open(broker: Arc<SessionBroker>, conn: Arc<ClientConnection>) -> Self {
        CustomerEndpoint::new(broker, conn)
    }

    fn on_text(&mut self, text: &str) {
        self.handle_frame(text);
    }

    fn awaiting_hello(&self) -> bool {
        !self.is_escalated()
    }

    fn on_hello_timeout(&self) {
        let _ = self.connection().send_event(&CustomerEvent::Closed {
            reason: CloseReason::HelloTimeout,
        });
    }

    fn on_disconnect(&self) {
        self.disconnect();
    }
}

impl SessionEndpoint for AgentEndpoint {
    const ROLE: ConnectionRole = ConnectionRole::Agent;

    fn open(broker: Arc<SessionBroker>, conn: Arc<ClientConnection>) -> Self {
        AgentEndpoint::new(broker, conn)
    }

    fn on_text(&mut self, text: &str) {
        self.handle_frame(text);
    }

    fn on_disconnect(&self) {
        self.disconnect();
    }
}
