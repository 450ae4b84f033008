//! Public event surface.
//!
//! The client emits exactly two event kinds: `Ready`, once the bootstrap
//! completes, and `Connect`, for every console connection that opens.
//! Everything else the streaming pipeline does is internal plumbing.

use crate::console::ConsoleConnection;
use std::sync::Arc;

/// An event delivered to client subscribers.
#[derive(Clone)]
pub enum ClientEvent {
    /// The supervisor finished its bootstrap and is ready
    Ready,
    /// A console connection authenticated and is open for commands
    Connect(Arc<ConsoleConnection>),
}

impl std::fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientEvent::Ready => write!(f, "Ready"),
            ClientEvent::Connect(connection) => {
                write!(f, "Connect(server {})", connection.server_id())
            }
        }
    }
}
