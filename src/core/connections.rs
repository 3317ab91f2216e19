//! The agent's WebSocket connection pool (spec §5 "Resource policy": "the
//! WebSocket set ... [is] exclusively owned by the agent").
//!
//! Every connected client gets a [`ConnectionId`] and an outbound channel.
//! `broadcast` is the substrate `StateStore`, `TaskTracker`, and the MCP
//! manager use to fan frames out to every client except an excluded
//! originator (spec §4.D, §4.H).

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::core::ambient::ConnectionId;
use crate::core::rpc::OutboundFrame;

/// A single client's outbound frame sink.
pub type FrameSender = mpsc::UnboundedSender<OutboundFrame>;

/// The live set of connected WebSocket clients. Send/broadcast are
/// fire-and-forget: a closed connection's send silently fails and the
/// caller is not expected to handle it (the connection is cleaned up by
/// its own read-loop task when it notices the peer is gone).
#[derive(Default)]
pub struct ConnectionRegistry {
    senders: Mutex<HashMap<ConnectionId, FrameSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, returning the receiver half the
    /// WebSocket write-loop should drain.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<OutboundFrame>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: ConnectionId) {
        self.senders.lock().unwrap().remove(&id);
    }

    pub fn send_to(&self, id: ConnectionId, frame: OutboundFrame) {
        if let Some(tx) = self.senders.lock().unwrap().get(&id) {
            let _ = tx.send(frame);
        }
    }

    /// Send `frame` to every connection except `exclude` (if any).
    pub fn broadcast(&self, frame: OutboundFrame, exclude: Option<ConnectionId>) {
        let senders = self.senders.lock().unwrap();
        for (id, tx) in senders.iter() {
            if Some(*id) == exclude {
                continue;
            }
            let _ = tx.send(frame.clone());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.senders.lock().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_excludes_source() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        registry.broadcast(OutboundFrame::State { state: Some(serde_json::json!({"x": 1})) }, Some(a));

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }
}
