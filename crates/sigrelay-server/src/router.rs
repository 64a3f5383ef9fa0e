//! Point-to-point signal delivery.

use std::sync::Arc;

use metrics::counter;
use serde_json::{Map, Value};
use tracing::debug;

use crate::metrics::{SIGNALS_DROPPED_BOT_TOTAL, SIGNALS_FORWARDED_TOTAL, SIGNALS_REJECTED_TOTAL};
use crate::protocol::{PEER_NOT_AVAILABLE, ServerMessage, forwarded_signal, is_bot_id};
use crate::registry::PeerRegistry;

/// What happened to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued to the target.
    Forwarded,
    /// Addressed to a bot; discarded.
    BotTarget,
    /// Target unknown or closed; sender told so.
    Unavailable,
}

/// Deliver `payload` from `sender_id` to `target_id`.
pub fn route_signal(
    registry: &PeerRegistry,
    sender_id: &str,
    target_id: &str,
    payload: Map<String, Value>,
) -> RouteOutcome {
    if is_bot_id(target_id) {
        counter!(SIGNALS_DROPPED_BOT_TOTAL).increment(1);
        debug!(sender_id, target_id, "signal to bot dropped");
        return RouteOutcome::BotTarget;
    }

    if let Some(target) = registry.get(target_id).filter(|p| p.connection.is_open()) {
        let _ = target
            .connection
            .send(Arc::new(forwarded_signal(payload, sender_id)));
        counter!(SIGNALS_FORWARDED_TOTAL).increment(1);
        return RouteOutcome::Forwarded;
    }

    counter!(SIGNALS_REJECTED_TOTAL).increment(1);
    debug!(sender_id, target_id, "signal target not available");
    if let Some(sender) = registry.get(sender_id) {
        let _ = sender.connection.send_message(&ServerMessage::Error {
            message: PEER_NOT_AVAILABLE.into(),
        });
    }
    RouteOutcome::Unavailable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PeerConnection;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn add(reg: &mut PeerRegistry, id: &str) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(8);
        let _ = reg.register(id, Arc::new(PeerConnection::new(id.into(), tx)));
        rx
    }

    fn payload(target: &str) -> Map<String, Value> {
        let Value::Object(map) = json!({"type": "signal", "targetId": target, "sdp": "offer"}) else {
            unreachable!()
        };
        map
    }

    fn recv(rx: &mut mpsc::Receiver<Arc<String>>) -> Option<Value> {
        rx.try_recv().ok().map(|f| serde_json::from_str(&f).unwrap())
    }

    #[test]
    fn forwards_to_live_target() {
        let mut reg = PeerRegistry::new();
        let mut a = add(&mut reg, "a");
        let mut b = add(&mut reg, "b");

        assert_eq!(route_signal(&reg, "a", "b", payload("b")), RouteOutcome::Forwarded);
        assert_eq!(
            recv(&mut b).unwrap(),
            json!({"type": "signal", "targetId": "b", "sdp": "offer", "peerId": "a"})
        );
        assert!(recv(&mut a).is_none());
    }

    #[test]
    fn unknown_target_errors_sender_only() {
        let mut reg = PeerRegistry::new();
        let mut a = add(&mut reg, "a");
        let mut b = add(&mut reg, "b");

        assert_eq!(
            route_signal(&reg, "a", "nobody", payload("nobody")),
            RouteOutcome::Unavailable
        );
        assert_eq!(
            recv(&mut a).unwrap(),
            json!({"type": "error", "message": "Peer not available"})
        );
        assert!(recv(&mut a).is_none());
        assert!(recv(&mut b).is_none());
    }

    #[test]
    fn closed_target_is_unavailable() {
        let mut reg = PeerRegistry::new();
        let mut a = add(&mut reg, "a");
        drop(add(&mut reg, "b"));

        assert_eq!(route_signal(&reg, "a", "b", payload("b")), RouteOutcome::Unavailable);
        assert_eq!(recv(&mut a).unwrap()["type"], "error");
    }

    #[test]
    fn bot_target_is_silent() {
        let mut reg = PeerRegistry::new();
        let mut a = add(&mut reg, "a");

        assert_eq!(
            route_signal(&reg, "a", "bot-123", payload("bot-123")),
            RouteOutcome::BotTarget
        );
        assert!(recv(&mut a).is_none());
    }

    #[test]
    fn signal_to_self_is_delivered() {
        let mut reg = PeerRegistry::new();
        let mut a = add(&mut reg, "a");
        assert_eq!(route_signal(&reg, "a", "a", payload("a")), RouteOutcome::Forwarded);
        assert_eq!(recv(&mut a).unwrap()["peerId"], "a");
    }
}
