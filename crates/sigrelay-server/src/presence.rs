//! Presence fan-out: `init`, `peer-joined` and `peer-left`.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tracing::{debug, warn};

use crate::bots::BotRoster;
use crate::metrics::{BOTS_MINTED_TOTAL, PEERS_ANNOUNCED_TOTAL};
use crate::protocol::{PeerMetadata, ServerMessage};
use crate::registry::PeerRegistry;

/// Result of a peer's first `hello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// The peer was the only one registered when it announced.
    pub alone: bool,
    /// The flag it announced with.
    pub flag: String,
}

/// Handle a `hello` from `peer_id`.
///
/// Ignored (returns `None`) unless this is the peer's first announcement.
/// Otherwise the peer receives `init` with every other registered peer, or
/// a single freshly minted bot if it is alone and bots are enabled, and all
/// other open connections receive `peer-joined`.
pub fn announce(
    registry: &mut PeerRegistry,
    bots: &mut BotRoster,
    peer_id: &str,
    metadata: PeerMetadata,
    bots_enabled: bool,
    now: Instant,
) -> Option<Announcement> {
    if !registry.set_metadata(peer_id, metadata.clone()) {
        debug!(peer_id, "ignoring repeated hello");
        return None;
    }
    counter!(PEERS_ANNOUNCED_TOTAL).increment(1);

    let alone = registry.len() == 1;
    let peers = if !alone {
        registry.list_others(peer_id)
    } else if bots_enabled {
        counter!(BOTS_MINTED_TOTAL).increment(1);
        vec![bots.mint(peer_id, now)]
    } else {
        Vec::new()
    };

    if let Some(peer) = registry.get(peer_id) {
        let _ = peer.connection.send_message(&ServerMessage::Init {
            peer_id: peer_id.to_owned(),
            peers,
        });
    }

    let joined = ServerMessage::PeerJoined {
        peer_id: peer_id.to_owned(),
        metadata: metadata.clone(),
    };
    broadcast(registry, Some(peer_id), &joined);

    Some(Announcement {
        alone,
        flag: metadata.flag,
    })
}

/// Tell every open connection that `peer_id` left.
pub fn broadcast_peer_left(registry: &PeerRegistry, peer_id: &str) {
    let left = ServerMessage::PeerLeft {
        peer_id: peer_id.to_owned(),
    };
    broadcast(registry, None, &left);
}

/// Serialize once and queue to every open connection except `excluding`.
fn broadcast(registry: &PeerRegistry, excluding: Option<&str>, message: &ServerMessage) {
    let frame = match serde_json::to_string(message) {
        Ok(json) => Arc::new(json),
        Err(e) => {
            warn!(kind = message.kind(), error = %e, "failed to serialize broadcast");
            return;
        }
    };
    for conn in registry.connections_except(excluding) {
        if conn.is_open() {
            let _ = conn.send(Arc::clone(&frame));
        }
    }
}
