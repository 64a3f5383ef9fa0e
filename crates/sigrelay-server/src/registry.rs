//! Registry of currently connected peers.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use crate::connection::PeerConnection;
use crate::protocol::{PeerDescriptor, PeerMetadata};

/// A connected peer.
pub struct Peer {
    /// Outbound channel.
    pub connection: Arc<PeerConnection>,
    /// Set once, by the first valid `hello`.
    metadata: Option<PeerMetadata>,
}

impl Peer {
    /// Announced metadata, if any.
    pub fn metadata(&self) -> Option<&PeerMetadata> {
        self.metadata.as_ref()
    }

    /// Whether the peer has announced itself.
    pub fn is_announced(&self) -> bool {
        self.metadata.is_some()
    }
}

/// Peers indexed by id. All operations are total: unknown ids are no-ops
/// or yield `None`.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<String, Peer>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly upgraded connection with no metadata.
    ///
    /// Returns `false` and leaves the existing entry untouched if the id is
    /// already registered.
    pub fn register(&mut self, id: &str, connection: Arc<PeerConnection>) -> bool {
        match self.peers.entry(id.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let _ = slot.insert(Peer {
                    connection,
                    metadata: None,
                });
                true
            }
        }
    }

    /// Record a peer's metadata. Only the first call for a peer has an
    /// effect; returns whether this call set it.
    pub fn set_metadata(&mut self, id: &str, metadata: PeerMetadata) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) if peer.metadata.is_none() => {
                peer.metadata = Some(metadata);
                true
            }
            _ => false,
        }
    }

    /// Remove a peer.
    pub fn unregister(&mut self, id: &str) -> Option<Peer> {
        self.peers.remove(id)
    }

    /// Look up a peer.
    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Every peer except `excluding`, in iteration order.
    pub fn list_others(&self, excluding: &str) -> Vec<PeerDescriptor> {
        self.peers
            .iter()
            .filter(|(id, _)| id.as_str() != excluding)
            .map(|(id, peer)| PeerDescriptor {
                id: id.clone(),
                metadata: peer.metadata.clone(),
            })
            .collect()
    }

    /// Connections of every peer except `excluding` (all peers if `None`).
    pub fn connections_except<'a>(
        &'a self,
        excluding: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Arc<PeerConnection>> + 'a {
        self.peers
            .iter()
            .filter(move |(id, _)| Some(id.as_str()) != excluding)
            .map(|(_, peer)| &peer.connection)
    }

    /// Number of registered peers, announced or not.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
