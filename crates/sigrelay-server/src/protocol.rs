//! Wire protocol: JSON text frames tagged by `type`.
//!
//! | type          | direction        | fields                                  |
//! |---------------|------------------|-----------------------------------------|
//! | `hello`       | client → server  | `metadata: {flag}`                      |
//! | `init`        | server → client  | `peerId`, `peers: [{id, metadata?}]`    |
//! | `peer-joined` | server → client  | `peerId`, `metadata`                    |
//! | `peer-left`   | server → client  | `peerId`                                |
//! | `signal`      | both             | `targetId`, `peerId` (added), opaque    |
//! | `error`       | server → client  | `message`                               |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved prefix for synthetic bot peer ids.
pub const BOT_ID_PREFIX: &str = "bot-";

/// Maximum number of characters kept from a peer's flag.
pub const MAX_FLAG_CHARS: usize = 8;

/// Error text sent back when a signal target cannot be reached.
pub const PEER_NOT_AVAILABLE: &str = "Peer not available";

/// Whether `id` is in the reserved bot namespace.
pub fn is_bot_id(id: &str) -> bool {
    id.starts_with(BOT_ID_PREFIX)
}

/// Public metadata a peer announces about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    /// Short display flag (at most [`MAX_FLAG_CHARS`] characters).
    pub flag: String,
}

impl PeerMetadata {
    /// Build metadata from a client-supplied flag, truncating to
    /// [`MAX_FLAG_CHARS`] characters.
    pub fn from_flag(flag: &str) -> Self {
        Self {
            flag: flag.chars().take(MAX_FLAG_CHARS).collect(),
        }
    }
}

/// One entry of an `init.peers` discovery list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    /// Peer (or bot) id.
    pub id: String,
    /// Present once the peer has announced; absent for bots and
    /// not-yet-announced peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PeerMetadata>,
}

/// Events the relay emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Sent once to a peer after its first `hello`.
    Init {
        /// The receiving peer's own id.
        peer_id: String,
        /// Other peers it can signal (or a single bot).
        peers: Vec<PeerDescriptor>,
    },
    /// Another peer announced itself.
    PeerJoined {
        /// The new peer.
        peer_id: String,
        /// Its metadata.
        metadata: PeerMetadata,
    },
    /// A peer (or bot) went away.
    PeerLeft {
        /// The departed peer.
        peer_id: String,
    },
    /// A request from this client could not be served.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerMessage {
    /// Wire tag of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::Error { .. } => "error",
        }
    }
}

/// Client frames the relay acts on. Anything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    Hello {
        metadata: HelloMetadata,
    },
    Signal {
        #[serde(rename = "targetId")]
        target_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct HelloMetadata {
    flag: String,
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// First-time identification.
    Hello(PeerMetadata),
    /// Opaque signaling payload addressed to `target_id`. `payload` is the
    /// whole client object, kept verbatim for forwarding.
    Signal {
        /// Addressee.
        target_id: String,
        /// Full client frame.
        payload: Map<String, Value>,
    },
    /// Valid JSON but not a recognized message (unknown `type`, or a known
    /// type with the wrong shape).
    Unrecognized,
}

/// Parse a text frame. Only malformed JSON is an error.
pub fn parse_frame(text: &str) -> Result<Frame, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let frame = match ClientMessage::deserialize(&value) {
        Ok(ClientMessage::Hello { metadata }) => Frame::Hello(PeerMetadata::from_flag(&metadata.flag)),
        Ok(ClientMessage::Signal { target_id }) => match value {
            Value::Object(payload) => Frame::Signal { target_id, payload },
            _ => Frame::Unrecognized,
        },
        Err(_) => Frame::Unrecognized,
    };
    Ok(frame)
}

/// Render a client signal for delivery: the original object with the
/// sender's id set as `peerId`.
pub fn forwarded_signal(mut payload: Map<String, Value>, sender_id: &str) -> String {
    let _ = payload.insert("peerId".into(), Value::String(sender_id.to_owned()));
    Value::Object(payload).to_string()
}
