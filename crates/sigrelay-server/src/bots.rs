//! Synthetic bot peers.
//!
//! A peer that announces itself to an otherwise empty relay is handed a
//! single bot so the client has something to show. Bots are never
//! connections: they live only in this roster, swallow every signal sent
//! to them, and are reported as departed once their lifetime is up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::hub::SignalHub;
use crate::protocol::{BOT_ID_PREFIX, PeerDescriptor};

/// Length of the random part of a bot id.
const BOT_SUFFIX_LEN: usize = 18;

/// A bot handed to one owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotRecord {
    /// Bot id, always starting with `bot-`.
    pub id: String,
    /// Peer the bot was minted for.
    pub owner_id: String,
    /// Mint time.
    pub created_at: Instant,
}

/// Fresh id in the bot namespace.
pub fn new_bot_id() -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("{BOT_ID_PREFIX}{}", &uuid[..BOT_SUFFIX_LEN])
}

/// At most one live bot per owner.
#[derive(Default)]
pub struct BotRoster {
    by_owner: HashMap<String, BotRecord>,
}

impl BotRoster {
    /// Empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a bot for `owner_id`, replacing any bot it already had.
    pub fn mint(&mut self, owner_id: &str, now: Instant) -> PeerDescriptor {
        let record = BotRecord {
            id: new_bot_id(),
            owner_id: owner_id.to_owned(),
            created_at: now,
        };
        let descriptor = PeerDescriptor {
            id: record.id.clone(),
            metadata: None,
        };
        if let Some(old) = self.by_owner.insert(owner_id.to_owned(), record) {
            debug!(owner_id, bot_id = %old.id, "replaced existing bot");
        }
        descriptor
    }

    /// Remove and return every bot older than `lifetime` at `now`.
    pub fn take_expired(&mut self, now: Instant, lifetime: Duration) -> Vec<BotRecord> {
        let expired: Vec<String> = self
            .by_owner
            .iter()
            .filter(|(_, bot)| now.saturating_duration_since(bot.created_at) > lifetime)
            .map(|(owner, _)| owner.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|owner| self.by_owner.remove(&owner))
            .collect()
    }

    /// The bot minted for `owner_id`, if still live.
    pub fn get(&self, owner_id: &str) -> Option<&BotRecord> {
        self.by_owner.get(owner_id)
    }

    /// Live bot count.
    pub fn len(&self) -> usize {
        self.by_owner.len()
    }

    /// Whether no bot is live.
    pub fn is_empty(&self) -> bool {
        self.by_owner.is_empty()
    }
}

/// Run the periodic expiry sweep until `cancel` fires.
pub fn spawn_bot_sweeper(
    hub: Arc<SignalHub>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = period.as_millis(), "bot sweeper started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let expired = hub.sweep_bots(Instant::now());
                    if expired > 0 {
                        debug!(expired, "bots expired");
                    }
                }
            }
        }
        info!("bot sweeper stopped");
    })
}
