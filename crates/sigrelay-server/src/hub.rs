//! `SignalHub`: the single point of coordination for peers and bots.
//!
//! Registry and bot roster sit behind one mutex. Every operation takes the
//! lock, does only map updates and non-blocking queue pushes, and releases
//! it; nothing awaits while holding it. A peer's `init` is therefore always
//! queued before any `peer-joined` about it reaches others, and concurrent
//! announcements observe consistent registry sizes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use sigrelay_settings::RelaySettings;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bots::BotRoster;
use crate::connection::PeerConnection;
use crate::metrics::{
    BOTS_EXPIRED_TOTAL, CONNECTED_PEERS, FRAMES_MALFORMED_TOTAL, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::notify::{Notifier, lonely_visitor_message};
use crate::presence::{self, Announcement};
use crate::protocol::{Frame, ServerMessage, parse_frame};
use crate::registry::PeerRegistry;
use crate::router::route_signal;

/// Behavior toggles the hub needs at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Mint a bot for peers that announce alone.
    pub bots_enabled: bool,
    /// Age after which a bot is reported as departed.
    pub bot_lifetime: Duration,
}

impl From<&RelaySettings> for HubConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            bots_enabled: settings.bots.enabled,
            bot_lifetime: Duration::from_millis(settings.bots.lifetime_ms),
        }
    }
}

struct HubState {
    peers: PeerRegistry,
    bots: BotRoster,
}

/// Shared relay state.
pub struct SignalHub {
    state: Mutex<HubState>,
    config: HubConfig,
    notifier: Option<Arc<dyn Notifier>>,
}

impl SignalHub {
    /// Create a hub. `notifier`, if any, receives lone-visitor alerts.
    pub fn new(config: HubConfig, notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self {
            state: Mutex::new(HubState {
                peers: PeerRegistry::new(),
                bots: BotRoster::new(),
            }),
            config,
            notifier,
        }
    }

    /// Register a new connection under a fresh id.
    pub fn open(&self, tx: mpsc::Sender<Arc<String>>) -> Arc<PeerConnection> {
        let mut state = self.state.lock();
        let connection = loop {
            let id = Uuid::new_v4().to_string();
            let candidate = Arc::new(PeerConnection::new(id.clone(), tx.clone()));
            if state.peers.register(&id, Arc::clone(&candidate)) {
                break candidate;
            }
        };
        // Gauge is set under the lock; the last write matches the registry.
        let peers = state.peers.len();
        gauge!(CONNECTED_PEERS).set(peers as f64);
        drop(state);

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        info!(peer_id = %connection.id, peers, "peer connected");
        connection
    }

    /// Handle one inbound text frame from `peer_id`.
    ///
    /// Malformed JSON and unknown message types are dropped; nothing here
    /// ever fails the connection.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn handle_frame(&self, peer_id: &str, text: &str) {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                counter!(FRAMES_MALFORMED_TOTAL).increment(1);
                debug!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::Hello(metadata) => {
                let announcement = {
                    let mut guard = self.state.lock();
                    let state = &mut *guard;
                    presence::announce(
                        &mut state.peers,
                        &mut state.bots,
                        peer_id,
                        metadata,
                        self.config.bots_enabled,
                        Instant::now(),
                    )
                };
                if let Some(announcement) = announcement {
                    info!(flag = %announcement.flag, alone = announcement.alone, "peer announced");
                    self.alert_if_alone(&announcement);
                }
            }
            Frame::Signal { target_id, payload } => {
                let outcome = route_signal(&self.state.lock().peers, peer_id, &target_id, payload);
                debug!(%target_id, ?outcome, "signal routed");
            }
            Frame::Unrecognized => debug!("ignoring unrecognized frame"),
        }
    }

    fn alert_if_alone(&self, announcement: &Announcement) {
        if !announcement.alone {
            return;
        }
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let text = lonely_visitor_message(&announcement.flag);
        drop(tokio::spawn(async move {
            if let Err(e) = notifier.notify(&text).await {
                warn!(error = %e, "lone visitor alert failed");
            }
        }));
    }

    /// Unregister `peer_id` and tell everyone else it left.
    ///
    /// Returns `false` if the peer was already gone. A bot it owned is left
    /// for the sweep to discard.
    pub fn close(&self, peer_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(peer) = state.peers.unregister(peer_id) else {
            return false;
        };
        presence::broadcast_peer_left(&state.peers, peer_id);
        let peers = state.peers.len();
        gauge!(CONNECTED_PEERS).set(peers as f64);
        drop(state);

        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        info!(
            peer_id,
            peers,
            connected_ms = peer.connection.age().as_millis(),
            dropped = peer.connection.drop_count(),
            "peer disconnected"
        );
        true
    }

    /// One expiry pass at `now`: each expired bot whose owner is still
    /// connected is reported to that owner as `peer-left`, and every expired
    /// record is removed. Returns the number removed.
    pub fn sweep_bots(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let expired = state.bots.take_expired(now, self.config.bot_lifetime);
        for bot in &expired {
            match state.peers.get(&bot.owner_id) {
                Some(owner) if owner.connection.is_open() => {
                    let _ = owner.connection.send_message(&ServerMessage::PeerLeft {
                        peer_id: bot.id.clone(),
                    });
                    info!(bot_id = %bot.id, owner_id = %bot.owner_id, "bot expired");
                }
                _ => debug!(bot_id = %bot.id, owner_id = %bot.owner_id, "discarding bot of departed owner"),
            }
        }
        drop(state);

        if !expired.is_empty() {
            counter!(BOTS_EXPIRED_TOTAL).increment(expired.len() as u64);
        }
        expired.len()
    }

    /// Registered peers, announced or not.
    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    /// Live bot records.
    pub fn bot_count(&self) -> usize {
        self.state.lock().bots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use crate::protocol::is_bot_id;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::Value;

    const LIFETIME: Duration = Duration::from_secs(20);

    fn hub(bots_enabled: bool) -> SignalHub {
        SignalHub::new(
            HubConfig {
                bots_enabled,
                bot_lifetime: LIFETIME,
            },
            None,
        )
    }

    fn connect(hub: &SignalHub) -> (String, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(64);
        (hub.open(tx).id.clone(), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn hello(flag: &str) -> String {
        serde_json::json!({"type": "hello", "metadata": {"flag": flag}}).to_string()
    }

    #[test]
    fn config_from_settings() {
        let mut s = RelaySettings::default();
        s.bots.enabled = false;
        s.bots.lifetime_ms = 1500;
        let c = HubConfig::from(&s);
        assert!(!c.bots_enabled);
        assert_eq!(c.bot_lifetime, Duration::from_millis(1500));
    }

    #[test]
    fn open_assigns_unique_ids() {
        let h = hub(true);
        let (a, _ra) = connect(&h);
        let (b, _rb) = connect(&h);
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
        assert_eq!(h.peer_count(), 2);
    }

    #[test]
    fn connected_peers_gauge_follows_registry() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let h = hub(true);
        metrics::with_local_recorder(&recorder, || {
            let (a, _ra) = connect(&h);
            let (_b, _rb) = connect(&h);
            let (_c, _rc) = connect(&h);
            assert!(h.close(&a));
        });
        let output = crate::metrics::render(&handle);
        assert!(
            output.contains("signaling_server_connected_peers 2"),
            "{output}"
        );
    }

    #[test]
    fn open_sends_nothing_before_hello() {
        let h = hub(true);
        let (_a, mut ra) = connect(&h);
        let (_b, _rb) = connect(&h);
        assert!(drain(&mut ra).is_empty());
    }

    #[test]
    fn lone_hello_mints_bot() {
        let h = hub(true);
        let (a, mut ra) = connect(&h);
        h.handle_frame(&a, &hello("FR"));
        let msgs = drain(&mut ra);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "init");
        assert_eq!(msgs[0]["peerId"], a.as_str());
        assert!(is_bot_id(msgs[0]["peers"][0]["id"].as_str().unwrap()));
        assert_eq!(h.bot_count(), 1);
    }

    #[test]
    fn malformed_and_unknown_frames_are_ignored() {
        let h = hub(true);
        let (a, mut ra) = connect(&h);
        h.handle_frame(&a, "{not json");
        h.handle_frame(&a, r#"{"type":"dance"}"#);
        h.handle_frame(&a, "42");
        assert!(drain(&mut ra).is_empty());
        assert_eq!(h.peer_count(), 1);
    }

    #[test]
    fn signal_round_trip_through_hub() {
        let h = hub(false);
        let (a, mut ra) = connect(&h);
        let (b, mut rb) = connect(&h);
        let signal = serde_json::json!({"type": "signal", "targetId": b, "sdp": "x"}).to_string();
        h.handle_frame(&a, &signal);
        let got = drain(&mut rb);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["peerId"], a.as_str());
        assert_eq!(got[0]["sdp"], "x");
        assert!(drain(&mut ra).is_empty());
    }

    #[test]
    fn close_broadcasts_once_and_is_idempotent() {
        let h = hub(true);
        let (a, _ra) = connect(&h);
        let (_b, mut rb) = connect(&h);
        assert!(h.close(&a));
        assert!(!h.close(&a));
        assert_eq!(
            drain(&mut rb),
            vec![serde_json::json!({"type": "peer-left", "peerId": a})]
        );
        assert_eq!(h.peer_count(), 1);
    }

    #[test]
    fn sweep_reports_expired_bot_to_owner() {
        let h = hub(true);
        let (a, mut ra) = connect(&h);
        h.handle_frame(&a, &hello("FR"));
        let init = drain(&mut ra);
        let bot_id = init[0]["peers"][0]["id"].as_str().unwrap().to_owned();

        assert_eq!(h.sweep_bots(Instant::now()), 0);
        assert!(drain(&mut ra).is_empty());

        let later = Instant::now() + LIFETIME + Duration::from_secs(1);
        assert_eq!(h.sweep_bots(later), 1);
        assert_eq!(
            drain(&mut ra),
            vec![serde_json::json!({"type": "peer-left", "peerId": bot_id})]
        );
        assert_eq!(h.bot_count(), 0);
        assert_eq!(h.sweep_bots(later), 0);
    }

    #[test]
    fn sweep_discards_bot_of_departed_owner() {
        let h = hub(true);
        let (a, _ra) = connect(&h);
        h.handle_frame(&a, &hello("FR"));
        assert!(h.close(&a));
        assert_eq!(h.bot_count(), 1, "bot survives until the sweep");

        let later = Instant::now() + LIFETIME + Duration::from_secs(1);
        assert_eq!(h.sweep_bots(later), 1);
        assert_eq!(h.bot_count(), 0);
    }

    struct Recording(tokio::sync::mpsc::UnboundedSender<String>);

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, text: &str) -> Result<(), NotifyError> {
            let _ = self.0.send(text.to_owned());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn notify(&self, _text: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Api("nope".into()))
        }
    }

    #[tokio::test]
    async fn lone_visitor_triggers_alert_once() {
        let (tx, mut alerts) = tokio::sync::mpsc::unbounded_channel();
        let h = SignalHub::new(
            HubConfig {
                bots_enabled: true,
                bot_lifetime: LIFETIME,
            },
            Some(Arc::new(Recording(tx))),
        );
        let (a, _ra) = connect(&h);
        h.handle_frame(&a, &hello("FR"));
        let (b, _rb) = connect(&h);
        h.handle_frame(&b, &hello("DE"));

        let text = tokio::time::timeout(Duration::from_secs(2), alerts.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(text.contains("flag: FR"));
        tokio::task::yield_now().await;
        assert!(alerts.try_recv().is_err());
    }

    #[tokio::test]
    async fn failing_alert_does_not_affect_presence() {
        let h = SignalHub::new(
            HubConfig {
                bots_enabled: false,
                bot_lifetime: LIFETIME,
            },
            Some(Arc::new(Failing)),
        );
        let (a, mut ra) = connect(&h);
        h.handle_frame(&a, &hello("FR"));
        tokio::task::yield_now().await;
        assert_eq!(drain(&mut ra)[0]["type"], "init");
        assert_eq!(h.peer_count(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Connect,
        Hello(usize),
        Close(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Connect),
            (0usize..8).prop_map(Op::Hello),
            (0usize..8).prop_map(Op::Close),
        ]
    }

    proptest! {
        #[test]
        fn presence_invariants_hold(ops in proptest::collection::vec(op(), 1..40)) {
            let h = hub(true);
            let mut live: Vec<(String, mpsc::Receiver<Arc<String>>)> = Vec::new();

            for op in ops {
                match op {
                    Op::Connect => live.push(connect(&h)),
                    Op::Hello(i) if !live.is_empty() => {
                        let idx = i % live.len();
                        let id = live[idx].0.clone();
                        h.handle_frame(&id, &hello("XX"));
                        for msg in drain(&mut live[idx].1) {
                            if msg["type"] == "init" {
                                let peers = msg["peers"].as_array().unwrap();
                                let ids: Vec<&str> =
                                    peers.iter().map(|p| p["id"].as_str().unwrap()).collect();
                                prop_assert!(!ids.contains(&id.as_str()));
                                let mut unique = ids.clone();
                                unique.sort_unstable();
                                unique.dedup();
                                prop_assert_eq!(unique.len(), ids.len());
                            }
                        }
                    }
                    Op::Close(i) if !live.is_empty() => {
                        let (id, _rx) = live.remove(i % live.len());
                        prop_assert!(h.close(&id));
                    }
                    _ => {}
                }
                prop_assert_eq!(h.peer_count(), live.len());
            }
        }
    }
}
