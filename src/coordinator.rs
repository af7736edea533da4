//! Component C5: the multi-session coordinator.
//!
//! Grounded on `vinezombie::client::conn`/`queue`'s task-separation
//! philosophy (reader/writer/dispatcher as independent cooperating tasks,
//! confining mutable state to the dispatcher) combined with the
//! `tokio::select!`-driven per-connection event loop shape used by
//! `sid3xyz-slircd-ng`'s `network::connection::event_loop` (a fellow
//! pack repo pulled in for this piece since vinezombie's `conn` module only
//! carries socket-address configuration, not a multi-connection
//! multiplexer — genuinely out of this engine's scope per spec.md §1/§6,
//! which places TCP/TLS dialing outside the engine boundary).
//!
//! This module never opens a socket. Each network's byte streams are
//! supplied by the caller as a pair of line channels; the coordinator owns
//! only the per-network dispatcher task, the bounded multiplexed event
//! channel, and reconnect-backoff bookkeeping (spec.md §4.5/§5).

use crate::client::sasl::AuthClient;
use crate::client::{Action, Event, Session};
use crate::error::Severity;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reference capacity of the multiplexed event channel, per spec.md §4.5.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

const RECONNECT_DELAY: Duration = Duration::from_secs(10);
const CONNECT_FAILURE_BACKOFF: Duration = Duration::from_secs(60);

/// An event from one network, tagged with the network it came from.
#[derive(Clone, Debug)]
pub struct TaggedEvent {
    pub net_id: String,
    pub event: Event,
}

/// Maintains one [`Session`] dispatcher task per network, multiplexing
/// their events into a single bounded channel (spec.md §4.5).
pub struct Coordinator {
    events_tx: mpsc::Sender<TaggedEvent>,
    events_rx: mpsc::Receiver<TaggedEvent>,
    actions: HashMap<String, mpsc::UnboundedSender<Action>>,
    handles: HashMap<String, tokio::task::JoinHandle<()>>,
    disconnected_at: HashMap<String, Instant>,
    failure_count: HashMap<String, u32>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Coordinator {
            events_tx,
            events_rx,
            actions: HashMap::new(),
            handles: HashMap::new(),
            disconnected_at: HashMap::new(),
            failure_count: HashMap::new(),
        }
    }

    /// Spins up a dispatcher task for `net_id`, wiring it to a line-framed
    /// inbound/outbound byte stream pair supplied by the transport layer,
    /// and returns a sender for user-originated [`Action`]s on this network.
    ///
    /// Matches spec.md §5's T1 (reader) / T2 (writer) / T3 (dispatcher)
    /// split: `inbound`/`outbound` stand in for T1/T2, which live outside
    /// this crate; this task is T3.
    pub fn add_network(
        &mut self,
        net_id: impl Into<String>,
        nick: impl Into<String>,
        username: impl Into<String>,
        realname: impl Into<String>,
        auth: Option<Box<dyn AuthClient>>,
        mut inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> mpsc::UnboundedSender<Action> {
        let net_id = net_id.into();
        info!(target: "driftnet::coordinator", net_id = %net_id, "starting dispatcher");
        self.disconnected_at.remove(&net_id);
        self.failure_count.remove(&net_id);

        let (action_tx, mut action_rx) = mpsc::unbounded_channel::<Action>();
        let events_tx = self.events_tx.clone();
        let (mut session, initial, mut typing_timeouts) = Session::new(nick, username, realname, auth, Instant::now());
        for msg in initial {
            let _ = outbound.send(msg.serialize());
        }

        let task_net_id = net_id.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    line = inbound.recv() => {
                        let Some(line) = line else {
                            warn!(target: "driftnet::coordinator", net_id = %task_net_id, "inbound stream closed");
                            let _ = events_tx.send(TaggedEvent {
                                net_id: task_net_id.clone(),
                                event: Event::Error {
                                    severity: Severity::Fail,
                                    code: "TRANSPORT".to_string(),
                                    message: "connection closed".to_string(),
                                },
                            }).await;
                            break;
                        };
                        let (events, replies) = session.handle_line(&line, SystemTime::now(), Instant::now());
                        for reply in replies {
                            let _ = outbound.send(reply.serialize());
                        }
                        for event in events {
                            if events_tx.send(TaggedEvent { net_id: task_net_id.clone(), event }).await.is_err() {
                                return;
                            }
                        }
                        if session.is_closed() {
                            break;
                        }
                    }
                    action = action_rx.recv() => {
                        let Some(action) = action else { break };
                        let replies = session.handle_action(action, Instant::now());
                        for reply in replies {
                            let _ = outbound.send(reply.serialize());
                        }
                        if session.is_closed() {
                            break;
                        }
                    }
                    // Drained only to keep the channel from filling; the UI
                    // queries current typers via `Session::typings` rather
                    // than through this crate's closed `Event` union.
                    _ = typing_timeouts.recv() => {}
                }
            }
        });

        self.actions.insert(net_id.clone(), action_tx.clone());
        self.handles.insert(net_id, handle);
        action_tx
    }

    /// The action sender for `net_id`, if it has an active dispatcher task.
    pub fn action_sender(&self, net_id: &str) -> Option<mpsc::UnboundedSender<Action>> {
        self.actions.get(net_id).cloned()
    }

    /// Tears down `net_id`'s dispatcher and arms reconnect backoff.
    ///
    /// Per spec.md §4.5: "a disconnect delivers a sentinel event causing
    /// the coordinator to drop that session and begin reconnect backoff."
    pub fn mark_disconnected(&mut self, net_id: &str, now: Instant) {
        warn!(target: "driftnet::coordinator", net_id, "dispatcher disconnected, arming reconnect backoff");
        self.actions.remove(net_id);
        if let Some(handle) = self.handles.remove(net_id) {
            handle.abort();
        }
        self.disconnected_at.insert(net_id.to_string(), now);
    }

    /// Records a failed reconnect attempt, lengthening the backoff for
    /// `net_id` to the 60-second connect-failure interval.
    pub fn record_connect_failure(&mut self, net_id: &str) {
        let count = self.failure_count.entry(net_id.to_string()).or_insert(0);
        *count += 1;
        debug!(target: "driftnet::coordinator", net_id, attempt = *count, "connect attempt failed");
    }

    /// Network ids whose backoff has elapsed and are due for a reconnect
    /// attempt: 10 seconds after a clean disconnect, 60 seconds after a
    /// failed connect attempt (spec.md §4.5).
    pub fn due_for_reconnect(&self, now: Instant) -> Vec<String> {
        self.disconnected_at
            .iter()
            .filter_map(|(net_id, at)| {
                let delay = if self.failure_count.get(net_id).copied().unwrap_or(0) > 0 {
                    CONNECT_FAILURE_BACKOFF
                } else {
                    RECONNECT_DELAY
                };
                (now.saturating_duration_since(*at) >= delay).then(|| net_id.clone())
            })
            .collect()
    }

    /// Pulls the next batch of events: blocks for the first, then drains up
    /// to [`EVENT_CHANNEL_CAPACITY`] more without blocking, per spec.md
    /// §4.5's "coalesce bursty catch-up traffic into a single UI refresh."
    pub async fn next_batch(&mut self) -> Vec<TaggedEvent> {
        let mut batch = Vec::new();
        let Some(first) = self.events_rx.recv().await else { return batch };
        batch.push(first);
        while batch.len() < EVENT_CHANNEL_CAPACITY {
            match self.events_rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_uses_short_delay_on_clean_disconnect() {
        let mut coordinator = Coordinator::new();
        let t0 = Instant::now();
        coordinator.mark_disconnected("freenode", t0);
        assert!(coordinator.due_for_reconnect(t0 + Duration::from_secs(5)).is_empty());
        assert_eq!(coordinator.due_for_reconnect(t0 + Duration::from_secs(11)), vec!["freenode".to_string()]);
    }

    #[test]
    fn reconnect_backs_off_after_failed_attempt() {
        let mut coordinator = Coordinator::new();
        let t0 = Instant::now();
        coordinator.mark_disconnected("freenode", t0);
        coordinator.record_connect_failure("freenode");
        assert!(coordinator.due_for_reconnect(t0 + Duration::from_secs(11)).is_empty());
        assert_eq!(coordinator.due_for_reconnect(t0 + Duration::from_secs(61)), vec!["freenode".to_string()]);
    }

    #[tokio::test]
    async fn add_network_sends_registration_lines_then_processes_welcome() {
        let mut coordinator = Coordinator::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let actions = coordinator.add_network(
            "home", "alice", "alice", "alice", None, inbound_rx, outbound_tx,
        );

        assert_eq!(outbound_rx.recv().await.unwrap(), "CAP LS 302");
        assert_eq!(outbound_rx.recv().await.unwrap(), "NICK alice");
        assert_eq!(outbound_rx.recv().await.unwrap(), "USER alice 0 * :alice");

        inbound_tx.send("001 alice :welcome".to_string()).unwrap();
        let batch = coordinator.next_batch().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].net_id, "home");
        assert!(matches!(batch[0].event, Event::Registered));

        drop(actions);
    }
}
