//! Component C4: the typing tracker.
//!
//! Grounded on `vinezombie::client::queue::Queue`'s `Instant`-based
//! delay/burst rate limiting (`set_rate_limit`, `pop`): the outbound token
//! buckets here use the same "enough budget has accumulated since the last
//! send" shape, generalized to two independent buckets (active, done) per
//! spec.md §4.4/§5. The inbound side (per spec.md §5, "the one piece shared
//! across tasks") is guarded by a single `std::sync::Mutex`, matching the
//! teacher's stated preference for confining shared mutable state behind
//! one lock with O(1) critical sections.

use crate::ircmsg::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A token bucket: `burst` tokens available immediately, refilling one
/// every `period`.
struct TokenBucket {
    period: Duration,
    burst: u32,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(period: Duration, burst: u32, now: Instant) -> Self {
        TokenBucket { period, burst, tokens: burst as f64, last_refill: now }
    }

    /// Attempts to take one token at `now`. Returns `false` if the bucket
    /// would block (no token available).
    fn try_take(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refill = elapsed.as_secs_f64() / self.period.as_secs_f64();
        self.tokens = (self.tokens + refill).min(self.burst as f64);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum TypingState {
    Active,
    Done,
}

struct OutboundStamp {
    last_sent_at: Instant,
    last_state: TypingState,
}

/// Outbound typing-notification pacing: debounce plus independent token
/// buckets for `active` and `done` frames (spec.md §4.4/§5).
pub struct OutboundTyping {
    stamps: HashMap<String, OutboundStamp>,
    active_limiter: TokenBucket,
    done_limiter: TokenBucket,
}

impl OutboundTyping {
    pub fn new(now: Instant) -> Self {
        OutboundTyping {
            stamps: HashMap::new(),
            active_limiter: TokenBucket::new(Duration::from_secs(3), 5, now),
            done_limiter: TokenBucket::new(Duration::from_secs(1), 5, now),
        }
    }

    /// `Typing(target)`, per spec.md §4.4. `casemapped_target` keys the
    /// internal stamp map; `target` is the display form sent on the wire.
    /// `message_tags_enabled` gates the whole operation.
    pub fn typing(
        &mut self,
        target: &str,
        casemapped_target: &str,
        message_tags_enabled: bool,
        now: Instant,
    ) -> Option<Message> {
        if !message_tags_enabled {
            return None;
        }
        if let Some(stamp) = self.stamps.get(casemapped_target) {
            if stamp.last_state == TypingState::Active
                && now.saturating_duration_since(stamp.last_sent_at) < Duration::from_secs(3)
            {
                return None;
            }
        }
        if !self.active_limiter.try_take(now) {
            return None;
        }
        self.stamps.insert(
            casemapped_target.to_string(),
            OutboundStamp { last_sent_at: now, last_state: TypingState::Active },
        );
        Some(tagmsg(target, "active"))
    }

    /// `TypingStop(target)`, per spec.md §4.4.
    pub fn typing_stop(
        &mut self,
        target: &str,
        casemapped_target: &str,
        message_tags_enabled: bool,
        now: Instant,
    ) -> Option<Message> {
        if !message_tags_enabled {
            return None;
        }
        if let Some(stamp) = self.stamps.get(casemapped_target) {
            if stamp.last_state == TypingState::Done {
                return None;
            }
        }
        if !self.done_limiter.try_take(now) {
            return None;
        }
        self.stamps.insert(
            casemapped_target.to_string(),
            OutboundStamp { last_sent_at: now, last_state: TypingState::Done },
        );
        Some(tagmsg(target, "done"))
    }

    /// Clears the stamp for `target` (any `PrivMsg` call does this, per
    /// spec.md §4.4), so a subsequent `Typing` call is never suppressed by
    /// stale state.
    pub fn clear(&mut self, casemapped_target: &str) {
        self.stamps.remove(casemapped_target);
    }
}

fn tagmsg(target: &str, state: &str) -> Message {
    let mut msg = Message::new("TAGMSG", vec![target.to_string()]);
    msg.tags.insert("+typing", state);
    msg
}

/// Inbound typing state: per-`(target, sender)` timestamps with a
/// 6-second expiry, plus a notification channel the UI can subscribe to
/// (spec.md §4.4).
pub struct InboundTyping {
    active: Arc<Mutex<HashMap<(String, String), (Instant, u64)>>>,
    generation: AtomicU64,
    notify: tokio::sync::mpsc::UnboundedSender<(String, String)>,
}

impl InboundTyping {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            InboundTyping {
                active: Arc::new(Mutex::new(HashMap::new())),
                generation: AtomicU64::new(0),
                notify: tx,
            },
            rx,
        )
    }

    /// Records `active`/`paused` (both treated as "still typing") from
    /// `sender` toward `target` (casemapped keys), arming a 6-second
    /// timeout. Re-arms (debounces) if already present.
    pub fn mark_active(&self, casemapped_target: String, casemapped_sender: String) {
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut guard = self.active.lock().unwrap();
            guard.insert((casemapped_target.clone(), casemapped_sender.clone()), (Instant::now(), gen));
        }
        let active = Arc::clone(&self.active);
        let notify = self.notify.clone();
        let key = (casemapped_target, casemapped_sender);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(6)).await;
            let expired = {
                let mut guard = active.lock().unwrap();
                match guard.get(&key) {
                    Some((_, g)) if *g == gen => {
                        guard.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if expired {
                let _ = notify.send(key);
            }
        });
    }

    /// Records `done`: removes the stamp immediately, no notification (the
    /// caller already knows and will update its own UI).
    pub fn mark_done(&self, casemapped_target: &str, casemapped_sender: &str) {
        let mut guard = self.active.lock().unwrap();
        guard.remove(&(casemapped_target.to_string(), casemapped_sender.to_string()));
    }

    /// Clears any stamp for `(target, sender)` unconditionally, e.g. on a
    /// real `PRIVMSG`/`NOTICE` from that sender (spec.md §4.2).
    pub fn clear(&self, casemapped_target: &str, casemapped_sender: &str) {
        self.mark_done(casemapped_target, casemapped_sender);
    }

    /// Clears every stamp involving `casemapped_sender` (on PART/QUIT/KICK).
    pub fn clear_user(&self, casemapped_sender: &str) {
        let mut guard = self.active.lock().unwrap();
        guard.retain(|(_, sender), _| sender != casemapped_sender);
    }

    /// Returns the display names currently typing toward `casemapped_target`,
    /// sorted, excluding `exclude_casemapped` (ourself).
    pub fn typings(
        &self,
        casemapped_target: &str,
        exclude_casemapped: &str,
        display_name_of: impl Fn(&str) -> Option<String>,
    ) -> Vec<String> {
        let guard = self.active.lock().unwrap();
        let mut names: Vec<String> = guard
            .keys()
            .filter(|(t, s)| t == casemapped_target && s != exclude_casemapped)
            .filter_map(|(_, s)| display_name_of(s))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounces_within_three_seconds() {
        let t0 = Instant::now();
        let mut tracker = OutboundTyping::new(t0);
        assert!(tracker.typing("#x", "#x", true, t0).is_some());
        assert!(tracker.typing("#x", "#x", true, t0 + Duration::from_secs(1)).is_none());
        assert!(tracker.typing("#x", "#x", true, t0 + Duration::from_secs(2)).is_none());
        assert!(tracker.typing("#x", "#x", true, t0 + Duration::from_secs(4)).is_some());
    }

    #[test]
    fn noop_without_message_tags_cap() {
        let t0 = Instant::now();
        let mut tracker = OutboundTyping::new(t0);
        assert!(tracker.typing("#x", "#x", false, t0).is_none());
    }

    #[test]
    fn clear_allows_immediate_resend() {
        let t0 = Instant::now();
        let mut tracker = OutboundTyping::new(t0);
        tracker.typing("#x", "#x", true, t0).unwrap();
        tracker.clear("#x");
        assert!(tracker.typing("#x", "#x", true, t0 + Duration::from_millis(500)).is_some());
    }

    #[test]
    fn typing_stop_noop_when_already_done() {
        let t0 = Instant::now();
        let mut tracker = OutboundTyping::new(t0);
        assert!(tracker.typing_stop("#x", "#x", true, t0).is_some());
        assert!(tracker.typing_stop("#x", "#x", true, t0 + Duration::from_millis(10)).is_none());
    }

    #[test]
    fn active_rate_limit_bursts_then_blocks() {
        let t0 = Instant::now();
        let mut tracker = OutboundTyping::new(t0);
        // Each call must be >=3s apart to dodge the 3s debounce and
        // instead exercise the 1-per-3s token bucket running dry.
        for i in 0..5 {
            let now = t0 + Duration::from_secs(3 * i);
            tracker.clear("#x");
            assert!(tracker.typing("#x", "#x", true, now).is_some(), "burst token {i} should be available");
        }
        tracker.clear("#x");
        let now = t0 + Duration::from_secs(15);
        assert!(tracker.typing("#x", "#x", true, now).is_none(), "burst exhausted");
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_timeout_fires_between_six_and_seven_seconds() {
        let (tracker, mut rx) = InboundTyping::new();
        tracker.mark_active("#x".into(), "bob".into());
        // `tokio::time::Instant`, not `std::time::Instant`: under a paused
        // clock only the former advances when the runtime auto-advances to
        // the next timer deadline while idle.
        let started = tokio::time::Instant::now();
        let (target, sender) = rx.recv().await.unwrap();
        assert_eq!(target, "#x");
        assert_eq!(sender, "bob");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed <= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_rearm_debounces_timeout() {
        let (tracker, mut rx) = InboundTyping::new();
        tracker.mark_active("#x".into(), "bob".into());
        tokio::time::sleep(Duration::from_secs(3)).await;
        tracker.mark_active("#x".into(), "bob".into());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err(), "re-armed timeout should not have fired yet");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn typings_excludes_self_and_sorts() {
        let (tracker, _rx) = InboundTyping::new();
        tracker.mark_active("#x".into(), "carol".into());
        tracker.mark_active("#x".into(), "alice".into());
        tracker.mark_active("#x".into(), "bob".into());
        let names = tracker.typings("#x", "alice", |s| Some(s.to_string()));
        assert_eq!(names, vec!["bob".to_string(), "carol".to_string()]);
    }
}
