//! Component C3: the history batcher.
//!
//! Grounded on `vinezombie::client::queue::Queue`'s outbound pacing shape
//! (an `Instant`-keyed guard deciding whether a request may go out right
//! now) generalized from "rate limit on the whole queue" to "at most one
//! in-flight request per target," per spec.md §4.3.

use crate::ircmsg::Message;
use std::collections::{HashMap, HashSet};

/// A single decoded message accumulated inside an open `chathistory` batch.
#[derive(Clone, Debug)]
pub struct HistoryMessage {
    pub user: String,
    pub target: String,
    pub target_is_channel: bool,
    pub command: crate::client::event::MessageCommand,
    pub content: String,
    pub time: std::time::SystemTime,
}

struct OpenBatch {
    is_chathistory: bool,
    target: Option<String>,
    messages: Vec<HistoryMessage>,
}

/// Tracks in-flight `CHATHISTORY` requests and open `BATCH`es, for the
/// `chathistory` batch type only (spec.md §4.3).
#[derive(Default)]
pub struct Batcher {
    open: HashMap<String, OpenBatch>,
    in_flight: HashSet<String>,
}

impl Batcher {
    pub fn new() -> Self {
        Batcher::default()
    }

    /// Handles a `BATCH +<id> <type> [<target>]` line.
    pub fn open(&mut self, id: &str, kind: &str, target: Option<&str>) {
        let is_chathistory = kind.eq_ignore_ascii_case("chathistory");
        self.open.insert(
            id.to_string(),
            OpenBatch { is_chathistory, target: target.map(str::to_string), messages: Vec::new() },
        );
    }

    /// `true` if `id` is an open `chathistory` batch eligible to receive
    /// tagged messages.
    pub fn is_open_chathistory(&self, id: &str) -> bool {
        self.open.get(id).map(|b| b.is_chathistory).unwrap_or(false)
    }

    /// Appends a message to an open `chathistory` batch. Returns `false`
    /// (and does nothing) if `id` is not a known open chathistory batch.
    pub fn append(&mut self, id: &str, message: HistoryMessage) -> bool {
        if let Some(batch) = self.open.get_mut(id) {
            if batch.is_chathistory {
                batch.messages.push(message);
                return true;
            }
        }
        false
    }

    /// Handles `BATCH -<id>`, closing it and releasing the per-target
    /// in-flight guard. Returns the accumulated `(target, messages)` for a
    /// `chathistory` batch, or `None` for an unknown id (silently dropped,
    /// per spec.md §4.2 "stale BATCH -id") or a non-chathistory batch.
    pub fn close(&mut self, id: &str, casemap: impl Fn(&str) -> String) -> Option<(String, Vec<HistoryMessage>)> {
        let batch = self.open.remove(id)?;
        if !batch.is_chathistory {
            return None;
        }
        let target = batch.target?;
        self.in_flight.remove(&casemap(&target));
        Some((target, batch.messages))
    }

    /// Builds a `CHATHISTORY BEFORE` request, or `None` if one is already
    /// in flight for `target` or the `draft/chathistory` cap is not
    /// enabled.
    pub fn before(
        &mut self,
        target: &str,
        casemapped_target: &str,
        before: std::time::SystemTime,
        limit: u32,
        history_limit: Option<u32>,
        chathistory_cap_enabled: bool,
    ) -> Option<Message> {
        self.request("BEFORE", target, casemapped_target, before, limit, history_limit, chathistory_cap_enabled)
    }

    /// Builds a `CHATHISTORY AFTER` request; see [`Batcher::before`].
    pub fn after(
        &mut self,
        target: &str,
        casemapped_target: &str,
        after: std::time::SystemTime,
        limit: u32,
        history_limit: Option<u32>,
        chathistory_cap_enabled: bool,
    ) -> Option<Message> {
        self.request("AFTER", target, casemapped_target, after, limit, history_limit, chathistory_cap_enabled)
    }

    #[allow(clippy::too_many_arguments)]
    fn request(
        &mut self,
        direction: &str,
        target: &str,
        casemapped_target: &str,
        timestamp: std::time::SystemTime,
        limit: u32,
        history_limit: Option<u32>,
        chathistory_cap_enabled: bool,
    ) -> Option<Message> {
        if !chathistory_cap_enabled {
            return None;
        }
        if !self.in_flight.insert(casemapped_target.to_string()) {
            return None;
        }
        let clamped = history_limit.map(|max| limit.min(max)).unwrap_or(limit);
        let ts = format_iso8601_millis(timestamp);
        Some(Message::new(
            "CHATHISTORY",
            vec![direction.to_string(), target.to_string(), format!("timestamp={ts}"), clamped.to_string()],
        ))
    }
}

fn format_iso8601_millis(t: std::time::SystemTime) -> String {
    let dur = t.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    let secs = dur.as_secs();
    let millis = dur.subsec_millis();
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days as i64);
    let hour = rem / 3600;
    let minute = (rem % 3600) / 60;
    let second = rem % 60;
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z")
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as i64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// A builder for outgoing `CHATHISTORY` requests, per spec.md §4.3's
/// `NewHistoryRequest(target).WithLimit(n).Before(t)` surface. This is the
/// entry point callers are meant to use; its `before`/`after` terminal
/// methods are defined in `client::session` (see that module's `impl
/// HistoryRequest` block) since they need a [`crate::client::Session`] to
/// resolve casemapping and enabled-cap state.
pub struct HistoryRequest<'a> {
    target: &'a str,
    limit: u32,
}

impl<'a> HistoryRequest<'a> {
    pub fn new(target: &'a str) -> Self {
        HistoryRequest { target, limit: 100 }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn target(&self) -> &'a str {
        self.target
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}
