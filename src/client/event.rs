//! The session's event stream.
//!
//! Grounded on spec.md §9's design note: "Events are a closed tagged
//! union... Do not reach for open-world interface dispatch," directly
//! mirroring `vinezombie::update`'s closed-`enum` style over a trait-object
//! event bus.

use crate::error::{MalformedMessage, ProtocolViolation, Severity};
use crate::history::HistoryMessage;

/// One semantic event emitted by a [`Session`][crate::client::Session] for
/// its consumer, per spec.md §3/§4.2/§9.
#[derive(Clone, Debug)]
pub enum Event {
    /// `001` was received and registration completed.
    Registered,
    /// Our own nick changed.
    SelfNick { former_nick: String },
    /// Someone else's nick changed.
    UserNick { user: String, former_nick: String },
    /// We finished joining a channel (end-of-names received).
    SelfJoin { channel: String, topic: Option<String>, requested: bool },
    /// Someone else joined a channel we're in.
    UserJoin { user: String, channel: String },
    /// We left a channel (PART or KICK of ourself).
    SelfPart { channel: String },
    /// Someone else left a channel we're in (PART or KICK).
    UserPart { user: String, channel: String, reason: Option<String> },
    /// Someone quit, and the channels (display names) we shared with them.
    UserQuit { user: String, channels: Vec<String> },
    /// A channel's topic changed via a live `TOPIC` command.
    TopicChange { channel: String, topic: Option<String>, setter: Option<String> },
    /// A channel's modes changed.
    ModeChange { channel: String, mode_string: String },
    /// We were invited to a channel.
    Invite { from: String, channel: String },
    /// A channel or private message.
    Message {
        user: String,
        target: String,
        target_is_channel: bool,
        command: MessageCommand,
        content: String,
        time: std::time::SystemTime,
    },
    /// A batch of server-side history arrived.
    History { target: String, messages: Vec<HistoryMessage> },
    /// The `soju.im/bouncer-networks` extension advertised a network.
    BouncerNetwork { id: String, name: String },
    /// A user's AWAY status changed.
    AwayChange { user: String, away_message: Option<String> },
    /// A user's account name changed (`account-notify`/`extended-join`).
    AccountChange { user: String, account: Option<String> },
    /// A user's realname changed (`SETNAME`).
    SetName { user: String, realname: String },
    /// A user's user/host changed (`CHGHOST`).
    ChgHost { user: String, new_user: String, new_host: String },
    /// An error worth surfacing to the consumer.
    Error { severity: Severity, code: String, message: String },
    /// A malformed inbound line; the session survives.
    Malformed(MalformedMessage),
    /// A message parsed fine but violated a dispatch-time requirement (e.g.
    /// a required prefix was missing); the session survives.
    ProtocolViolation(ProtocolViolation),
}

/// Distinguishes `PRIVMSG` from `NOTICE` in [`Event::Message`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MessageCommand {
    Privmsg,
    Notice,
}
