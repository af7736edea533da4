//! The registration, dispatch, and outbound-action logic of component C2.
//!
//! Grounded on `vinezombie::client`'s registration `Handler` (a state
//! machine driven message-by-message through `CAP`/`AUTHENTICATE`/numeric
//! replies) combined with its `state::ClientState` (the post-registration
//! users/channels/topic bookkeeping). This module fuses both into one
//! `Session` type per spec.md §4.2's description of a single dispatcher
//! that owns all mutable state and processes one message or action at a
//! time.

use super::action::Action;
use super::cap::{self, CapArgs, SUPPORTED};
use super::event::{Event, MessageCommand};
use super::isupport::Features;
use super::sasl::AuthClient;
use super::world::World;
use crate::error::{classify_numeric, ProtocolViolation, Severity};
use crate::history::{Batcher, HistoryMessage, HistoryRequest};
use crate::ircmsg::{self, Message, Prefix};
use crate::typing::{InboundTyping, OutboundTyping};

use base64::Engine as _;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, trace, warn};

/// Assumed username/host overhead (in bytes) when our own host has not yet
/// been learned via self-`WHO`, per spec.md §4.2 scenario 4.
const UNKNOWN_HOST_OVERHEAD: usize = 15;

/// A per-network protocol session: registration, world model, history
/// batching, and typing tracking, all mutated by one dispatcher.
pub struct Session {
    nick: String,
    username: String,
    realname: String,
    host: Option<String>,
    account: Option<String>,
    auth: Option<Box<dyn AuthClient>>,
    registered: bool,
    cap_end_sent: bool,
    authenticating: bool,
    ls_buffer: Vec<(String, Option<String>)>,
    caps_available: HashMap<String, Option<String>>,
    caps_enabled: HashSet<String>,
    features: Features,
    world: World,
    batcher: Batcher,
    outbound_typing: OutboundTyping,
    inbound_typing: InboundTyping,
    pending_joins: HashMap<String, Instant>,
    nick_attempt: u32,
    who_requested: bool,
    closed: bool,
}

impl Session {
    /// Creates a new, unregistered session, returning it alongside the
    /// three outbound messages registration always starts with (spec.md
    /// §4.2 "Registration") and the receiver for inbound-typing timeout
    /// notifications (spec.md §4.4).
    pub fn new(
        nick: impl Into<String>,
        username: impl Into<String>,
        realname: impl Into<String>,
        auth: Option<Box<dyn AuthClient>>,
        now: Instant,
    ) -> (Session, Vec<Message>, tokio::sync::mpsc::UnboundedReceiver<(String, String)>) {
        let nick = nick.into();
        let username = username.into();
        let realname = realname.into();
        let (inbound_typing, rx) = InboundTyping::new();
        let session = Session {
            nick: nick.clone(),
            username: username.clone(),
            realname: realname.clone(),
            host: None,
            account: None,
            auth,
            registered: false,
            cap_end_sent: false,
            authenticating: false,
            ls_buffer: Vec::new(),
            caps_available: HashMap::new(),
            caps_enabled: HashSet::new(),
            features: Features::default(),
            world: World::new(Features::default().casemapping),
            batcher: Batcher::new(),
            outbound_typing: OutboundTyping::new(now),
            inbound_typing,
            pending_joins: HashMap::new(),
            nick_attempt: 0,
            who_requested: false,
            closed: false,
        };
        let outbound = vec![
            Message::new("CAP", vec!["LS".to_string(), "302".to_string()]),
            Message::new("NICK", vec![nick]),
            Message::new_trailing("USER", vec![username, "0".to_string(), "*".to_string(), realname]),
        ];
        (session, outbound, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Returns the display names currently typing toward `target`,
    /// excluding ourself.
    pub fn typings(&self, target: &str) -> Vec<String> {
        let casemapped_target = self.world.casemap(target);
        let self_key = self.world.casemap(&self.nick);
        self.inbound_typing.typings(&casemapped_target, &self_key, |casemapped_nick| {
            self.world.find(casemapped_nick).and_then(|id| self.world.user(id)).map(|u| u.nick().to_string())
        })
    }

    /// Processes one inbound wire line, returning the events it produced
    /// for the consumer and the wire messages it produced in reply.
    pub fn handle_line(&mut self, line: &str, wall_now: SystemTime, now: Instant) -> (Vec<Event>, Vec<Message>) {
        trace!(target: "driftnet::recv", "{}", line);
        let msg = match Message::parse(line) {
            Ok(msg) => msg,
            Err(malformed) => {
                warn!(target: "driftnet::recv", "malformed line: {}", malformed);
                return (vec![Event::Malformed(malformed)], Vec::new());
            }
        };
        self.dispatch(&msg, wall_now, now)
    }

    /// Applies a user-originated action, returning the wire messages it
    /// produces (spec.md §4.2 "Outbound actions").
    pub fn handle_action(&mut self, action: Action, now: Instant) -> Vec<Message> {
        match action {
            Action::PrivMsg { target, content } => self.chunked_message("PRIVMSG", target, content, now),
            Action::Join { channel, key } => {
                let mut params = vec![channel.clone()];
                if let Some(key) = key {
                    params.push(key);
                }
                self.pending_joins.insert(self.world.casemap(&channel), now);
                vec![Message::new("JOIN", params)]
            }
            Action::Part { channel, reason } => match reason {
                Some(reason) => vec![Message::new_trailing("PART", vec![channel, reason])],
                None => vec![Message::new("PART", vec![channel])],
            },
            Action::ChangeTopic { channel, topic } => vec![Message::new_trailing("TOPIC", vec![channel, topic])],
            Action::ChangeMode { channel, mode_string } => {
                let mut params = vec![channel];
                params.extend(mode_string.split_whitespace().map(str::to_string));
                vec![Message::new("MODE", params)]
            }
            Action::ChangeNick { nick } => vec![Message::new("NICK", vec![nick])],
            Action::Quit { reason } => {
                self.closed = true;
                match reason {
                    Some(reason) => vec![Message::new_trailing("QUIT", vec![reason])],
                    None => vec![Message::new("QUIT", Vec::new())],
                }
            }
            Action::SendRaw(line) => match Message::parse(&line) {
                Ok(msg) => vec![msg],
                Err(_) => Vec::new(),
            },
        }
    }

    /// Emits a `Typing(target)` frame if not suppressed, per spec.md §4.4.
    pub fn typing(&mut self, target: &str, now: Instant) -> Option<Message> {
        let casemapped = self.world.casemap(target);
        let message_tags = self.caps_enabled.contains("message-tags");
        self.outbound_typing.typing(target, &casemapped, message_tags, now)
    }

    /// Emits a `TypingStop(target)` frame if not suppressed, per spec.md §4.4.
    pub fn typing_stop(&mut self, target: &str, now: Instant) -> Option<Message> {
        let casemapped = self.world.casemap(target);
        let message_tags = self.caps_enabled.contains("message-tags");
        self.outbound_typing.typing_stop(target, &casemapped, message_tags, now)
    }

    /// Requests history before `before`, per spec.md §4.3.
    pub fn request_history_before(&mut self, target: &str, before: SystemTime, limit: u32) -> Option<Message> {
        let casemapped = self.world.casemap(target);
        let cap = self.caps_enabled.contains("draft/chathistory");
        self.batcher.before(target, &casemapped, before, limit, self.features.history_limit, cap)
    }

    /// Requests history after `after`, per spec.md §4.3.
    pub fn request_history_after(&mut self, target: &str, after: SystemTime, limit: u32) -> Option<Message> {
        let casemapped = self.world.casemap(target);
        let cap = self.caps_enabled.contains("draft/chathistory");
        self.batcher.after(target, &casemapped, after, limit, self.features.history_limit, cap)
    }

    fn chunked_message(&mut self, command: &str, target: String, content: String, now: Instant) -> Vec<Message> {
        let casemapped = self.world.casemap(&target);
        self.outbound_typing.clear(&casemapped);
        let host_len = self.host.as_ref().map(|h| h.len()).unwrap_or(UNKNOWN_HOST_OVERHEAD);
        let fixed = 16usize;
        let overhead = fixed + self.nick.len() + self.username.len() + host_len + target.len();
        let budget = self.features.linelen.saturating_sub(overhead).max(1);
        let _ = now;
        utf8_chunks(&content, budget)
            .into_iter()
            .map(|chunk| Message::new_trailing(command, vec![target.clone(), chunk]))
            .collect()
    }

    /// Reports a command that arrived without the source prefix dispatch
    /// requires to attribute it to a user, per spec.md §7's
    /// `ProtocolViolation` kind ("missing prefix on PRIVMSG" is the spec's
    /// own worked example). The session survives; only this one message is
    /// dropped.
    fn missing_prefix(&self, command: &str) -> (Vec<Event>, Vec<Message>) {
        let reason = format!("missing prefix on {command}");
        warn!(target: "driftnet::session", "{}", reason);
        (vec![Event::ProtocolViolation(ProtocolViolation::new(reason))], Vec::new())
    }

    fn dispatch(&mut self, msg: &Message, wall_now: SystemTime, now: Instant) -> (Vec<Event>, Vec<Message>) {
        if !self.registered {
            match msg.command.as_str() {
                "CAP" => return self.handle_cap(msg, now),
                "AUTHENTICATE" => return self.handle_authenticate(msg),
                "900" => return self.handle_sasl_success(msg),
                "902" | "904" | "905" | "906" | "907" | "908" => return self.finish_sasl_and_end(),
                "433" => return self.handle_nick_in_use(msg),
                _ => {}
            }
        }

        match msg.command.as_str() {
            "CAP" => self.handle_cap(msg, now),
            "001" => self.handle_welcome(msg),
            "005" => self.handle_isupport(msg),
            "JOIN" => self.handle_join(msg, now),
            "PART" => self.handle_part(msg),
            "KICK" => self.handle_kick(msg),
            "QUIT" => self.handle_quit(msg),
            "353" => self.handle_names(msg),
            "366" => self.handle_end_of_names(msg, now),
            "TOPIC" => self.handle_topic(msg, wall_now),
            "332" => self.handle_rpl_topic(msg),
            "333" => self.handle_rpl_topic_who_time(msg),
            "331" => self.handle_rpl_no_topic(msg),
            "MODE" => self.handle_mode(msg),
            "PRIVMSG" => self.handle_message(msg, wall_now, MessageCommand::Privmsg),
            "NOTICE" => self.handle_message(msg, wall_now, MessageCommand::Notice),
            "TAGMSG" => self.handle_tagmsg(msg),
            "NICK" => self.handle_nick(msg),
            "BATCH" => self.handle_batch(msg),
            "INVITE" => self.handle_invite(msg),
            "AWAY" => self.handle_away(msg),
            "ACCOUNT" => self.handle_account(msg),
            "SETNAME" => self.handle_setname(msg),
            "CHGHOST" => self.handle_chghost(msg),
            "BOUNCER" => self.handle_bouncer(msg),
            "352" => self.handle_who_reply(msg),
            "315" => {
                self.who_requested = false;
                (Vec::new(), Vec::new())
            }
            "PING" => (Vec::new(), vec![Message::new_trailing("PONG", msg.params.clone())]),
            "ERROR" => {
                self.closed = true;
                let message = msg.params.first().cloned().unwrap_or_default();
                warn!(target: "driftnet::session", "session closed by server: {}", message);
                (vec![Event::Error { severity: Severity::Fail, code: "ERROR".to_string(), message }], Vec::new())
            }
            "FAIL" | "WARN" | "NOTE" => self.handle_standard_reply(msg),
            command => {
                if ircmsg::is_numeric(command) {
                    let severity = classify_numeric(command);
                    let message = msg.params.get(1..).map(|p| p.join(" ")).unwrap_or_default();
                    (vec![Event::Error { severity, code: command.to_string(), message }], Vec::new())
                } else {
                    (Vec::new(), Vec::new())
                }
            }
        }
    }

    fn handle_cap(&mut self, msg: &Message, now: Instant) -> (Vec<Event>, Vec<Message>) {
        let Some(args) = CapArgs::parse(&msg.params) else { return (Vec::new(), Vec::new()) };
        let mut outbound = Vec::new();
        match args.subcmd.as_str() {
            "LS" => {
                self.ls_buffer.extend(args.caps);
                self.caps_available = self.ls_buffer.iter().cloned().collect();
                if args.is_last {
                    let to_request: Vec<&str> =
                        SUPPORTED.iter().copied().filter(|c| self.caps_available.contains_key(*c)).collect();
                    for line in cap::req_lines(to_request) {
                        outbound.push(Message::new("CAP", vec!["REQ".to_string(), line]));
                    }
                    if !self.registered {
                        let wants_sasl =
                            self.caps_available.contains_key("sasl") && self.auth.is_some();
                        if !wants_sasl {
                            debug!(target: "driftnet::session", "cap negotiation done, ending");
                            outbound.push(Message::new("CAP", vec!["END".to_string()]));
                            self.cap_end_sent = true;
                        }
                    }
                }
            }
            "ACK" => {
                let newly: Vec<String> = args.caps.iter().map(|(name, _)| name.clone()).collect();
                for name in &newly {
                    self.caps_enabled.insert(name.clone());
                }
                if !self.registered && newly.iter().any(|c| c == "sasl") {
                    if let Some(auth) = &mut self.auth {
                        self.authenticating = true;
                        outbound.push(Message::new("AUTHENTICATE", vec![auth.mechanism().to_string()]));
                    }
                }
                if self.registered && newly.iter().any(|c| c == "multi-prefix") {
                    let channels: Vec<String> = self.world.channels().map(|(_, c)| c.name.clone()).collect();
                    for channel in channels {
                        outbound.push(Message::new("NAMES", vec![channel]));
                    }
                }
            }
            "NAK" => {
                for (name, _) in &args.caps {
                    self.caps_available.remove(name);
                }
            }
            "NEW" => {
                for (name, value) in &args.caps {
                    self.caps_available.insert(name.clone(), value.clone());
                }
                let to_request: Vec<&str> = SUPPORTED
                    .iter()
                    .copied()
                    .filter(|c| self.caps_available.contains_key(*c) && !self.caps_enabled.contains(*c))
                    .collect();
                for line in cap::req_lines(to_request) {
                    outbound.push(Message::new("CAP", vec!["REQ".to_string(), line]));
                }
            }
            "DEL" => {
                for (name, _) in &args.caps {
                    self.caps_available.remove(name);
                    self.caps_enabled.remove(name);
                }
            }
            _ => {}
        }
        let _ = now;
        (Vec::new(), outbound)
    }

    fn handle_authenticate(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let challenge = msg.params.first().and_then(|p| {
            if p == "+" {
                Some(Vec::new())
            } else {
                base64::engine::general_purpose::STANDARD.decode(p).ok()
            }
        });
        let Some(auth) = &mut self.auth else { return self.finish_sasl_and_end() };
        match auth.step(challenge.as_deref()) {
            Some(response) => (Vec::new(), vec![Message::new("AUTHENTICATE", vec![response])]),
            None => (Vec::new(), vec![Message::new("AUTHENTICATE", vec!["*".to_string()])]),
        }
    }

    fn handle_sasl_success(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        if let Some(userhost) = msg.params.get(1) {
            if let Some((_, host)) = userhost.split_once('@') {
                self.host = Some(host.to_string());
            }
        }
        self.account = msg.params.get(2).cloned();
        self.finish_sasl_and_end()
    }

    fn finish_sasl_and_end(&mut self) -> (Vec<Event>, Vec<Message>) {
        self.authenticating = false;
        if self.cap_end_sent {
            return (Vec::new(), Vec::new());
        }
        self.cap_end_sent = true;
        debug!(target: "driftnet::session", "sasl finished, ending cap negotiation");
        (Vec::new(), vec![Message::new("CAP", vec!["END".to_string()])])
    }

    fn handle_nick_in_use(&mut self, _msg: &Message) -> (Vec<Event>, Vec<Message>) {
        self.nick_attempt += 1;
        self.nick.push('_');
        debug!(target: "driftnet::session", attempt = self.nick_attempt, nick = %self.nick, "nick in use, retrying");
        (Vec::new(), vec![Message::new("NICK", vec![self.nick.clone()])])
    }

    fn handle_welcome(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        if let Some(nick) = msg.params.first() {
            self.nick = nick.clone();
        }
        self.registered = true;
        info!(target: "driftnet::session", nick = %self.nick, "registration complete");
        self.world.set_self(Prefix {
            name: self.nick.clone(),
            user: Some(self.username.clone()),
            host: self.host.clone(),
        });
        let mut outbound = Vec::new();
        if self.host.is_none() && !self.who_requested {
            self.who_requested = true;
            outbound.push(Message::new("WHO", vec![self.nick.clone()]));
        }
        (vec![Event::Registered], outbound)
    }

    fn handle_isupport(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        if msg.params.len() > 1 {
            let tokens = &msg.params[1..];
            // The conventional trailing "are supported by this server"
            // human-readable tail is the only param that can contain a
            // space (every real ISUPPORT token is a single bare word or
            // `KEY=value`); drop it only when it looks like that tail
            // instead of unconditionally dropping the last param, so a
            // `005` sent without one doesn't lose its last real token.
            let token_count =
                if tokens.last().map(|t| t.contains(' ')).unwrap_or(false) { tokens.len() - 1 } else { tokens.len() };
            for token in &tokens[..token_count] {
                self.features.apply_token(token);
            }
            self.world.set_casemapping(self.features.casemapping);
        }
        (Vec::new(), Vec::new())
    }

    fn handle_who_reply(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        if !self.who_requested {
            return (Vec::new(), Vec::new());
        }
        if let (Some(host), Some(reply_nick)) = (msg.params.get(3), msg.params.get(5)) {
            if self.world.casemap(reply_nick) == self.world.casemap(&self.nick) {
                self.host = Some(host.clone());
                if let Some(id) = self.world.self_id() {
                    if let Some(user) = self.world.user_mut(id) {
                        user.prefix.host = Some(host.clone());
                    }
                }
            }
        }
        (Vec::new(), Vec::new())
    }

    fn handle_join(&mut self, msg: &Message, now: Instant) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let Some(channel) = msg.params.first().cloned() else { return (Vec::new(), Vec::new()) };
        let key = self.world.casemap(&channel);
        if self.world.casemap(&prefix.name) == self.world.casemap(&self.nick) {
            self.world.create_channel(&channel);
            self.pending_joins.insert(key, now);
            return (Vec::new(), Vec::new());
        }
        let id = self.world.upsert(prefix.clone());
        if let (Some(account), Some(realname)) = (msg.params.get(1), msg.params.get(2)) {
            if let Some(user) = self.world.user_mut(id) {
                user.account = if account == "*" { None } else { Some(account.clone()) };
                user.realname = Some(realname.clone());
            }
        }
        self.world.join(&key, &channel, id, String::new());
        (vec![Event::UserJoin { user: prefix.name, channel }], Vec::new())
    }

    fn handle_part(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let Some(channel) = msg.params.first().cloned() else { return (Vec::new(), Vec::new()) };
        let key = self.world.casemap(&channel);
        let reason = msg.params.get(1).cloned();
        if self.world.casemap(&prefix.name) == self.world.casemap(&self.nick) {
            self.clear_typing_for_channel(&key);
            self.world.destroy_channel(&key);
            self.pending_joins.remove(&key);
            return (vec![Event::SelfPart { channel }], Vec::new());
        }
        let Some(id) = self.world.find(&prefix.name) else { return (Vec::new(), Vec::new()) };
        self.world.part(&key, id);
        let casemapped_sender = self.world.casemap(&prefix.name);
        self.inbound_typing.clear(&key, &casemapped_sender);
        (vec![Event::UserPart { user: prefix.name, channel, reason }], Vec::new())
    }

    fn handle_kick(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let (Some(channel), Some(kicked)) = (msg.params.first().cloned(), msg.params.get(1).cloned()) else {
            return (Vec::new(), Vec::new());
        };
        let key = self.world.casemap(&channel);
        let reason = msg.params.get(2).cloned();
        if self.world.casemap(&kicked) == self.world.casemap(&self.nick) {
            self.clear_typing_for_channel(&key);
            self.world.destroy_channel(&key);
            self.pending_joins.remove(&key);
            return (vec![Event::SelfPart { channel }], Vec::new());
        }
        let Some(id) = self.world.find(&kicked) else { return (Vec::new(), Vec::new()) };
        self.world.part(&key, id);
        let casemapped_kicked = self.world.casemap(&kicked);
        self.inbound_typing.clear(&key, &casemapped_kicked);
        (vec![Event::UserPart { user: kicked, channel, reason }], Vec::new())
    }

    fn clear_typing_for_channel(&mut self, channel_key: &str) {
        if let Some(channel) = self.world.channel(channel_key) {
            let members: Vec<String> = channel
                .members
                .keys()
                .filter_map(|id| self.world.user(*id).map(|u| self.world.casemap(u.nick())))
                .collect();
            for sender in members {
                self.inbound_typing.clear(channel_key, &sender);
            }
        }
    }

    fn handle_quit(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let Some(id) = self.world.find(&prefix.name) else { return (Vec::new(), Vec::new()) };
        let left_keys = self.world.quit(id);
        let channels: Vec<String> =
            left_keys.iter().filter_map(|key| self.world.channel(key).map(|c| c.name.clone())).collect();
        let casemapped_sender = self.world.casemap(&prefix.name);
        self.inbound_typing.clear_user(&casemapped_sender);
        (vec![Event::UserQuit { user: prefix.name, channels }], Vec::new())
    }

    fn handle_names(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let (Some(channel), Some(trailing)) = (msg.params.get(2), msg.params.last()) else {
            return (Vec::new(), Vec::new());
        };
        let key = self.world.casemap(channel);
        let entries = ircmsg::decode_names(trailing, &self.features.prefix_symbols);
        for entry in entries {
            let id = self.world.upsert(entry.prefix);
            self.world.join(&key, channel, id, entry.power);
        }
        (Vec::new(), Vec::new())
    }

    fn handle_end_of_names(&mut self, msg: &Message, now: Instant) -> (Vec<Event>, Vec<Message>) {
        let Some(channel) = msg.params.get(1) else { return (Vec::new(), Vec::new()) };
        let key = self.world.casemap(channel);
        let requested_at = self.pending_joins.remove(&key);
        let Some(chan) = self.world.channel_mut(&key) else { return (Vec::new(), Vec::new()) };
        if chan.complete {
            return (Vec::new(), Vec::new());
        }
        chan.complete = true;
        let topic = chan.topic.clone();
        let display_name = chan.name.clone();
        let requested =
            requested_at.map(|t| now.saturating_duration_since(t) < Duration::from_secs(5)).unwrap_or(false);
        (vec![Event::SelfJoin { channel: display_name, topic, requested }], Vec::new())
    }

    fn handle_topic(&mut self, msg: &Message, wall_now: SystemTime) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let (Some(channel), Some(topic)) = (msg.params.first().cloned(), msg.params.get(1).cloned()) else {
            return (Vec::new(), Vec::new());
        };
        let key = self.world.casemap(&channel);
        let topic_opt = if topic.is_empty() { None } else { Some(topic.clone()) };
        if let Some(chan) = self.world.channel_mut(&key) {
            chan.topic = topic_opt.clone();
            chan.topic_setter = Some(prefix.name.clone());
            chan.topic_time = Some(wall_now);
        }
        (vec![Event::TopicChange { channel, topic: topic_opt, setter: Some(prefix.name) }], Vec::new())
    }

    fn handle_rpl_topic(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let (Some(channel), Some(topic)) = (msg.params.get(1), msg.params.get(2)) else {
            return (Vec::new(), Vec::new());
        };
        let key = self.world.casemap(channel);
        if let Some(chan) = self.world.channel_mut(&key) {
            chan.topic = Some(topic.clone());
        }
        (Vec::new(), Vec::new())
    }

    fn handle_rpl_topic_who_time(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let (Some(channel), Some(setter)) = (msg.params.get(1), msg.params.get(2)) else {
            return (Vec::new(), Vec::new());
        };
        let key = self.world.casemap(channel);
        let time = msg
            .params
            .get(3)
            .and_then(|s| s.parse::<u64>().ok())
            .map(|secs| std::time::UNIX_EPOCH + Duration::from_secs(secs));
        if let Some(chan) = self.world.channel_mut(&key) {
            chan.topic_setter = Some(setter.clone());
            chan.topic_time = time;
        }
        (Vec::new(), Vec::new())
    }

    fn handle_rpl_no_topic(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(channel) = msg.params.get(1) else { return (Vec::new(), Vec::new()) };
        let key = self.world.casemap(channel);
        if let Some(chan) = self.world.channel_mut(&key) {
            chan.topic = None;
        }
        (Vec::new(), Vec::new())
    }

    fn handle_mode(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(target) = msg.params.first() else { return (Vec::new(), Vec::new()) };
        if !self.features.is_channel_name(target) {
            return (Vec::new(), Vec::new());
        }
        let mode_string = msg.params[1..].join(" ");
        (vec![Event::ModeChange { channel: target.clone(), mode_string }], Vec::new())
    }

    fn handle_message(&mut self, msg: &Message, wall_now: SystemTime, command: MessageCommand) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let (Some(target), Some(content)) = (msg.params.first().cloned(), msg.params.get(1).cloned()) else {
            return (Vec::new(), Vec::new());
        };
        let casemapped_sender = self.world.casemap(&prefix.name);
        let casemapped_target = self.world.casemap(&target);
        self.inbound_typing.clear(&casemapped_target, &casemapped_sender);

        if let Some(batch_id) = msg.tags.get("batch").map(str::to_string) {
            if self.batcher.is_open_chathistory(&batch_id) {
                let time = msg.time(wall_now);
                let history_message = HistoryMessage {
                    user: prefix.name,
                    target_is_channel: self.world.channel(&casemapped_target).is_some(),
                    target,
                    command,
                    content,
                    time,
                };
                self.batcher.append(&batch_id, history_message);
                return (Vec::new(), Vec::new());
            }
        }

        let target_is_channel = self.world.channel(&casemapped_target).is_some();
        let time = msg.time(wall_now);
        (
            vec![Event::Message { user: prefix.name, target, target_is_channel, command, content, time }],
            Vec::new(),
        )
    }

    fn handle_tagmsg(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        if self.world.casemap(&prefix.name) == self.world.casemap(&self.nick) {
            return (Vec::new(), Vec::new());
        }
        let Some(target) = msg.params.first() else { return (Vec::new(), Vec::new()) };
        let Some(state) = msg.tags.get("+typing") else { return (Vec::new(), Vec::new()) };
        let casemapped_target = self.world.casemap(target);
        let casemapped_sender = self.world.casemap(&prefix.name);
        match state {
            "active" => self.inbound_typing.mark_active(casemapped_target, casemapped_sender),
            "paused" | "done" => self.inbound_typing.mark_done(&casemapped_target, &casemapped_sender),
            _ => {}
        }
        (Vec::new(), Vec::new())
    }

    fn handle_nick(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let Some(new_nick) = msg.params.first().cloned() else { return (Vec::new(), Vec::new()) };
        let Some(id) = self.world.find(&prefix.name) else { return (Vec::new(), Vec::new()) };
        let is_self = self.world.is_self(id);
        self.world.rename(id, &new_nick);
        if is_self {
            self.nick = new_nick;
            (vec![Event::SelfNick { former_nick: prefix.name }], Vec::new())
        } else {
            (vec![Event::UserNick { user: new_nick, former_nick: prefix.name }], Vec::new())
        }
    }

    fn handle_batch(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(tag) = msg.params.first() else { return (Vec::new(), Vec::new()) };
        if let Some(id) = tag.strip_prefix('+') {
            let kind = msg.params.get(1).map(String::as_str).unwrap_or("");
            let target = msg.params.get(2).map(String::as_str);
            self.batcher.open(id, kind, target);
            (Vec::new(), Vec::new())
        } else if let Some(id) = tag.strip_prefix('-') {
            match self.batcher.close(id, |s| self.world.casemap(s)) {
                Some((target, messages)) => (vec![Event::History { target, messages }], Vec::new()),
                None => (Vec::new(), Vec::new()),
            }
        } else {
            (Vec::new(), Vec::new())
        }
    }

    fn handle_invite(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let (Some(target_nick), Some(channel)) = (msg.params.first(), msg.params.get(1).cloned()) else {
            return (Vec::new(), Vec::new());
        };
        if self.world.casemap(target_nick) != self.world.casemap(&self.nick) {
            return (Vec::new(), Vec::new());
        }
        (vec![Event::Invite { from: prefix.name, channel }], Vec::new())
    }

    fn handle_away(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let away_message = msg.params.first().cloned();
        if let Some(id) = self.world.find(&prefix.name) {
            if let Some(user) = self.world.user_mut(id) {
                user.away_message = away_message.clone();
            }
        }
        (vec![Event::AwayChange { user: prefix.name, away_message }], Vec::new())
    }

    fn handle_account(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let Some(account_param) = msg.params.first() else { return (Vec::new(), Vec::new()) };
        let account = if account_param == "*" { None } else { Some(account_param.clone()) };
        if let Some(id) = self.world.find(&prefix.name) {
            if let Some(user) = self.world.user_mut(id) {
                user.account = account.clone();
            }
        }
        (vec![Event::AccountChange { user: prefix.name, account }], Vec::new())
    }

    fn handle_setname(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let Some(realname) = msg.params.first().cloned() else { return (Vec::new(), Vec::new()) };
        if let Some(id) = self.world.find(&prefix.name) {
            if let Some(user) = self.world.user_mut(id) {
                user.realname = Some(realname.clone());
            }
        }
        (vec![Event::SetName { user: prefix.name, realname }], Vec::new())
    }

    fn handle_chghost(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let Some(prefix) = msg.prefix.clone() else { return self.missing_prefix(&msg.command) };
        let (Some(new_user), Some(new_host)) = (msg.params.first().cloned(), msg.params.get(1).cloned()) else {
            return (Vec::new(), Vec::new());
        };
        if let Some(id) = self.world.find(&prefix.name) {
            if let Some(user) = self.world.user_mut(id) {
                user.prefix.user = Some(new_user.clone());
                user.prefix.host = Some(new_host.clone());
            }
        }
        (vec![Event::ChgHost { user: prefix.name, new_user, new_host }], Vec::new())
    }

    /// Handles the `soju.im/bouncer-networks` extension's unsolicited
    /// `BOUNCER NETWORK <id> <attrs>` push (and the identically-shaped
    /// replies to a `BOUNCER LISTNETWORKS` request), emitting
    /// `Event::BouncerNetwork` for the transport layer to act on (spec.md
    /// §4.5). `<attrs>` is a `;`-separated `key=value` list; only `name` is
    /// surfaced per spec.md §3/§9's closed event union. The `*` id
    /// terminates a `LISTNETWORKS` listing and carries no network.
    fn handle_bouncer(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        if msg.params.first().map(String::as_str) != Some("NETWORK") {
            return (Vec::new(), Vec::new());
        }
        let (Some(id), Some(attrs)) = (msg.params.get(1), msg.params.get(2)) else {
            return (Vec::new(), Vec::new());
        };
        if id == "*" {
            return (Vec::new(), Vec::new());
        }
        let name = attrs
            .split(';')
            .find_map(|kv| kv.strip_prefix("name="))
            .unwrap_or(id)
            .to_string();
        (vec![Event::BouncerNetwork { id: id.clone(), name }], Vec::new())
    }

    fn handle_standard_reply(&mut self, msg: &Message) -> (Vec<Event>, Vec<Message>) {
        let severity = match msg.command.as_str() {
            "WARN" => Severity::Warn,
            "FAIL" => Severity::Fail,
            _ => Severity::Note,
        };
        let code = msg.params.get(1).cloned().unwrap_or_default();
        let message = msg.params.get(2..).map(|p| p.join(" ")).unwrap_or_default();
        (vec![Event::Error { severity, code, message }], Vec::new())
    }
}

/// Terminal methods for spec.md §4.3's `NewHistoryRequest(target)
/// .WithLimit(n).Before(t)`/`.After(t)` builder surface. These live here
/// rather than in `history.rs` because a terminal call needs the casemap
/// and the enabled-caps/`history_limit` state that only a [`Session`] owns
/// (C3 sits below C2 in spec.md §2's dependency order, so `history.rs`
/// itself cannot depend back on `Session`).
impl<'a> HistoryRequest<'a> {
    /// Sends `CHATHISTORY BEFORE`, or does nothing if a request for this
    /// target is already in flight, the `draft/chathistory` cap is not
    /// enabled, or none of this builder's state would fit (see
    /// [`Session::request_history_before`]).
    pub fn before(self, session: &mut Session, timestamp: SystemTime) -> Option<Message> {
        session.request_history_before(self.target(), timestamp, self.limit())
    }

    /// Sends `CHATHISTORY AFTER`; see [`HistoryRequest::before`].
    pub fn after(self, session: &mut Session, timestamp: SystemTime) -> Option<Message> {
        session.request_history_after(self.target(), timestamp, self.limit())
    }
}

/// Splits `content` into chunks of at most `max_bytes` bytes, each landing
/// on a UTF-8 code-point boundary, per spec.md §4.2/§8 "UTF-8 safe chunking".
fn utf8_chunks(content: &str, max_bytes: usize) -> Vec<String> {
    if content.is_empty() {
        return vec![String::new()];
    }
    let bytes = content.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let mut end = (start + max_bytes).min(bytes.len());
        while end > start && !content.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // `max_bytes` lands inside the first code point of this chunk
            // (a tiny `linelen` budget can make this legitimate, not just a
            // bug): emit that whole code point over-budget rather than
            // cutting it in half.
            end = start + 1;
            while end < bytes.len() && !content.is_char_boundary(end) {
                end += 1;
            }
        }
        chunks.push(content[start..end].to_string());
        start = end;
    }
    chunks
}
