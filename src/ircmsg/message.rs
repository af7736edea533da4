//! The IRC message codec.
//!
//! `Message`/`Prefix` are a single owned pair shared by both wire
//! directions, since this engine is the sole owner of inbound and outbound
//! traffic on a connection.

use super::tags::Tags;
use crate::error::MalformedMessage;

/// A decoded `{nick, user, host}` source prefix.
///
/// Per spec.md §3: if present, the nick is non-empty.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Prefix {
    pub name: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl Prefix {
    fn parse(raw: &str) -> Result<Prefix, MalformedMessage> {
        if raw.is_empty() {
            return Err(MalformedMessage::new("empty prefix"));
        }
        let (name_user, host) = match raw.split_once('@') {
            Some((a, b)) => (a, Some(b.to_string())),
            None => (raw, None),
        };
        let (name, user) = match name_user.split_once('!') {
            Some((a, b)) => (a, Some(b.to_string())),
            None => (name_user, None),
        };
        if name.is_empty() {
            return Err(MalformedMessage::new("truncated prefix: empty nick"));
        }
        Ok(Prefix { name: name.to_string(), user, host })
    }

    fn serialize(&self) -> String {
        let mut out = self.name.clone();
        if let Some(user) = &self.user {
            out.push('!');
            out.push_str(user);
        }
        if let Some(host) = &self.host {
            out.push('@');
            out.push_str(host);
        }
        out
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// A decoded protocol line.
///
/// Per spec.md §3: `command` is uppercased (either an alphabetic verb or a
/// 3-digit numeric), `params` is ordered and the last element may be a
/// "trailing" parameter carrying spaces.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
    pub tags: Tags,
    pub prefix: Option<Prefix>,
    pub command: String,
    pub params: Vec<String>,
    /// Forces the last parameter to serialize with a leading `:` even when
    /// it contains no space, for outbound commands whose last field is
    /// conventionally sent as an explicit trailing parameter (`USER`'s
    /// realname, `PRIVMSG`/`NOTICE` content, `PONG`'s token). Always
    /// `false` for a parsed message; only set by [`Message::new_trailing`].
    force_trailing: bool,
}

fn is_numeric_command(s: &str) -> bool {
    s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit())
}

impl Message {
    /// Builds a message with no tags or prefix.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Message {
        Message { tags: Tags::new(), prefix: None, command: command.into(), params, force_trailing: false }
    }

    /// Like [`Message::new`], but forces the last parameter to always
    /// serialize as an explicit trailing `:`-prefixed field.
    pub fn new_trailing(command: impl Into<String>, params: Vec<String>) -> Message {
        let force_trailing = !params.is_empty();
        Message { tags: Tags::new(), prefix: None, command: command.into(), params, force_trailing }
    }

    /// Parses a single wire line (without trailing CR/LF).
    ///
    /// Phases, per spec.md §4.1: optional `@tags`, optional `:prefix`,
    /// uppercased command, whitespace-separated params with an optional
    /// `:trailing` last param.
    pub fn parse(line: &str) -> Result<Message, MalformedMessage> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut rest = line;
        if rest.is_empty() {
            return Err(MalformedMessage::new("empty line"));
        }

        let tags = if let Some(body) = rest.strip_prefix('@') {
            let (tag_body, after) = split_first_word(body);
            rest = after;
            Tags::parse(tag_body)
        } else {
            Tags::new()
        };

        rest = rest.trim_start_matches(' ');
        let prefix = if let Some(body) = rest.strip_prefix(':') {
            let (prefix_raw, after) = split_first_word(body);
            rest = after;
            Some(Prefix::parse(prefix_raw)?)
        } else {
            None
        };

        rest = rest.trim_start_matches(' ');
        let (command_raw, after) = split_first_word(rest);
        rest = after;
        if command_raw.is_empty() {
            return Err(MalformedMessage::new("missing command"));
        }
        let command = command_raw.to_ascii_uppercase();
        if !command.bytes().all(|b| b.is_ascii_alphabetic()) && !is_numeric_command(&command) {
            return Err(MalformedMessage::new("non-3-digit numeric with no verb"));
        }

        let mut params = Vec::new();
        let mut remaining = rest.trim_start_matches(' ');
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            let (word, after) = split_first_word(remaining);
            params.push(word.to_string());
            remaining = after;
        }

        let msg = Message { tags, prefix, command, params, force_trailing: false };
        validate(&msg)?;
        Ok(msg)
    }

    /// Serializes to a wire line, without trailing CRLF.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let tag_str = self.tags.serialize();
        if !tag_str.is_empty() {
            out.push_str(&tag_str);
            out.push(' ');
        }
        if let Some(prefix) = &self.prefix {
            out.push(':');
            out.push_str(&prefix.serialize());
            out.push(' ');
        }
        out.push_str(&self.command);
        for (i, param) in self.params.iter().enumerate() {
            out.push(' ');
            let is_last = i + 1 == self.params.len();
            if is_last && (self.force_trailing || param.is_empty() || param.starts_with(':') || param.contains(' ')) {
                out.push(':');
            }
            out.push_str(param);
        }
        out
    }

    /// Extracts the `time` tag as an instant, falling back to the wall
    /// clock at receipt if absent or malformed.
    ///
    /// Per spec.md §4.1: format `YYYY-MM-DDThh:mm:ss.sssZ`.
    pub fn time(&self, received_at: std::time::SystemTime) -> std::time::SystemTime {
        self.tags.get("time").and_then(parse_iso8601_millis).unwrap_or(received_at)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn split_first_word(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    }
}

/// Parses `YYYY-MM-DDThh:mm:ss.sssZ` into a `SystemTime`, without pulling
/// in a date/time crate: the format is fixed-width and fully specified by
/// IRCv3's `server-time`, so a manual parse is simpler than a dependency.
fn parse_iso8601_millis(s: &str) -> Option<std::time::SystemTime> {
    let b = s.as_bytes();
    if b.len() != 24 || b[4] != b'-' || b[7] != b'-' || b[10] != b'T' || b[13] != b':'
        || b[16] != b':' || b[19] != b'.' || b[23] != b'Z'
    {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    let month: u32 = s.get(5..7)?.parse().ok()?;
    let day: u32 = s.get(8..10)?.parse().ok()?;
    let hour: u64 = s.get(11..13)?.parse().ok()?;
    let minute: u64 = s.get(14..16)?.parse().ok()?;
    let second: u64 = s.get(17..19)?.parse().ok()?;
    let millis: u64 = s.get(20..23)?.parse().ok()?;

    let days = days_since_epoch(year, month, day)?;
    let secs = (days as u64) * 86_400 + hour * 3600 + minute * 60 + second;
    let dur = std::time::Duration::from_secs(secs) + std::time::Duration::from_millis(millis);
    Some(std::time::UNIX_EPOCH + dur)
}

fn days_since_epoch(year: i64, month: u32, day: u32) -> Option<i64> {
    if !(1970..=9999).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    // Civil-from-days algorithm (Howard Hinnant), used in reverse.
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = ((month as i64 + 9) % 12) as i64;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Some(era * 146_097 + doe - 719_468)
}

/// Minimum parameter counts per command, per spec.md §4.1 ("validation step
/// checks minimum parameter counts... per command"). Unknown commands parse
/// successfully; only these known shapes are enforced.
///
/// Prefix presence is a dispatch-time concern, not a parse-time one: a line
/// like `PRIVMSG #x :hi` parses fine on its own, but the session state
/// machine requires a prefix to know who sent it. That check — and the
/// resulting `ProtocolViolation` per spec.md §7 — lives in
/// `client::session::Session::dispatch`, not here.
fn validate(msg: &Message) -> Result<(), MalformedMessage> {
    let min_params = match msg.command.as_str() {
        "PRIVMSG" | "NOTICE" | "TAGMSG" => {
            if msg.command != "TAGMSG" { 2 } else { 1 }
        }
        "JOIN" | "PART" | "NICK" | "MODE" | "TOPIC" | "PING" | "PONG" => 1,
        "INVITE" | "KICK" => 2,
        "QUIT" | "ERROR" => 0,
        "CAP" => 1,
        "AUTHENTICATE" => 1,
        _ => 0,
    };
    if msg.params.len() < min_params {
        return Err(MalformedMessage::new(format!(
            "{} requires at least {} parameter(s), got {}",
            msg.command,
            min_params,
            msg.params.len()
        )));
    }
    if msg.command == "TAGMSG" && msg.params.is_empty() {
        return Err(MalformedMessage::new("TAGMSG requires a target"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(line: &str) {
        let msg = Message::parse(line).unwrap();
        let reserialized = msg.serialize();
        let msg2 = Message::parse(&reserialized).unwrap();
        assert_eq!(msg, msg2);
    }

    #[test]
    fn parses_simple_privmsg() {
        let msg = Message::parse(":alice!a@h PRIVMSG #x :hello world").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#x".to_string(), "hello world".to_string()]);
        let prefix = msg.prefix.unwrap();
        assert_eq!(prefix.name, "alice");
        assert_eq!(prefix.user.as_deref(), Some("a"));
        assert_eq!(prefix.host.as_deref(), Some("h"));
    }

    #[test]
    fn parses_tags_and_numeric() {
        let msg = Message::parse("@time=2021-01-01T00:00:00.000Z :irc.example 001 alice :welcome")
            .unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.tags.get("time"), Some("2021-01-01T00:00:00.000Z"));
    }

    #[test]
    fn uppercases_command() {
        let msg = Message::parse("ping :hi").unwrap();
        assert_eq!(msg.command, "PING");
    }

    #[test]
    fn round_trips_well_formed_messages() {
        roundtrip("PRIVMSG #x :hello there");
        roundtrip(":alice!a@h JOIN #x");
        roundtrip("@msgid=1;time=2024-01-01T00:00:00.000Z :irc.example 353 alice = #x :@bob +carol");
        roundtrip("CAP LS 302");
        roundtrip("PRIVMSG #x ::colon-led trailing");
    }

    #[test]
    fn rejects_empty_line() {
        assert!(Message::parse("").is_err());
        assert!(Message::parse("   ").is_err());
    }

    #[test]
    fn rejects_truncated_prefix() {
        assert!(Message::parse(": PRIVMSG #x :hi").is_err());
    }

    #[test]
    fn rejects_non_3_digit_numeric_looking_command() {
        assert!(Message::parse("12 foo").is_err());
    }

    #[test]
    fn unknown_commands_parse_successfully() {
        let msg = Message::parse("FROBNICATE a b c").unwrap();
        assert_eq!(msg.command, "FROBNICATE");
    }

    #[test]
    fn time_tag_extraction() {
        let msg = Message::parse("@time=2024-03-05T12:30:00.125Z PING :x").unwrap();
        let fallback = std::time::UNIX_EPOCH;
        let t = msg.time(fallback);
        assert_ne!(t, fallback);
    }

    #[test]
    fn new_trailing_forces_colon_without_space() {
        let msg = Message::new_trailing("USER", vec!["alice".to_string(), "0".to_string(), "*".to_string(), "alice".to_string()]);
        assert_eq!(msg.serialize(), "USER alice 0 * :alice");
    }

    #[test]
    fn time_tag_falls_back_on_missing_or_malformed() {
        let msg = Message::parse("PING :x").unwrap();
        let fallback = std::time::SystemTime::now();
        assert_eq!(msg.time(fallback), fallback);

        let msg = Message::parse("@time=not-a-time PING :x").unwrap();
        assert_eq!(msg.time(fallback), fallback);
    }
}
