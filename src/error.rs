//! Error types.
//!
//! Grounded on `vinezombie::error` — hand-rolled `Display`/`Error` impls,
//! no `thiserror`, matching the teacher's explicit choice ("All lovingly
//! made without thiserror!").

/// A single wire line failed to parse or failed command-shape validation.
///
/// Per spec.md §4.1 / §7: reported to the consumer as a one-shot event,
/// never tears down the session.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MalformedMessage {
    /// Human-readable reason the line was rejected.
    pub reason: String,
}

impl MalformedMessage {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        MalformedMessage { reason: reason.into() }
    }
}

impl std::fmt::Display for MalformedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed message: {}", self.reason)
    }
}

impl std::error::Error for MalformedMessage {}

/// A message parsed successfully but violated a dispatch-time semantic
/// requirement — the distinct error kind spec.md §7 names separately from
/// [`MalformedMessage`] (e.g. a `PRIVMSG` with no source prefix).
///
/// Per spec.md §7: reported to the consumer per-message; the session
/// survives.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ProtocolViolation {
    /// Human-readable reason the message was rejected at dispatch time.
    pub reason: String,
}

impl ProtocolViolation {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        ProtocolViolation { reason: reason.into() }
    }
}

impl std::fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "protocol violation: {}", self.reason)
    }
}

impl std::error::Error for ProtocolViolation {}

/// Severity bucket for numeric replies and server-issued standard replies.
///
/// Per spec.md §4.1 / §7: numerics are bucketed by first digit, `WARN` is
/// always `Warn`, and `FAIL`/`NOTE` map directly onto this enum's other
/// variants.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Severity {
    /// `2xx`-`3xx` numerics, and `NOTE` commands.
    Note,
    /// Explicit `WARN` commands.
    Warn,
    /// `4xx`-`5xx` numerics, and `FAIL` commands.
    Fail,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Note => "note",
            Severity::Warn => "warn",
            Severity::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Classifies a 3-digit numeric reply code into a [`Severity`] bucket.
///
/// Per spec.md §7: `400-599` -> fail, `200-399` -> note, anything else
/// (including `000-199`) -> note.
pub fn classify_numeric(numeric: &str) -> Severity {
    match numeric.parse::<u16>() {
        Ok(400..=599) => Severity::Fail,
        _ => Severity::Note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_ranges() {
        assert_eq!(classify_numeric("001"), Severity::Note);
        assert_eq!(classify_numeric("366"), Severity::Note);
        assert_eq!(classify_numeric("433"), Severity::Fail);
        assert_eq!(classify_numeric("999"), Severity::Note);
        assert_eq!(classify_numeric("not-a-number"), Severity::Note);
    }
}
