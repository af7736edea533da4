//! IRCv3 message-tag value escaping.
//!
//! Escape alphabet: `\:` `\s` `\r` `\n` `\\`. Decoding is total and never
//! panics on malformed input; a trailing lone backslash is dropped rather
//! than rejected.

/// Escapes a raw tag value for the wire.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// Decodes an escaped tag value from the wire.
///
/// Unknown escapes `\x` decode to the literal `x`; a trailing lone `\`
/// with nothing following it is dropped.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_arbitrary_strings() {
        for s in ["", "plain", "a;b c\r\nd\\e", "\\", "trailing\\"] {
            assert_eq!(unescape(&escape(s)), s);
        }
    }

    #[test]
    fn unknown_escape_keeps_literal_char() {
        assert_eq!(unescape("\\q"), "q");
    }

    #[test]
    fn trailing_lone_backslash_is_dropped() {
        assert_eq!(unescape("abc\\"), "abc");
    }

    #[test]
    fn escapes_each_special_char() {
        assert_eq!(escape(";"), "\\:");
        assert_eq!(escape(" "), "\\s");
        assert_eq!(escape("\r"), "\\r");
        assert_eq!(escape("\n"), "\\n");
        assert_eq!(escape("\\"), "\\\\");
    }
}
