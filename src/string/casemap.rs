//! IRC casemapping: the server-chosen function used to compare nicks and
//! channel names.
//!
//! Only `ascii` and `rfc1459` are recognized; `rfc1459` maps the full
//! `{|}~` <-> `[]\^` quartet.

/// The active casemapping for a network, chosen from the server's
/// `CASEMAPPING` ISUPPORT token.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Casemapping {
    /// Lowercases only `A-Z`.
    Ascii,
    /// ASCII casemapping, plus `{`, `|`, `}`, `~` map to `[`, `\`, `]`, `^`.
    #[default]
    Rfc1459,
}

impl Casemapping {
    /// Parses the value of an ISUPPORT `CASEMAPPING` token.
    ///
    /// Unknown values fall back to [`Casemapping::Rfc1459`], the RFC 1459
    /// default.
    pub fn from_token(value: &str) -> Casemapping {
        match value {
            "ascii" => Casemapping::Ascii,
            _ => Casemapping::Rfc1459,
        }
    }

    /// Casemaps a single byte.
    fn map_byte(self, b: u8) -> u8 {
        match self {
            Casemapping::Ascii => b.to_ascii_lowercase(),
            Casemapping::Rfc1459 => match b {
                b'A'..=b'Z' => b + 32,
                b'{' => b'[',
                b'|' => b'\\',
                b'}' => b']',
                b'~' => b'^',
                _ => b,
            },
        }
    }

    /// Casemaps a string, returning a new owned, lowercased copy.
    ///
    /// Idempotent: `casemap(casemap(x)) == casemap(x)`.
    pub fn casemap(self, input: &str) -> String {
        let bytes: Vec<u8> = input.bytes().map(|b| self.map_byte(b)).collect();
        String::from_utf8(bytes).expect("ascii-only remap preserves UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_lowercases_only_letters() {
        let cm = Casemapping::Ascii;
        assert_eq!(cm.casemap("Foo{Bar}~Baz"), "foo{bar}~baz");
    }

    #[test]
    fn rfc1459_maps_bracket_quartet() {
        let cm = Casemapping::Rfc1459;
        assert_eq!(cm.casemap("Nick{|}~"), "nick[\\]^");
    }

    #[test]
    fn idempotent() {
        for cm in [Casemapping::Ascii, Casemapping::Rfc1459] {
            for s in ["HeLLo[]\\^{}|~", "already_lower", "", "Héllo", "Ω_Nick", "日本語"] {
                let once = cm.casemap(s);
                let twice = cm.casemap(&once);
                assert_eq!(once, twice);
            }
        }
    }

    #[test]
    fn non_ascii_bytes_pass_through_unchanged() {
        let cm = Casemapping::Rfc1459;
        assert_eq!(cm.casemap("Héllo"), "héllo");
        assert_eq!(cm.casemap("日本語"), "日本語");
    }

    #[test]
    fn from_token_defaults_to_rfc1459() {
        assert_eq!(Casemapping::from_token("ascii"), Casemapping::Ascii);
        assert_eq!(Casemapping::from_token("rfc1459"), Casemapping::Rfc1459);
        assert_eq!(Casemapping::from_token("nonsense"), Casemapping::Rfc1459);
    }
}
