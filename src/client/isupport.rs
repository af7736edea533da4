//! ISUPPORT (`005`) token parsing.
//!
//! Grounded on `vinezombie::state::serverinfo`, whose `ISupportParser`
//! registers a type-erased parser per recognized token. That machinery
//! exists to let downstream crates add their own ISUPPORT tokens; this
//! engine has a fixed, spec-enumerated set (spec.md §4.2), so it collapses
//! down to one plain struct with one `apply_token` method.

use crate::string::Casemapping;

/// Server-advertised ISUPPORT-derived features tracked by a [`Session`][crate::client::Session].
#[derive(Clone, Debug)]
pub struct Features {
    pub casemapping: Casemapping,
    pub chantypes: String,
    pub linelen: usize,
    pub history_limit: Option<u32>,
    pub prefix_modes: String,
    pub prefix_symbols: String,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            casemapping: Casemapping::Rfc1459,
            chantypes: "#&".to_string(),
            linelen: 512,
            history_limit: None,
            prefix_modes: "ov".to_string(),
            prefix_symbols: "@+".to_string(),
        }
    }
}

impl Features {
    /// Returns `true` if `target` begins with one of `CHANTYPES`.
    pub fn is_channel_name(&self, target: &str) -> bool {
        target.chars().next().map(|c| self.chantypes.contains(c)).unwrap_or(false)
    }

    /// Applies one `KEY[=value]` or `-KEY` ISUPPORT token.
    ///
    /// Negation (`-KEY`) is advisory only and ignored, per spec.md §4.2.
    /// Unknown keys are silently retained (i.e. ignored; this engine has no
    /// generic storage for them since nothing downstream reads it).
    pub fn apply_token(&mut self, token: &str) {
        if token.starts_with('-') {
            return;
        }
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (token, None),
        };
        match key {
            "CASEMAPPING" => {
                self.casemapping = Casemapping::from_token(value.unwrap_or(""));
            }
            "CHANTYPES" => {
                if let Some(v) = value {
                    self.chantypes = v.to_string();
                }
            }
            "LINELEN" => {
                if let Some(n) = value.and_then(|v| v.parse::<usize>().ok()) {
                    if n > 0 {
                        self.linelen = n;
                    }
                }
            }
            "CHATHISTORY" => {
                self.history_limit = value.and_then(|v| v.parse::<u32>().ok());
            }
            "PREFIX" => {
                if let Some(v) = value {
                    if let Some((modes, symbols)) = parse_prefix(v) {
                        self.prefix_modes = modes;
                        self.prefix_symbols = symbols;
                    }
                }
            }
            _ => {}
        }
    }
}

fn parse_prefix(value: &str) -> Option<(String, String)> {
    let value = value.strip_prefix('(')?;
    let (modes, rest) = value.split_once(')')?;
    if modes.len() != rest.len() {
        return None;
    }
    Some((modes.to_string(), rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_casemapping() {
        let mut f = Features::default();
        f.apply_token("CASEMAPPING=ascii");
        assert_eq!(f.casemapping, Casemapping::Ascii);
    }

    #[test]
    fn parses_prefix() {
        let mut f = Features::default();
        f.apply_token("PREFIX=(ohv)@%+");
        assert_eq!(f.prefix_modes, "ohv");
        assert_eq!(f.prefix_symbols, "@%+");
    }

    #[test]
    fn rejects_mismatched_prefix_halves() {
        let mut f = Features::default();
        let before = f.prefix_symbols.clone();
        f.apply_token("PREFIX=(ohv)@+");
        assert_eq!(f.prefix_symbols, before);
    }

    #[test]
    fn ignores_negation() {
        let mut f = Features::default();
        f.apply_token("-CHATHISTORY");
        assert_eq!(f.history_limit, None);
    }

    #[test]
    fn parses_linelen_and_chathistory() {
        let mut f = Features::default();
        f.apply_token("LINELEN=1024");
        f.apply_token("CHATHISTORY=100");
        assert_eq!(f.linelen, 1024);
        assert_eq!(f.history_limit, Some(100));
    }

    #[test]
    fn is_channel_name_uses_chantypes() {
        let f = Features::default();
        assert!(f.is_channel_name("#x"));
        assert!(!f.is_channel_name("alice"));
    }
}
