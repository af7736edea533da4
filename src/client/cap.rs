//! CAP negotiation helpers.
//!
//! Grounded on `vinezombie::client::cap` (`SubCmd`, `ServerMsgArgs`,
//! `filter_sasl`): the multi-line `CAP * LS` accumulation and `is_last`
//! detection here mirror the teacher's `ServerMsgArgs::parse`/`combine`,
//! reimplemented over owned `Vec<String>` params instead of zero-copy
//! `Args`.

/// The capabilities this engine knows how to use, per spec.md §6.
pub const SUPPORTED: &[&str] = &[
    "account-notify",
    "account-tag",
    "away-notify",
    "batch",
    "cap-notify",
    "chghost",
    "draft/chathistory",
    "echo-message",
    "extended-join",
    "invite-notify",
    "labeled-response",
    "message-tags",
    "multi-prefix",
    "server-time",
    "sasl",
    "setname",
    "userhost-in-names",
    "soju.im/bouncer-networks",
];

/// The parsed argument list of one `CAP` server message.
pub struct CapArgs {
    pub subcmd: String,
    /// `false` while a multi-line `LS`/`LIST` reply continues (trailing `*`).
    pub is_last: bool,
    /// `(name, value)` pairs in the order advertised.
    pub caps: Vec<(String, Option<String>)>,
}

impl CapArgs {
    /// Parses `CAP <nick> <SUBCMD> [*] <caps-string>`.
    pub fn parse(params: &[String]) -> Option<CapArgs> {
        if params.len() < 2 {
            return None;
        }
        let subcmd = params[1].to_ascii_uppercase();
        let (is_last, caps_str) = if params.len() >= 4 && params[2] == "*" {
            (false, params[3].as_str())
        } else if params.len() >= 3 {
            (true, params[2].as_str())
        } else {
            (true, "")
        };
        let caps = caps_str
            .split_whitespace()
            .filter_map(|token| {
                let mut name_value = token.splitn(2, '=');
                let name = name_value.next()?.to_ascii_lowercase();
                if name.is_empty() {
                    return None;
                }
                let value = name_value.next().map(str::to_string);
                Some((name, value))
            })
            .collect();
        Some(CapArgs { subcmd, is_last, caps })
    }
}

/// Requests every cap in `caps` with its own `CAP REQ <name>` line, per
/// spec.md §4.2/§8 scenario 1 ("request every cap whose name is in the
/// statically-known SUPPORTED set one-per-line"). The teacher's
/// `vinezombie::client::cap::req` instead greedily packs many capability
/// names onto one `CAP REQ` line within a byte budget; this engine keeps
/// one capability per request since the spec's own worked example requires
/// it and registration-time cap counts are small enough that packing would
/// only save a handful of bytes.
pub fn req_lines<'a>(caps: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    caps.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiline_ls() {
        let params = vec!["alice".into(), "LS".into(), "*".into(), "batch message-tags".into()];
        let args = CapArgs::parse(&params).unwrap();
        assert!(!args.is_last);
        assert_eq!(args.caps.len(), 2);
    }

    #[test]
    fn parses_terminal_ls_with_value() {
        let params = vec!["alice".into(), "LS".into(), "sasl=PLAIN,EXTERNAL".into()];
        let args = CapArgs::parse(&params).unwrap();
        assert!(args.is_last);
        assert_eq!(args.caps[0], ("sasl".to_string(), Some("PLAIN,EXTERNAL".to_string())));
    }

    #[test]
    fn req_lines_are_one_capability_each() {
        let lines = req_lines(["batch", "message-tags", "server-time"]);
        assert_eq!(
            lines,
            vec!["batch".to_string(), "message-tags".to_string(), "server-time".to_string()]
        );
    }
}
