//! Decoding of `353 RPL_NAMREPLY` trailing parameters.
//!
//! Grounded on `vinezombie`'s names-handling in `src/names.rs` (the teacher
//! keeps a `names::types` module mapping prefix characters to membership);
//! reimplemented here as a single free function per spec.md §4.1's
//! description of the codec's "names-reply decode" helper.

use super::message::Prefix;

/// One decoded entry of a names-reply: the leading power-level symbols
/// (possibly empty) plus the member's prefix.
///
/// `userhost-in-names` lets each entry carry a full `nick!user@host`
/// instead of a bare nick; [`Prefix::user`]/[`Prefix::host`] are populated
/// accordingly when present.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NamesEntry {
    pub power: String,
    pub prefix: Prefix,
}

/// Decodes a `353` trailing parameter given the server's prefix-symbol
/// alphabet (the second half of ISUPPORT `PREFIX=(modes)symbols`, e.g.
/// `"@+"`).
pub fn decode_names(trailing: &str, prefix_symbols: &str) -> Vec<NamesEntry> {
    trailing
        .split_whitespace()
        .filter_map(|word| decode_one(word, prefix_symbols))
        .collect()
}

fn decode_one(word: &str, prefix_symbols: &str) -> Option<NamesEntry> {
    let mut power_len = 0;
    for c in word.chars() {
        if prefix_symbols.contains(c) {
            power_len += c.len_utf8();
        } else {
            break;
        }
    }
    let power = word[..power_len].to_string();
    let rest = &word[power_len..];
    if rest.is_empty() {
        return None;
    }
    let prefix = if rest.contains('!') || rest.contains('@') {
        parse_userhost(rest)
    } else {
        Prefix { name: rest.to_string(), user: None, host: None }
    };
    Some(NamesEntry { power, prefix })
}

fn parse_userhost(raw: &str) -> Prefix {
    let (name_user, host) = match raw.split_once('@') {
        Some((a, b)) => (a, Some(b.to_string())),
        None => (raw, None),
    };
    let (name, user) = match name_user.split_once('!') {
        Some((a, b)) => (a, Some(b.to_string())),
        None => (name_user, None),
    };
    Prefix { name: name.to_string(), user, host }
}
