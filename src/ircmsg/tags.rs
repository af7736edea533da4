//! IRCv3 message tags.
//!
//! Backed by a small ordered `Vec<(String, String)>` rather than a hash
//! map: tag containers are small per message, and insertion order is part
//! of the data model, not an implementation detail to discard.

use crate::string::escape::{escape, unescape};

/// An ordered mapping of tag keys to escape-decoded values.
///
/// Keys are unique and compared byte-exactly (case-sensitive).
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    /// Creates an empty tag map.
    pub const fn new() -> Self {
        Tags(Vec::new())
    }

    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns how many tags are present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Looks up a tag's decoded value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Inserts or overwrites a tag, preserving its original position if the
    /// key already existed, else appending.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Iterates over `(key, decoded value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses the body of an `@key=value;key2=value2` tag section (without
    /// the leading `@`).
    ///
    /// Empty or degenerate items (`""`, `"="`, `"+"`, `"+="`) are skipped.
    /// A tag value with an invalid escape sequence is impossible by
    /// construction here since `unescape` is total; malformed tag *keys*
    /// (empty after stripping a client-prefix `+`) are simply dropped
    /// rather than erroring.
    pub fn parse(body: &str) -> Tags {
        let mut tags = Tags::new();
        for item in body.split(';') {
            if item.is_empty() || item == "=" || item == "+" || item == "+=" {
                continue;
            }
            let (key, value) = match item.split_once('=') {
                Some((k, v)) => (k, unescape(v)),
                None => (item, String::new()),
            };
            if key.is_empty() {
                continue;
            }
            tags.insert(key, value);
        }
        tags
    }

    /// Serializes to the wire form, including the leading `@` when
    /// non-empty, or an empty string when there are no tags.
    pub fn serialize(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let mut out = String::from("@");
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(k);
            if !v.is_empty() {
                out.push('=');
                out.push_str(&escape(v));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_degenerate_items() {
        let tags = Tags::parse(";=;+;+=;time=1");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("time"), Some("1"));
    }

    #[test]
    fn unescapes_values() {
        let tags = Tags::parse("msg=hello\\sworld;flag");
        assert_eq!(tags.get("msg"), Some("hello world"));
        assert_eq!(tags.get("flag"), Some(""));
    }

    #[test]
    fn preserves_insertion_order_on_serialize() {
        let mut tags = Tags::new();
        tags.insert("b", "2");
        tags.insert("a", "1");
        assert_eq!(tags.serialize(), "@b=2;a=1");
    }

    #[test]
    fn reinsert_overwrites_in_place() {
        let mut tags = Tags::new();
        tags.insert("a", "1");
        tags.insert("b", "2");
        tags.insert("a", "3");
        assert_eq!(tags.serialize(), "@a=3;b=2");
    }
}
