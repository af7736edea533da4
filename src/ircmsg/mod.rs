//! Component C1: the IRC message codec.
//!
//! Grounded on `vinezombie::ircmsg` (module layout: message types, tags,
//! names decoding all live together). Numeric classification lives in
//! [`crate::error::classify_numeric`] since it is shared with error
//! reporting (component C7 of spec.md §7's error taxonomy has no separate
//! module of its own).

mod message;
mod names;
mod tags;

pub use message::{Message, Prefix};
pub use names::{decode_names, NamesEntry};
pub use tags::Tags;

/// `true` if `command` is a 3-digit numeric reply.
pub fn is_numeric(command: &str) -> bool {
    command.len() == 3 && command.bytes().all(|b| b.is_ascii_digit())
}
