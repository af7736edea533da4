//! Outbound user intents accepted by [`Session::handle_action`][crate::client::Session::handle_action].
//!
//! Grounded on spec.md §4.2 "Outbound actions and line-length budget": one
//! variant per action named there, plus the two typing actions from §4.4
//! and the two history actions from §4.3 (kept in `Session` rather than
//! `Action` there because history is `(target, before/after, limit)` while
//! everything else is a flat command — see `Session::request_history_*`).

/// A user-originated action to be translated into outbound wire messages.
#[derive(Clone, Debug)]
pub enum Action {
    /// Send a message, possibly chunked per spec.md §4.2.
    PrivMsg { target: String, content: String },
    Join { channel: String, key: Option<String> },
    Part { channel: String, reason: Option<String> },
    ChangeTopic { channel: String, topic: String },
    ChangeMode { channel: String, mode_string: String },
    ChangeNick { nick: String },
    Quit { reason: Option<String> },
    SendRaw(String),
}
