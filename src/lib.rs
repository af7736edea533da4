//! An IRCv3 protocol engine for a bouncer-oriented terminal IRC client.
//!
//! This crate is the stateful core described in the system's design
//! documents: it negotiates capabilities, authenticates via SASL, tracks
//! users/channels/topics/membership, normalizes casemapping, batches
//! server-side history, paces typing notifications, and chunks outbound
//! messages to line-length budgets. It owns no socket: callers feed it
//! decoded wire lines and receive back events plus wire lines to write.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod ircmsg;
pub mod string;
pub mod typing;

pub use client::{Action, Event, Session};
pub use coordinator::Coordinator;
pub use error::{MalformedMessage, ProtocolViolation, Severity};
pub use ircmsg::Message;
