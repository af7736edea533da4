//! Small string utilities shared by the rest of the crate.
//!
//! Casemapping and tag-value escaping, implemented over owned
//! `String`/`&str` rather than zero-copy byte slices, since nothing in
//! this engine needs to avoid an allocation per parsed message.

pub mod casemap;
pub mod escape;

pub use casemap::Casemapping;
