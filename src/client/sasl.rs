//! SASL authentication mechanisms.
//!
//! Grounded on `vinezombie::client::auth::sasl` (a `Sasl` trait with one
//! impl per mechanism, driven by the registration handler through
//! `AUTHENTICATE` challenge/response). Only `PLAIN` is implemented, per
//! spec.md §6 ("At least PLAIN").

use base64::Engine as _;

/// A SASL mechanism driver.
///
/// `step` is called once per `AUTHENTICATE <payload>` line received from
/// the server (with `payload` already base64-decoded, or `None` for a bare
/// `AUTHENTICATE +`); it returns the base64-encoded response to send back,
/// or `None` once the mechanism has nothing further to send.
pub trait AuthClient: Send {
    /// The mechanism name sent in `AUTHENTICATE <mechanism>`.
    fn mechanism(&self) -> &'static str;

    /// Produces the base64-encoded initial or subsequent response.
    fn step(&mut self, challenge: Option<&[u8]>) -> Option<String>;
}

/// `SASL PLAIN`: a single-step mechanism sending `authzid \0 authcid \0 password`.
pub struct Plain {
    user: String,
    password: String,
    sent: bool,
}

impl Plain {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Plain { user: user.into(), password: password.into(), sent: false }
    }
}

impl AuthClient for Plain {
    fn mechanism(&self) -> &'static str {
        "PLAIN"
    }

    fn step(&mut self, _challenge: Option<&[u8]>) -> Option<String> {
        if self.sent {
            return None;
        }
        self.sent = true;
        let mut payload = Vec::with_capacity(2 * self.user.len() + self.password.len() + 2);
        payload.extend_from_slice(self.user.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.user.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.password.as_bytes());
        Some(base64::engine::general_purpose::STANDARD.encode(payload))
    }
}
