//! Authentication against the registry
//!
//! A [`Session`] is obtained by exchanging [`Credentials`] for a bearer
//! token. It is an explicit value handed to every call that can use it;
//! passing `None` means anonymous, public-only access.

use std::fmt;

pub mod service;

pub use service::{login, signup};

/// Email/password pair accepted by the registry's basic-auth login
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authenticated session: bearer token plus the registry's user id
///
/// Lives as long as the value holding it; there is no explicit revoke.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    access_token: String,
    user_id: String,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: user_id.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
