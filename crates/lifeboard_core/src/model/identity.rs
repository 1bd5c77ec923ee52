//! Identity and session types.
//!
//! # Responsibility
//! - Represent the authenticated principal and its credential bundle.
//! - Define the session status machine observed by the rest of the core.
//!
//! # Invariants
//! - `Anonymous` never transitions directly to `Authenticated`; a fresh
//!   authentication pass goes through `Authenticating`.
//! - `Unknown` exists only before `initialize()` settles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stable principal identifier assigned by the identity provider.
pub type IdentityId = Uuid;

/// The principal a session authenticates as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub email: String,
    pub display_name: Option<String>,
    /// Arbitrary profile attributes supplied by the provider.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Identity {
    /// Name suitable for greeting surfaces: display name, else email.
    pub fn preferred_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// Opaque token bundle issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry, unix epoch milliseconds.
    pub expires_at: i64,
}

impl Credential {
    pub fn is_expired_at(&self, now_epoch_ms: i64) -> bool {
        self.expires_at <= now_epoch_ms
    }
}

/// Authenticated actor: identity plus the credential that proves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Identity,
    pub credential: Credential,
}

/// Session status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Process started, recovery not yet begun.
    Unknown,
    /// Credential recovery or an interactive sign-in is in flight.
    Authenticating,
    Authenticated,
    Anonymous,
}

impl SessionStatus {
    /// Returns whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Unknown, Self::Authenticating)
                | (Self::Authenticating, Self::Authenticated)
                | (Self::Authenticating, Self::Anonymous)
                | (Self::Authenticated, Self::Anonymous)
                | (Self::Anonymous, Self::Authenticating)
                | (Self::Authenticated, Self::Authenticating)
        )
    }
}
