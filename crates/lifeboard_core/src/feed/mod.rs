//! Server-pushed change feed consumption.
//!
//! # Responsibility
//! - Keep one scoped notification channel open per authenticated
//!   identity and turn its events into cache invalidations.
//!
//! # Invariants
//! - Channels for two identities never overlap; the old channel closes
//!   before a new one opens.
//! - Reconnect attempts are bounded by the backoff policy.

pub mod backoff;
pub mod subscriber;
