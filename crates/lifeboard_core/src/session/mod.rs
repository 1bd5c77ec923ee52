//! Session lifecycle: the process-wide answer to "who is signed in".
//!
//! # Responsibility
//! - Own all mutation of the live session (`SessionStore`).
//! - Persist and recover the credential bundle across restarts
//!   (`CredentialVault`).
//!
//! # Invariants
//! - Exactly one live session per process; every other component only
//!   reads it.
//! - The persisted bundle is loaded exactly once per process start.

pub mod store;
pub mod vault;
