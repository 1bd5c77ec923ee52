//! Hosted data service boundary.
//!
//! # Responsibility
//! - Define the SPI contracts the synchronization core calls into:
//!   identity provider, task store, change feed.
//! - Keep wire-facing error shapes in one place.
//!
//! # Invariants
//! - Every SPI operation is scoped to one identity; no call accepts or
//!   returns data for a different identity than the scope it was given.

pub mod memory;
pub mod spi;
pub mod types;
