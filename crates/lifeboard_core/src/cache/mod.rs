//! Process-wide reactive query cache.
//!
//! # Responsibility
//! - Hold one result set per named query and deduplicate concurrent
//!   fetches for the same key.
//! - Expose awaited, cause-tagged invalidation.
//!
//! # Invariants
//! - At most one fetch is in flight per key at any instant.
//! - Unsubscribing the last observer never clears cached data.

pub mod query_cache;
