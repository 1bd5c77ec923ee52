//! Typed boundary to the remote task store.
//!
//! # Responsibility
//! - Map task CRUD onto the hosted store, scoped to the current session.
//! - Normalize remote failures into the gateway error taxonomy.
//!
//! # Invariants
//! - No operation accepts or leaks an identity parameter; scoping always
//!   comes from the live session.

pub mod task_gateway;
