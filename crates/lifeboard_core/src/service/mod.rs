//! Feature services composing the synchronization core.
//!
//! # Responsibility
//! - Orchestrate session, gateway, cache and feed into use-case APIs.
//! - Own the translation of typed failures into user-facing notices.

pub mod notice;
pub mod task_service;
