//! Task domain model.
//!
//! # Responsibility
//! - Define the canonical task record synchronized with the hosted store.
//! - Provide draft/patch shapes for the mutation protocol.
//!
//! # Invariants
//! - `id`, `created_at` and `owner` are server-assigned and immutable.
//! - `title` is never empty after validation.
//! - `tags` contains no blank entries and no duplicates.

use crate::model::identity::IdentityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable server-assigned identifier for a task.
pub type TaskId = Uuid;

/// Task lifecycle state.
///
/// `Deferred` is a valid stored state with no path from the normal status
/// cycle; it covers entries created or migrated outside this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Completed,
    Deferred,
}

impl TaskStatus {
    /// Returns the next state in the cyclic progression
    /// todo -> in-progress -> completed -> todo.
    ///
    /// Returns `None` for `Deferred`, which has no cycle successor.
    pub fn cycle_successor(self) -> Option<TaskStatus> {
        match self {
            Self::Todo => Some(Self::InProgress),
            Self::InProgress => Some(Self::Completed),
            Self::Completed => Some(Self::Todo),
            Self::Deferred => None,
        }
    }
}

/// Canonical task record as confirmed by the hosted store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Server-assigned stable id.
    pub id: TaskId,
    pub title: String,
    /// May be empty.
    pub description: String,
    pub status: TaskStatus,
    /// Normalized tag set; ordering carries no meaning.
    pub tags: BTreeSet<String>,
    /// Optional due date, unix epoch milliseconds.
    pub deadline: Option<i64>,
    /// Server-assigned creation time, unix epoch milliseconds.
    pub created_at: i64,
    /// Set exactly while `status == Completed`.
    pub completed_at: Option<i64>,
    /// Owning identity. The gateway never exposes a task owned by a
    /// different identity than the current session.
    pub owner: IdentityId,
}

/// Validation failures detectable before any remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    EmptyTitle,
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "task title must not be empty"),
        }
    }
}

impl Error for TaskValidationError {}

/// Client-side shape for creating a task.
///
/// The server assigns `id`, `created_at` and `owner`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    /// Raw tag candidates; blank entries are dropped during normalization.
    pub tags: Vec<String>,
    pub deadline: Option<i64>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Rejects drafts whose title is empty or whitespace-only.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.title.trim().is_empty() {
            return Err(TaskValidationError::EmptyTitle);
        }
        Ok(())
    }

    /// Returns the tag set with blank entries dropped and whitespace trimmed.
    pub fn normalized_tags(&self) -> BTreeSet<String> {
        normalize_tags(&self.tags)
    }
}

/// Partial update applied to an existing task.
///
/// Outer `None` leaves a field untouched. `completed_at` uses a second
/// `Option` level so an explicit clear (`Some(None)`) is distinguishable
/// from "not part of this patch" (`None`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub tags: Option<Vec<String>>,
    pub deadline: Option<Option<i64>>,
    pub completed_at: Option<Option<i64>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.tags.is_none()
            && self.deadline.is_none()
            && self.completed_at.is_none()
    }

    /// Validates fields that are present in the patch.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(TaskValidationError::EmptyTitle);
            }
        }
        Ok(())
    }
}

/// Drops blank/whitespace-only entries and collapses duplicates.
pub fn normalize_tags(raw: &[String]) -> BTreeSet<String> {
    raw.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}
