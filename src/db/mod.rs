//! Database abstraction layer.
//!
//! Persistence is expressed as a set of sub-traits (`TaskStore`, `TagStore`,
//! `UserStore`) combined by the `Database` supertrait. The `postgres` feature
//! (default) provides `PgBackend`, built on `deadpool-postgres` +
//! `tokio-postgres` with refinery-managed migrations.
//!
//! Every store method checks a connection out of the pool for the duration of
//! one call. Multi-statement writes run inside a single transaction.

#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;

/// Create a database backend from configuration, run migrations, and return it.
///
/// Fails fast when the pool cannot hand out a working connection.
pub async fn connect_from_config(
    config: &DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    #[cfg(feature = "postgres")]
    {
        let pg = postgres::PgBackend::new(config).await?;
        pg.run_migrations().await?;
        Ok(Arc::new(pg))
    }
    #[cfg(not(feature = "postgres"))]
    {
        let _ = config;
        Err(DatabaseError::Pool(
            "No database backend available. Enable the 'postgres' feature.".to_string(),
        ))
    }
}

/// A persisted task together with its tag names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub opened: DateTime<Utc>,
    /// Set once by `close_task`; never cleared.
    pub closed: Option<DateTime<Utc>>,
    pub author_id: i64,
    pub assigned_id: Option<i64>,
    pub title: String,
    pub content: String,
    /// Sorted by name, no duplicates.
    pub tags: Vec<String>,
}

impl TaskRecord {
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct CreateTaskParams {
    pub opened: DateTime<Utc>,
    pub author_id: i64,
    pub assigned_id: Option<i64>,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

impl CreateTaskParams {
    /// Params for a task opened now with no assignee, content, or tags.
    pub fn new(author_id: i64, title: impl Into<String>) -> Self {
        Self {
            opened: Utc::now(),
            author_id,
            assigned_id: None,
            title: title.into(),
            content: String::new(),
            tags: Vec::new(),
        }
    }
}

/// Overwrites the mutable task fields.
///
/// `opened`, `closed`, and `author_id` are never touched. `tags: None` keeps
/// the current associations; `Some(names)` replaces them wholesale, so
/// `Some(vec![])` clears every tag.
#[derive(Debug, Clone)]
pub struct UpdateTaskParams {
    pub title: String,
    pub content: String,
    pub assigned_id: Option<i64>,
    pub tags: Option<Vec<String>>,
}

impl From<&TaskRecord> for UpdateTaskParams {
    fn from(task: &TaskRecord) -> Self {
        Self {
            title: task.title.clone(),
            content: task.content.clone(),
            assigned_id: task.assigned_id,
            tags: None,
        }
    }
}

/// Optional constraints for `list_tasks`. `None` leaves a field unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub task_id: Option<i64>,
    pub author_id: Option<i64>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(task_id: i64) -> Self {
        Self {
            task_id: Some(task_id),
            author_id: None,
        }
    }

    pub fn by_author(author_id: i64) -> Self {
        Self {
            task_id: None,
            author_id: Some(author_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: i64,
    pub name: String,
    /// Number of tasks currently carrying this tag. Orphaned tags report 0.
    pub task_count: i64,
}

/// An author or assignee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
}

/// Canonical tag set: trimmed, blanks dropped, sorted, deduplicated.
///
/// The sorted order also fixes the order in which tag rows get locked by
/// concurrent upserts.
pub fn normalize_tag_names(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    out.sort();
    out.dedup();
    out
}

// ==================== Sub-traits ====================

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a task and its tags atomically, returning the generated id.
    async fn create_task(&self, input: &CreateTaskParams) -> Result<i64, DatabaseError>;
    /// Tasks matching `filter`, ascending by id, each with its full tag set.
    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, DatabaseError>;
    async fn get_task(&self, task_id: i64) -> Result<Option<TaskRecord>, DatabaseError>;
    /// Tasks carrying `tag`, ascending by id. Unknown tags yield an empty list.
    async fn list_tasks_by_tag(&self, tag: &str) -> Result<Vec<TaskRecord>, DatabaseError>;
    /// Stamp `closed` with the server time unless already closed. A task
    /// opened in the future is closed at its `opened` time instead, so
    /// `closed >= opened` always holds. Returns `false` when no such task exists.
    async fn close_task(&self, task_id: i64) -> Result<bool, DatabaseError>;
    async fn update_task(
        &self,
        task_id: i64,
        input: &UpdateTaskParams,
    ) -> Result<bool, DatabaseError>;
    /// Remove a task; its association rows go with it.
    async fn delete_task(&self, task_id: i64) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait TagStore: Send + Sync {
    /// Id of the tag named `name`, inserting it on first use.
    async fn upsert_tag(&self, name: &str) -> Result<i64, DatabaseError>;
    /// Replace every association of `task_id` with `names`.
    async fn set_task_tags(&self, task_id: i64, names: &[String]) -> Result<bool, DatabaseError>;
    async fn list_tags(&self) -> Result<Vec<TagRecord>, DatabaseError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, name: &str) -> Result<i64, DatabaseError>;
    async fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError>;
}

/// Backend-agnostic database supertrait.
#[async_trait]
pub trait Database: TaskStore + TagStore + UserStore + Send + Sync {
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::{CreateTaskParams, TaskFilter, TaskRecord, UpdateTaskParams, normalize_tag_names};

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_tag_names_trims_sorts_and_dedupes() {
        assert_eq!(
            normalize_tag_names(&names(&["urgent", " backend ", "urgent", "api"])),
            names(&["api", "backend", "urgent"])
        );
    }

    #[test]
    fn normalize_tag_names_drops_blank_names() {
        assert!(normalize_tag_names(&names(&["", "   ", "\t"])).is_empty());
    }

    #[test]
    fn normalize_tag_names_is_case_sensitive() {
        assert_eq!(
            normalize_tag_names(&names(&["Urgent", "urgent"])),
            names(&["Urgent", "urgent"])
        );
    }

    #[test]
    fn task_filter_constructors() {
        assert_eq!(TaskFilter::all(), TaskFilter::default());
        assert_eq!(TaskFilter::by_id(7).task_id, Some(7));
        assert_eq!(TaskFilter::by_id(7).author_id, None);
        assert_eq!(TaskFilter::by_author(3).author_id, Some(3));
        // Zero is an ordinary value, not "unfiltered".
        assert_eq!(TaskFilter::by_id(0).task_id, Some(0));
    }

    #[test]
    fn update_params_from_record_keeps_tags_untouched() {
        let task = TaskRecord {
            id: 1,
            opened: chrono::Utc::now(),
            closed: None,
            author_id: 1,
            assigned_id: Some(2),
            title: "Complete Project".to_string(),
            content: "Finish by Friday".to_string(),
            tags: names(&["urgent"]),
        };
        let params = UpdateTaskParams::from(&task);
        assert_eq!(params.title, "Complete Project");
        assert_eq!(params.assigned_id, Some(2));
        assert!(params.tags.is_none());
        assert!(!task.is_closed());
    }

    #[test]
    fn create_params_default_to_unassigned_and_untagged() {
        let params = CreateTaskParams::new(4, "Write docs");
        assert_eq!(params.author_id, 4);
        assert_eq!(params.assigned_id, None);
        assert!(params.content.is_empty());
        assert!(params.tags.is_empty());
    }
}
