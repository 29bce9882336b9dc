//! PostgreSQL backend for the Database trait.

use std::str::FromStr;

use async_trait::async_trait;
use deadpool_postgres::{
    GenericClient, Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime,
};
use secrecy::ExposeSecret;
use tokio_postgres::NoTls;

use crate::config::DatabaseConfig;
use crate::db::{
    CreateTaskParams, Database, TagRecord, TagStore, TaskFilter, TaskRecord, TaskStore,
    UpdateTaskParams, UserRecord, UserStore, normalize_tag_names,
};
use crate::error::DatabaseError;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Columns shared by every task listing. Tags are aggregated through outer
/// joins so untagged tasks come back with an empty array.
const TASK_SELECT: &str = "SELECT t.id, t.opened, t.closed, t.author_id, t.assigned_id, t.title, t.content, \
     COALESCE(array_agg(tg.name ORDER BY tg.name) FILTER (WHERE tg.name IS NOT NULL), ARRAY[]::TEXT[]) AS tags \
     FROM tasks t";

const TASK_TAG_JOINS: &str = "LEFT JOIN task_tags tt ON tt.task_id = t.id \
     LEFT JOIN tags tg ON tg.id = tt.tag_id";

/// PostgreSQL task store.
///
/// Holds only the pool handle; it is cheap to share across tasks and safe to
/// call concurrently.
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Build the pool and verify one connection before returning.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut pg_config = tokio_postgres::Config::from_str(config.url.expose_secret())
            .map_err(|e| DatabaseError::Pool(format!("invalid connection string: {e}")))?;
        pg_config.connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.statement_timeout {
            pg_config.options(&format!("-c statement_timeout={}", timeout.as_millis()));
        }

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(config.connect_timeout))
            .create_timeout(Some(config.connect_timeout))
            .build()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        let backend = Self { pool };
        drop(backend.conn().await?);

        tracing::info!(
            url = %config.redacted_url(),
            pool_size = config.pool_size,
            "Connected to task database"
        );
        Ok(backend)
    }

    pub async fn conn(&self) -> Result<Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }

    async fn query_tasks(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<TaskRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn.query(sql, params).await?;
        Ok(rows.iter().map(row_to_task_record).collect())
    }
}

fn row_to_task_record(row: &tokio_postgres::Row) -> TaskRecord {
    TaskRecord {
        id: row.get("id"),
        opened: row.get("opened"),
        closed: row.get("closed"),
        author_id: row.get("author_id"),
        assigned_id: row.get("assigned_id"),
        title: row.get("title"),
        content: row.get("content"),
        tags: row.get("tags"),
    }
}

/// Single-statement upsert: concurrent callers racing on a new name all get
/// the same row back.
async fn upsert_tag_pg<C>(conn: &C, name: &str) -> Result<i64, DatabaseError>
where
    C: GenericClient + Sync,
{
    let row = conn
        .query_one(
            "INSERT INTO tags (name) VALUES ($1) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
             RETURNING id",
            &[&name],
        )
        .await?;
    Ok(row.get::<_, i64>(0))
}

/// Associate already-normalized tag names with a task.
async fn attach_tags_pg<C>(conn: &C, task_id: i64, names: &[String]) -> Result<(), DatabaseError>
where
    C: GenericClient + Sync,
{
    for name in names {
        let tag_id = upsert_tag_pg(conn, name).await?;
        conn.execute(
            "INSERT INTO task_tags (task_id, tag_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
            &[&task_id, &tag_id],
        )
        .await?;
    }
    Ok(())
}

async fn replace_tags_pg<C>(conn: &C, task_id: i64, names: &[String]) -> Result<(), DatabaseError>
where
    C: GenericClient + Sync,
{
    conn.execute("DELETE FROM task_tags WHERE task_id = $1", &[&task_id])
        .await?;
    attach_tags_pg(conn, task_id, names).await
}

// ==================== Database (supertrait) ====================

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn().await?;
        let client: &mut tokio_postgres::Client = &mut conn;
        let report = embedded::migrations::runner().run_async(client).await?;
        for migration in report.applied_migrations() {
            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applied migration"
            );
        }
        Ok(())
    }
}

// ==================== TaskStore ====================

#[async_trait]
impl TaskStore for PgBackend {
    async fn create_task(&self, input: &CreateTaskParams) -> Result<i64, DatabaseError> {
        let tags = normalize_tag_names(&input.tags);
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let row = tx
            .query_one(
                "INSERT INTO tasks (opened, author_id, assigned_id, title, content) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING id",
                &[
                    &input.opened,
                    &input.author_id,
                    &input.assigned_id,
                    &input.title,
                    &input.content,
                ],
            )
            .await?;
        let task_id: i64 = row.get(0);

        attach_tags_pg(&tx, task_id, &tags).await?;
        tx.commit().await?;

        tracing::debug!(task_id, author_id = input.author_id, tags = ?tags, "Created task");
        Ok(task_id)
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, DatabaseError> {
        let sql = format!(
            "{TASK_SELECT} {TASK_TAG_JOINS} \
             WHERE ($1::BIGINT IS NULL OR t.id = $1) \
               AND ($2::BIGINT IS NULL OR t.author_id = $2) \
             GROUP BY t.id \
             ORDER BY t.id"
        );
        self.query_tasks(&sql, &[&filter.task_id, &filter.author_id])
            .await
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<TaskRecord>, DatabaseError> {
        Ok(self
            .list_tasks(TaskFilter::by_id(task_id))
            .await?
            .into_iter()
            .next())
    }

    async fn list_tasks_by_tag(&self, tag: &str) -> Result<Vec<TaskRecord>, DatabaseError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Ok(Vec::new());
        }
        // The inner joins select the tasks; the outer joins still report each
        // task's full tag set.
        let sql = format!(
            "{TASK_SELECT} \
             JOIN task_tags match_tt ON match_tt.task_id = t.id \
             JOIN tags match_tg ON match_tg.id = match_tt.tag_id AND match_tg.name = $1 \
             {TASK_TAG_JOINS} \
             GROUP BY t.id \
             ORDER BY t.id"
        );
        self.query_tasks(&sql, &[&tag]).await
    }

    async fn close_task(&self, task_id: i64) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE tasks SET closed = COALESCE(closed, GREATEST(NOW(), opened)) WHERE id = $1",
                &[&task_id],
            )
            .await?;
        if updated == 0 {
            tracing::warn!(task_id, "Close requested for missing task");
            return Ok(false);
        }
        tracing::debug!(task_id, "Closed task");
        Ok(true)
    }

    async fn update_task(
        &self,
        task_id: i64,
        input: &UpdateTaskParams,
    ) -> Result<bool, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        // The UPDATE row lock also serializes the tag replacement below.
        let updated = tx
            .execute(
                "UPDATE tasks SET title = $2, content = $3, assigned_id = $4 WHERE id = $1",
                &[&task_id, &input.title, &input.content, &input.assigned_id],
            )
            .await?;
        if updated == 0 {
            tracing::warn!(task_id, "Update requested for missing task");
            return Ok(false);
        }

        if let Some(names) = &input.tags {
            replace_tags_pg(&tx, task_id, &normalize_tag_names(names)).await?;
        }
        tx.commit().await?;

        tracing::debug!(task_id, tags_replaced = input.tags.is_some(), "Updated task");
        Ok(true)
    }

    async fn delete_task(&self, task_id: i64) -> Result<bool, DatabaseError> {
        // task_tags rows are removed by ON DELETE CASCADE within this statement.
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM tasks WHERE id = $1", &[&task_id])
            .await?;
        if deleted == 0 {
            tracing::warn!(task_id, "Delete requested for missing task");
            return Ok(false);
        }
        tracing::debug!(task_id, "Deleted task");
        Ok(true)
    }
}

// ==================== TagStore ====================

#[async_trait]
impl TagStore for PgBackend {
    async fn upsert_tag(&self, name: &str) -> Result<i64, DatabaseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DatabaseError::InvalidInput(
                "tag name cannot be empty".to_string(),
            ));
        }
        let conn = self.conn().await?;
        upsert_tag_pg(&conn, name).await
    }

    async fn set_task_tags(&self, task_id: i64, names: &[String]) -> Result<bool, DatabaseError> {
        let names = normalize_tag_names(names);
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        // Lock the task so concurrent replacements on it apply one at a time.
        let locked = tx
            .query_opt("SELECT id FROM tasks WHERE id = $1 FOR UPDATE", &[&task_id])
            .await?;
        if locked.is_none() {
            tracing::warn!(task_id, "Tag replacement requested for missing task");
            return Ok(false);
        }

        replace_tags_pg(&tx, task_id, &names).await?;
        tx.commit().await?;

        tracing::debug!(task_id, tags = ?names, "Replaced task tags");
        Ok(true)
    }

    async fn list_tags(&self) -> Result<Vec<TagRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT tg.id, tg.name, COUNT(tt.task_id) AS task_count \
                 FROM tags tg \
                 LEFT JOIN task_tags tt ON tt.tag_id = tg.id \
                 GROUP BY tg.id \
                 ORDER BY tg.name",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| TagRecord {
                id: row.get("id"),
                name: row.get("name"),
                task_count: row.get("task_count"),
            })
            .collect())
    }
}

// ==================== UserStore ====================

#[async_trait]
impl UserStore for PgBackend {
    async fn create_user(&self, name: &str) -> Result<i64, DatabaseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DatabaseError::InvalidInput(
                "user name cannot be empty".to_string(),
            ));
        }
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO users (name) VALUES ($1) RETURNING id",
                &[&name],
            )
            .await?;
        let user_id: i64 = row.get(0);
        tracing::debug!(user_id, "Created user");
        Ok(user_id)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query("SELECT id, name FROM users ORDER BY id", &[])
            .await?;
        Ok(rows
            .iter()
            .map(|row| UserRecord {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }
}
