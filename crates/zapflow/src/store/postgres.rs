//! PostgreSQL store implementation.

use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::outbox::{OutboxMarker, OutboxStore};
use super::RunStore;
use crate::error::{Error, Result};
use crate::model::{Run, RunId, RunWithSteps, Step, UserId, Zap, ZapId};

/// PostgreSQL-backed store for production use.
///
/// # Database Schema
///
/// Requires tables in the `zapflow` schema (see `migrations/`):
///
/// | Table        | Purpose                                              |
/// |--------------|------------------------------------------------------|
/// | `zaps`       | Workflows, written by the CRUD layer                 |
/// | `steps`      | Ordered actions of each zap                          |
/// | `runs`       | One row per accepted trigger, immutable              |
/// | `run_outbox` | Markers for runs whose first stage is unpublished    |
///
/// # Example
///
/// ```ignore
/// use zapflow::PgStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://...").await?;
/// let store = PgStore::new(pool);
/// let run_id = store.create_run_with_marker(&zap_id, payload).await?;
/// ```
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ZapRow {
    id: String,
    user_id: String,
    active: bool,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    zap_id: String,
    metadata: Value,
    created_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct StepRow {
    position: i32,
    action_kind: String,
    parameters: Value,
}

#[derive(sqlx::FromRow)]
struct MarkerRow {
    id: Uuid,
    run_id: Uuid,
    created_at: OffsetDateTime,
}

impl PgStore {
    /// Create a new PostgreSQL store from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl RunStore for PgStore {
    async fn find_zap(&self, zap_id: &ZapId) -> Result<Option<Zap>> {
        let row = sqlx::query_as::<_, ZapRow>(
            r#"SELECT id, user_id, active FROM zapflow.zaps WHERE id = $1"#,
        )
        .bind(zap_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Zap {
            id: ZapId::from(r.id),
            user_id: UserId::from(r.user_id),
            active: r.active,
        }))
    }

    async fn is_workflow_active(&self, zap_id: &ZapId) -> Result<bool> {
        let active = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM zapflow.zaps WHERE id = $1 AND active)"#,
        )
        .bind(zap_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(active)
    }

    async fn create_run_with_marker(&self, zap_id: &ZapId, metadata: Value) -> Result<RunId> {
        let run_id = RunId::new();
        let mut tx = self.pool.begin().await?;

        // Bound as text: a `Value` would be encoded as JSONB and lose key order.
        let metadata = serde_json::to_string(&metadata)?;
        sqlx::query(r#"INSERT INTO zapflow.runs (id, zap_id, metadata) VALUES ($1, $2, $3::json)"#)
            .bind(*run_id.as_uuid())
            .bind(zap_id.as_str())
            .bind(metadata)
            .execute(&mut *tx)
            .await?;

        sqlx::query(r#"INSERT INTO zapflow.run_outbox (id, run_id) VALUES ($1, $2)"#)
            .bind(Uuid::now_v7())
            .bind(*run_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        // Dropping an uncommitted transaction rolls back the run insert.
        tx.commit().await?;
        Ok(run_id)
    }

    async fn load_run_with_steps(&self, run_id: RunId) -> Result<RunWithSteps> {
        let run = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT r.id, r.zap_id, r.metadata, r.created_at
            FROM zapflow.runs r
            JOIN zapflow.zaps z ON z.id = r.zap_id
            WHERE r.id = $1
            "#,
        )
        .bind(*run_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::RunNotFound(run_id))?;

        let steps = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT position, action_kind, parameters
            FROM zapflow.steps
            WHERE zap_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(&run.zap_id)
        .fetch_all(&self.pool)
        .await?;

        let run = Run {
            id: RunId::from(run.id),
            zap_id: ZapId::from(run.zap_id),
            metadata: run.metadata,
            created_at: run.created_at,
        };
        let steps = steps
            .into_iter()
            .map(|s| Step {
                position: s.position as u32,
                action_kind: s.action_kind,
                parameters: s.parameters,
            })
            .collect();

        Ok(RunWithSteps::new(run, steps))
    }
}

impl OutboxStore for PgStore {
    async fn poll_markers(&self, limit: u32) -> Result<Vec<OutboxMarker>> {
        let rows = sqlx::query_as::<_, MarkerRow>(
            r#"
            SELECT id, run_id, created_at
            FROM zapflow.run_outbox
            ORDER BY created_at, id
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| OutboxMarker {
                id: r.id,
                run_id: RunId::from(r.run_id),
                created_at: r.created_at,
            })
            .collect())
    }

    async fn delete_markers(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(r#"DELETE FROM zapflow.run_outbox WHERE id = ANY($1)"#)
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
