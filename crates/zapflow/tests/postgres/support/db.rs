use anyhow::Result;
use serde_json::Value;
use sqlx::PgPool;
use zapflow::{RunId, ZapId};

// =============================================================================
// Test setup helpers
// =============================================================================

/// Insert a zap owned by `user_id` with steps at positions 0, 1, ...
pub async fn seed_zap(
    pool: &PgPool,
    zap_id: &str,
    user_id: &str,
    active: bool,
    steps: &[(&str, Value)],
) -> Result<ZapId> {
    sqlx::query("INSERT INTO zapflow.zaps (id, user_id, active) VALUES ($1, $2, $3)")
        .bind(zap_id)
        .bind(user_id)
        .bind(active)
        .execute(pool)
        .await?;

    for (position, (kind, parameters)) in steps.iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO zapflow.steps (zap_id, position, action_kind, parameters)
               VALUES ($1, $2, $3, $4::json)"#,
        )
        .bind(zap_id)
        .bind(position as i32)
        .bind(*kind)
        .bind(serde_json::to_string(parameters)?)
        .execute(pool)
        .await?;
    }

    Ok(ZapId::new(zap_id))
}

/// Make every marker insert fail, as if the process died mid-transaction.
pub async fn reject_marker_inserts(pool: &PgPool) -> Result<()> {
    sqlx::query("ALTER TABLE zapflow.run_outbox ADD CONSTRAINT reject_all CHECK (false) NOT VALID")
        .execute(pool)
        .await?;
    Ok(())
}

// =============================================================================
// Queries
// =============================================================================

pub async fn count_runs(pool: &PgPool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM zapflow.runs")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn count_markers(pool: &PgPool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM zapflow.run_outbox")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Stage log payloads for one run, in append order.
pub async fn fetch_stage_messages(pool: &PgPool, run_id: RunId) -> Result<Vec<Value>> {
    let payloads = sqlx::query_scalar::<_, Value>(
        r#"SELECT payload FROM zapflow.stage_log
           WHERE run_id = $1
           ORDER BY "offset""#,
    )
    .bind(*run_id.as_uuid())
    .fetch_all(pool)
    .await?;
    Ok(payloads)
}

pub async fn fetch_next_offset(pool: &PgPool, group: &str, partition: u32) -> Result<Option<i64>> {
    let offset = sqlx::query_scalar::<_, i64>(
        "SELECT next_offset FROM zapflow.consumer_offsets WHERE group_id = $1 AND partition = $2",
    )
    .bind(group)
    .bind(partition as i32)
    .fetch_optional(pool)
    .await?;
    Ok(offset)
}
