//! PostgreSQL-backed stage log.

use sqlx::PgPool;

use super::{Delivery, StageConsumer, StageMessage, StagePublisher, partition_for};
use crate::error::Result;

/// Namespace for the per-partition advisory locks taken while appending.
const APPEND_LOCK_CLASS: i32 = 0x7a66;

/// A partitioned log stored in `zapflow.stage_log`.
///
/// Offsets are dense per partition: appends to one partition serialize on
/// a transaction-scoped advisory lock, so concurrent publishers never skip or
/// reuse an offset. Consumer progress lives in `zapflow.consumer_offsets`.
///
/// Messages are never deleted by the pipeline; retention is left to
/// operators.
#[derive(Debug, Clone)]
pub struct PgStream {
    pool: PgPool,
    partitions: u32,
}

#[derive(sqlx::FromRow)]
struct LogRow {
    partition: i32,
    offset: i64,
    payload: serde_json::Value,
}

impl PgStream {
    pub fn new(pool: PgPool, partitions: u32) -> Self {
        Self {
            pool,
            partitions: partitions.max(1),
        }
    }
}

impl StagePublisher for PgStream {
    async fn publish(&self, message: &StageMessage) -> Result<()> {
        let partition = partition_for(&message.run_id, self.partitions) as i32;
        let payload = serde_json::to_value(message)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(APPEND_LOCK_CLASS)
            .bind(partition)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO zapflow.stage_log (partition, "offset", run_id, payload)
            SELECT $1, COALESCE(MAX("offset") + 1, 0), $2, $3
            FROM zapflow.stage_log
            WHERE partition = $1
            "#,
        )
        .bind(partition)
        .bind(*message.run_id.as_uuid())
        .bind(payload)
        .execute(&mut *tx)
        .await?;

        // The ack: the message is visible to consumers once this returns.
        tx.commit().await?;
        Ok(())
    }
}

impl StageConsumer for PgStream {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn fetch(&self, group: &str, partition: u32) -> Result<Option<Delivery>> {
        let row = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT l.partition, l."offset", l.payload
            FROM zapflow.stage_log l
            WHERE l.partition = $2
              AND l."offset" >= COALESCE(
                  (SELECT next_offset FROM zapflow.consumer_offsets
                   WHERE group_id = $1 AND partition = $2),
                  0)
            ORDER BY l."offset"
            LIMIT 1
            "#,
        )
        .bind(group)
        .bind(partition as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Delivery {
            partition: r.partition as u32,
            offset: r.offset,
            payload: r.payload,
        }))
    }

    async fn commit(&self, group: &str, partition: u32, next_offset: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO zapflow.consumer_offsets (group_id, partition, next_offset)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, partition)
            DO UPDATE SET next_offset = EXCLUDED.next_offset,
                          updated_at = now()
            "#,
        )
        .bind(group)
        .bind(partition as i32)
        .bind(next_offset)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
