//! Integration tests for PgStream.

use std::collections::BTreeSet;

use serde_json::json;
use test_utils::db_test;
use zapflow::stream::{PgStream, StageConsumer, StageMessage, StagePublisher, partition_for};
use zapflow::{Error, RunId};

use crate::support::db::{fetch_next_offset, fetch_stage_messages};

const GROUP: &str = "test-group";

db_test!(messages_are_redelivered_until_committed, |pool| {
    let stream = PgStream::new(pool.clone(), 3);
    let run_id = RunId::new();
    let partition = partition_for(&run_id, 3);

    stream.publish(&StageMessage::first(run_id)).await?;
    stream.publish(&StageMessage::first(run_id).next()).await?;

    let first = stream.fetch(GROUP, partition).await?.unwrap();
    assert_eq!(first.offset, 0);
    assert_eq!(first.decode()?, StageMessage::first(run_id));

    let again = stream.fetch(GROUP, partition).await?.unwrap();
    assert_eq!(again.offset, 0);

    stream.commit(GROUP, partition, 1).await?;
    let second = stream.fetch(GROUP, partition).await?.unwrap();
    assert_eq!(second.offset, 1);
    assert_eq!(second.decode()?.stage, 1);

    stream.commit(GROUP, partition, 2).await?;
    assert!(stream.fetch(GROUP, partition).await?.is_none());
    assert_eq!(fetch_next_offset(pool, GROUP, partition).await?, Some(2));
    Ok(())
});

db_test!(consumer_groups_track_offsets_independently, |pool| {
    let stream = PgStream::new(pool.clone(), 1);
    let run_id = RunId::new();
    stream.publish(&StageMessage::first(run_id)).await?;

    stream.commit("a", 0, 1).await?;

    assert!(stream.fetch("a", 0).await?.is_none());
    assert_eq!(stream.fetch("b", 0).await?.unwrap().offset, 0);
    Ok(())
});

db_test!(stages_of_a_run_share_a_partition, |pool| {
    let stream = PgStream::new(pool.clone(), 4);
    let run_id = RunId::new();

    let mut message = StageMessage::first(run_id);
    for _ in 0..3 {
        stream.publish(&message).await?;
        message = message.next();
    }

    let payloads = fetch_stage_messages(pool, run_id).await?;
    assert_eq!(
        payloads,
        vec![
            json!({ "runId": run_id, "stage": 0 }),
            json!({ "runId": run_id, "stage": 1 }),
            json!({ "runId": run_id, "stage": 2 }),
        ]
    );

    let partitions: BTreeSet<i32> =
        sqlx::query_scalar::<_, i32>("SELECT DISTINCT partition FROM zapflow.stage_log")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();
    assert_eq!(partitions, BTreeSet::from([partition_for(&run_id, 4) as i32]));
    Ok(())
});

db_test!(concurrent_publishes_get_dense_offsets, |pool| {
    let stream = PgStream::new(pool.clone(), 1);
    let run_id = RunId::new();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let stream = stream.clone();
        handles.push(tokio::spawn(async move {
            stream.publish(&StageMessage::first(run_id)).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let offsets: Vec<i64> = sqlx::query_scalar::<_, i64>(
        r#"SELECT "offset" FROM zapflow.stage_log WHERE partition = 0 ORDER BY "offset""#,
    )
    .fetch_all(pool)
    .await?;
    assert_eq!(offsets, (0..20).collect::<Vec<i64>>());
    Ok(())
});

db_test!(malformed_payload_fails_to_decode, |pool| {
    sqlx::query(
        r#"INSERT INTO zapflow.stage_log (partition, "offset", run_id, payload)
           VALUES (0, 0, gen_random_uuid(), '{"stage": "zero"}')"#,
    )
    .execute(pool)
    .await?;
    let stream = PgStream::new(pool.clone(), 1);

    let delivery = stream.fetch(GROUP, 0).await?.unwrap();
    let err = delivery.decode().unwrap_err();

    assert!(matches!(
        err,
        Error::InvalidStageMessage { partition: 0, offset: 0, .. }
    ));
    Ok(())
});
