//! Integration tests for PgStore.

use serde_json::json;
use test_utils::db_test;
use uuid::Uuid;
use zapflow::store::{OutboxStore, PgStore, RunStore};
use zapflow::template;
use zapflow::{Error, IngestError, IngestService, RunId, UserId, ZapId};

use crate::support::db::{count_markers, count_runs, reject_marker_inserts, seed_zap};

db_test!(run_and_marker_are_written_together, |pool| {
    let zap_id = seed_zap(pool, "zap-1", "user-1", true, &[("sendEmail", json!({}))]).await?;
    let store = PgStore::new(pool.clone());

    let run_id = store
        .create_run_with_marker(&zap_id, json!({ "name": "Ann", "n": 1 }))
        .await?;

    let markers = store.poll_markers(10).await?;
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].run_id, run_id);

    let loaded = store.load_run_with_steps(run_id).await?;
    assert_eq!(loaded.run.zap_id, zap_id);
    assert_eq!(loaded.run.metadata, json!({ "name": "Ann", "n": 1 }));
    Ok(())
});

db_test!(failed_marker_insert_leaves_no_orphan_run, |pool| {
    let zap_id = seed_zap(pool, "zap-1", "user-1", true, &[]).await?;
    reject_marker_inserts(pool).await?;
    let store = PgStore::new(pool.clone());

    let result = store.create_run_with_marker(&zap_id, json!({})).await;

    assert!(matches!(result, Err(Error::Postgres(_))));
    assert_eq!(count_runs(pool).await?, 0);
    assert_eq!(count_markers(pool).await?, 0);
    Ok(())
});

db_test!(ingest_rejects_without_side_effects, |pool| {
    seed_zap(pool, "on", "user-1", true, &[]).await?;
    seed_zap(pool, "off", "user-1", false, &[]).await?;
    let service = IngestService::new(PgStore::new(pool.clone()));
    let user = UserId::new("user-1");

    let inactive = service.ingest(&user, &ZapId::new("off"), json!({})).await;
    assert!(matches!(inactive, Err(IngestError::Inactive(_))));

    let foreign = service
        .ingest(&UserId::new("user-2"), &ZapId::new("on"), json!({}))
        .await;
    assert!(matches!(foreign, Err(IngestError::NotFound { .. })));

    let missing = service.ingest(&user, &ZapId::new("nope"), json!({})).await;
    assert!(matches!(missing, Err(IngestError::NotFound { .. })));

    assert_eq!(count_runs(pool).await?, 0);

    service.ingest(&user, &ZapId::new("on"), json!({})).await?;
    assert_eq!(count_runs(pool).await?, 1);
    assert_eq!(count_markers(pool).await?, 1);
    Ok(())
});

db_test!(workflow_activity_follows_the_flag, |pool| {
    seed_zap(pool, "on", "user-1", true, &[]).await?;
    seed_zap(pool, "off", "user-1", false, &[]).await?;
    let store = PgStore::new(pool.clone());

    assert!(store.is_workflow_active(&ZapId::new("on")).await?);
    assert!(!store.is_workflow_active(&ZapId::new("off")).await?);
    assert!(!store.is_workflow_active(&ZapId::new("nope")).await?);

    let zap = store.find_zap(&ZapId::new("off")).await?.unwrap();
    assert_eq!(zap.user_id, UserId::new("user-1"));
    assert!(!zap.active);
    Ok(())
});

db_test!(steps_load_in_position_order, |pool| {
    let zap_id = seed_zap(
        pool,
        "zap-1",
        "user-1",
        true,
        &[
            ("sendEmail", json!({ "to": "{{email}}" })),
            ("sendTelegram", json!({ "chatId": 42 })),
            ("sendEmail", json!({ "subject": "last" })),
        ],
    )
    .await?;
    // Shuffle physical row order.
    sqlx::query("UPDATE zapflow.steps SET parameters = parameters WHERE position = 0")
        .execute(pool)
        .await?;

    let store = PgStore::new(pool.clone());
    let run_id = store.create_run_with_marker(&zap_id, json!({})).await?;
    let loaded = store.load_run_with_steps(run_id).await?;

    let positions: Vec<u32> = loaded.steps.iter().map(|s| s.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(loaded.last_position(), Some(2));
    assert_eq!(loaded.step_at(1).unwrap().action_kind, "sendTelegram");
    Ok(())
});

db_test!(object_key_order_survives_a_round_trip, |pool| {
    let zap_id = seed_zap(
        pool,
        "zap-1",
        "user-1",
        true,
        &[("sendEmail", json!({ "to": "{{user}}", "at": "x" }))],
    )
    .await?;
    let store = PgStore::new(pool.clone());

    let run_id = store
        .create_run_with_marker(&zap_id, json!({ "user": { "zz": 1, "aa": 2 } }))
        .await?;
    let loaded = store.load_run_with_steps(run_id).await?;

    let user_keys: Vec<&str> = loaded.run.metadata["user"]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(user_keys, vec!["zz", "aa"]);

    let parameters = &loaded.step_at(0).unwrap().parameters;
    let param_keys: Vec<&str> = parameters
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(param_keys, vec!["to", "at"]);

    let rendered = template::resolve(parameters, &loaded.run.metadata);
    assert_eq!(rendered["to"], json!(r#"{"zz":1,"aa":2}"#));
    Ok(())
});

db_test!(missing_run_is_not_found, |pool| {
    let zap_id = seed_zap(pool, "zap-1", "user-1", true, &[]).await?;
    let store = PgStore::new(pool.clone());

    let unknown = RunId::new();
    let err = store.load_run_with_steps(unknown).await.unwrap_err();
    assert!(matches!(err, Error::RunNotFound(id) if id == unknown));
    assert!(err.is_permanent());

    let run_id = store.create_run_with_marker(&zap_id, json!({})).await?;
    sqlx::query("DELETE FROM zapflow.zaps WHERE id = $1")
        .bind(zap_id.as_str())
        .execute(pool)
        .await?;

    let err = store.load_run_with_steps(run_id).await.unwrap_err();
    assert!(matches!(err, Error::RunNotFound(_)));
    Ok(())
});

db_test!(markers_poll_oldest_first_and_delete_exactly, |pool| {
    let zap_id = seed_zap(pool, "zap-1", "user-1", true, &[]).await?;
    let store = PgStore::new(pool.clone());

    let mut run_ids = Vec::new();
    for n in 0..5 {
        run_ids.push(store.create_run_with_marker(&zap_id, json!({ "n": n })).await?);
    }

    let batch = store.poll_markers(3).await?;
    let polled: Vec<RunId> = batch.iter().map(|m| m.run_id).collect();
    assert_eq!(polled, run_ids[..3]);

    let ids: Vec<Uuid> = batch.iter().map(|m| m.id).collect();
    assert_eq!(store.delete_markers(&ids).await?, 3);
    assert_eq!(store.delete_markers(&ids).await?, 0);

    let rest: Vec<RunId> = store.poll_markers(3).await?.iter().map(|m| m.run_id).collect();
    assert_eq!(rest, run_ids[3..]);

    // Runs outlive their markers.
    assert_eq!(count_runs(pool).await?, 5);
    Ok(())
});
