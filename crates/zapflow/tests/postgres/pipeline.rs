//! End-to-end tests: webhook intake through to handler invocations.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use test_utils::db_test;
use tokio::sync::oneshot;
use zapflow::action::ActionKind;
use zapflow::runtime::{ExecutorConfig, Pipeline, StageExecutor};
use zapflow::{
    IngestService, PgStore, PgStream, StageConsumer, StageMessage, StagePublisher, UserId,
};

use crate::support::db::{count_markers, fetch_next_offset, fetch_stage_messages, seed_zap};
use crate::support::helpers::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, init_test_tracing, recording_actions,
    test_pipeline_config, wait_until,
};

db_test!(runs_execute_every_step_in_order, |pool| {
    init_test_tracing();

    let zap_id = seed_zap(
        pool,
        "zap-1",
        "user-1",
        true,
        &[
            ("sendEmail", json!({ "to": "{{email}}", "body": "Hi {{name}}" })),
            ("sendTelegram", json!({ "chatId": 7, "message": "{{name}} signed up" })),
            ("sendEmail", json!({ "to": "ops@example.com", "body": "{{items[0]}}" })),
        ],
    )
    .await?;

    let store = PgStore::new(pool.clone());
    let service = IngestService::new(store.clone());
    let user = UserId::new("user-1");
    let mut run_ids = Vec::new();
    for name in ["Ann", "Bob", "Cy", "Di"] {
        let payload = json!({
            "name": name,
            "email": format!("{}@example.com", name.to_lowercase()),
            "items": [format!("{name}-item")],
        });
        run_ids.push(service.ingest(&user, &zap_id, payload).await?);
    }

    let (actions, calls) = recording_actions();
    let mut config = test_pipeline_config();
    config.executor_workers = 2;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let pipeline = Pipeline::new(store, PgStream::new(pool.clone(), 3), Arc::new(actions), config);
    let handle = tokio::spawn(pipeline.run(async {
        let _ = stop_rx.await;
    }));

    wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        Ok((calls.lock().unwrap().len() >= 12).then_some(()))
    })
    .await?;

    let _ = stop_tx.send(());
    handle.await?;

    assert_eq!(count_markers(pool).await?, 0);

    let calls = calls.lock().unwrap().clone();
    let mut by_run: HashMap<String, Vec<(u32, ActionKind)>> = HashMap::new();
    for call in &calls {
        by_run
            .entry(call.run_id.clone())
            .or_default()
            .push((call.stage, call.kind));
    }
    for run_id in &run_ids {
        assert_eq!(
            by_run[&run_id.to_string()],
            vec![
                (0, ActionKind::SendEmail),
                (1, ActionKind::SendTelegram),
                (2, ActionKind::SendEmail),
            ],
            "run {run_id} executed out of order"
        );
    }

    let ann = calls
        .iter()
        .find(|c| c.run_id == run_ids[0].to_string() && c.stage == 0)
        .unwrap();
    assert_eq!(
        ann.parameters,
        json!({ "to": "ann@example.com", "body": "Hi Ann" })
    );

    // The failed telegram step still handed off stage 2.
    for run_id in &run_ids {
        let stages: Vec<i64> = fetch_stage_messages(pool, *run_id)
            .await?
            .iter()
            .filter_map(|p| p["stage"].as_i64())
            .collect();
        assert_eq!(stages, vec![0, 1, 2]);
    }
    Ok(())
});

db_test!(uncommitted_stage_is_redelivered_after_restart, |pool| {
    init_test_tracing();

    let zap_id = seed_zap(pool, "zap-1", "user-1", true, &[("sendEmail", json!({}))]).await?;
    let store = PgStore::new(pool.clone());
    let stream = PgStream::new(pool.clone(), 1);
    let run_id = IngestService::new(store.clone())
        .ingest(&UserId::new("user-1"), &zap_id, json!({}))
        .await?;

    // Stand in for the relay.
    stream.publish(&StageMessage::first(run_id)).await?;

    let (actions, calls) = recording_actions();
    let actions = Arc::new(actions);
    let executor = StageExecutor::new(
        store.clone(),
        stream.clone(),
        Arc::clone(&actions),
        ExecutorConfig::default(),
        "first",
    );

    // Process without committing, as if the worker died after the handler ran.
    let delivery = stream.fetch("zapflow-executor", 0).await?.unwrap();
    executor.process(&delivery).await?;
    assert_eq!(fetch_next_offset(pool, "zapflow-executor", 0).await?, None);

    let restarted = StageExecutor::new(store, stream, actions, ExecutorConfig::default(), "second");
    assert_eq!(restarted.poll_once().await?, 1);
    assert_eq!(restarted.poll_once().await?, 0);

    assert_eq!(calls.lock().unwrap().len(), 2);
    assert_eq!(fetch_next_offset(pool, "zapflow-executor", 0).await?, Some(1));
    Ok(())
});
