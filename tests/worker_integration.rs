//! Integration tests for a full worker (broker + pool + result writer)
//! running against the in-memory store.
//!
//! Run with: cargo test --test worker_integration

use std::sync::Arc;
use std::time::Duration;

use delayed_worker::cli::tasks;
use delayed_worker::{
    MemoryStore, Payload, Producer, ResultEnvelope, StoreKeys, TaskStatus, TaskStore, Worker,
    WorkerConfig,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn test_config(size: usize) -> WorkerConfig {
    WorkerConfig::new(size)
        .with_namespace("integration")
        .with_poll_interval(Duration::from_millis(20))
        .with_dispatch_interval(Duration::from_millis(10))
}

fn producer_for(store: &MemoryStore, keys: &StoreKeys) -> Producer<MemoryStore> {
    Producer::new(Arc::new(store.clone()), keys.clone())
}

/// Resolves once every id has a stored result.
async fn results_for(store: MemoryStore, results_key: String, ids: Vec<String>) {
    while !ids
        .iter()
        .all(|id| store.hash_value(&results_key, id).is_some())
    {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_enqueued_task_runs_and_result_is_readable() {
    let config = test_config(2);
    let keys = config.keys();
    let store = MemoryStore::new();
    let producer = producer_for(&store, &keys);

    let id = producer
        .enqueue(
            "echo",
            Payload::from_json(r#"{"x":1}"#).expect("json"),
            0.0,
            Duration::ZERO,
        )
        .await
        .expect("enqueue");

    let mut worker = Worker::new(config, store.clone());
    tasks::register_builtins(&mut worker).expect("register");

    let stats = tokio::time::timeout(
        TEST_TIMEOUT,
        worker.run_until(results_for(store.clone(), keys.results.clone(), vec![id.clone()])),
    )
    .await
    .expect("worker finished in time")
    .expect("worker ran");

    assert_eq!(stats.tasks_succeeded, 1);
    assert_eq!(
        store.hash_value(&keys.results, &id),
        Some(r#"{"status":"Success","msg":"{\"x\":1}"}"#.to_string())
    );

    let envelope = producer.result(&id).await.expect("read").expect("present");
    assert_eq!(envelope, ResultEnvelope::success(r#"{"x":1}"#));
    assert!(store.scheduled(&keys.schedule).is_empty());
    assert_eq!(store.hash_len(&keys.messages), 0);
}

#[tokio::test]
async fn test_failures_produce_fail_envelopes() {
    let config = test_config(2);
    let keys = config.keys();
    let store = MemoryStore::new();
    let producer = producer_for(&store, &keys);

    let mut worker = Worker::new(config, store.clone());
    worker
        .register_task_function("boom", |_: &Payload| Err::<(), _>("boom"))
        .expect("register");
    worker
        .register_task_function("explode", |_: &Payload| -> Result<(), String> {
            panic!("worker should survive this")
        })
        .expect("register");
    worker
        .register_task_function("ok", |_: &Payload| Ok::<_, String>("fine"))
        .expect("register");

    let mut ids = Vec::new();
    for task in ["boom", "explode", "missing", "ok"] {
        ids.push(
            producer
                .enqueue(task, Payload::null(), 0.0, Duration::ZERO)
                .await
                .expect("enqueue"),
        );
    }

    let stats = tokio::time::timeout(
        TEST_TIMEOUT,
        worker.run_until(results_for(store.clone(), keys.results.clone(), ids.clone())),
    )
    .await
    .expect("worker finished in time")
    .expect("worker ran");

    let envelope = |id: &str| {
        ResultEnvelope::decode(&store.hash_value(&keys.results, id).expect("result")).expect("decode")
    };
    assert_eq!(envelope(&ids[0]), ResultEnvelope { status: TaskStatus::Fail, msg: "boom".to_string() });
    assert_eq!(envelope(&ids[1]).msg, "task panicked: worker should survive this");
    assert_eq!(envelope(&ids[2]).msg, "unknown task type: missing");
    assert_eq!(envelope(&ids[3]), ResultEnvelope::success(r#""fine""#));

    assert_eq!(stats.tasks_failed, 3);
    assert_eq!(stats.tasks_succeeded, 1);
}

#[tokio::test]
async fn test_future_tasks_are_left_scheduled() {
    let config = test_config(1);
    let keys = config.keys();
    let store = MemoryStore::new();
    let producer = producer_for(&store, &keys);

    let later = producer
        .enqueue("echo", Payload::null(), 0.0, Duration::from_secs(3600))
        .await
        .expect("enqueue");
    let now = producer
        .enqueue("echo", Payload::null(), 0.0, Duration::ZERO)
        .await
        .expect("enqueue");

    let mut worker = Worker::new(config, store.clone());
    tasks::register_builtins(&mut worker).expect("register");

    let probe = store.clone();
    let results_key = keys.results.clone();
    tokio::time::timeout(
        TEST_TIMEOUT,
        worker.run_until(async move {
            results_for(probe, results_key, vec![now]).await;
            // A few more poll ticks.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }),
    )
    .await
    .expect("worker finished in time")
    .expect("worker ran");

    assert!(store.hash_value(&keys.results, &later).is_none());
    assert_eq!(store.scheduled(&keys.schedule), vec![later.clone()]);
    assert!(store.hash_value(&keys.messages, &later).is_some());
}

#[tokio::test]
async fn test_shutdown_finishes_every_claimed_task() {
    let config = test_config(2);
    let keys = config.keys();
    let store = MemoryStore::new();
    let producer = producer_for(&store, &keys);

    let mut ids = Vec::new();
    for i in 0..20 {
        ids.push(
            producer
                .enqueue(
                    "sleep",
                    Payload::from_json(r#"{"ms":10}"#).expect("json"),
                    f64::from(i % 4),
                    Duration::ZERO,
                )
                .await
                .expect("enqueue"),
        );
    }

    let mut worker = Worker::new(config, store.clone());
    tasks::register_builtins(&mut worker).expect("register");

    // Ask for shutdown as soon as the first result lands.
    let probe = store.clone();
    let results_key = keys.results.clone();
    let stats = tokio::time::timeout(
        TEST_TIMEOUT,
        worker.run_until(async move {
            while probe.hash_len(&results_key) == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }),
    )
    .await
    .expect("worker finished in time")
    .expect("worker ran");

    assert_eq!(stats.tasks_succeeded, 20);
    for id in &ids {
        assert_eq!(
            store.hash_value(&keys.results, id),
            Some(r#"{"status":"Success","msg":"{\"slept_ms\":10}"}"#.to_string()),
            "missing result for {}",
            id
        );
    }
}

#[tokio::test]
async fn test_unparsable_message_is_discarded() {
    let config = test_config(1);
    let keys = config.keys();
    let store = MemoryStore::new();
    store
        .put_message(&keys.messages, "garbage", "not json at all")
        .await
        .expect("hset");
    store
        .add_to_schedule(&keys.schedule, "garbage", 0)
        .await
        .expect("zadd");

    let mut worker = Worker::new(config, store.clone());
    tasks::register_builtins(&mut worker).expect("register");

    let probe = store.clone();
    let messages_key = keys.messages.clone();
    let stats = tokio::time::timeout(
        TEST_TIMEOUT,
        worker.run_until(async move {
            while probe.hash_value(&messages_key, "garbage").is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }),
    )
    .await
    .expect("worker finished in time")
    .expect("worker ran");

    assert_eq!(stats.total_processed(), 0);
    assert_eq!(store.hash_len(&keys.results), 0);
    assert!(store.scheduled(&keys.schedule).is_empty());
}

#[tokio::test]
async fn test_store_outage_is_retried_on_next_tick() {
    let config = test_config(1);
    let keys = config.keys();
    let store = MemoryStore::new();
    let producer = producer_for(&store, &keys);
    let id = producer
        .enqueue("echo", Payload::from_json("[1]").expect("json"), 0.0, Duration::ZERO)
        .await
        .expect("enqueue");
    store.fail_next_due_queries(3);

    let mut worker = Worker::new(config, store.clone());
    tasks::register_builtins(&mut worker).expect("register");

    tokio::time::timeout(
        TEST_TIMEOUT,
        worker.run_until(results_for(store.clone(), keys.results.clone(), vec![id.clone()])),
    )
    .await
    .expect("worker finished in time")
    .expect("worker ran");

    assert_eq!(
        producer.result(&id).await.expect("read"),
        Some(ResultEnvelope::success("[1]"))
    );
}
