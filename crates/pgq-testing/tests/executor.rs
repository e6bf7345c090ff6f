//! Executor behavior against the real pool and the scripted mock driver.
//!
//! No database is required:
//!
//! ```bash
//! cargo test -p pgq-testing --test executor
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use pgq_client::{
    Config, ConnectionConfig, EmitControl, Error, Event, EventKind, PoolError, PoolOptions,
    PooledExecutor,
};
use pgq_pool::{Pool, ResourcePool};
use pgq_testing::{MockDriver, MockResponse};
use serde_json::json;
use tokio::time::Instant;
use tokio_test::assert_ok;

type MockExecutor = PooledExecutor<Pool<pgq_client::ConnectionFactory<MockDriver>>>;

fn config(max: u32, emit: EmitControl) -> Config {
    Config::new(ConnectionConfig::new("mock", "tester", "secret"))
        .pool(PoolOptions::new().max(max))
        .emit(emit)
}

fn executor(driver: &MockDriver, max: u32, emit: EmitControl) -> MockExecutor {
    PooledExecutor::with_driver(config(max, emit), driver.clone()).unwrap()
}

fn scripted() -> MockDriver {
    MockDriver::builder()
        .with_default_response(MockResponse::echo_params())
        .with_response("BROKEN", MockResponse::error("42601", "syntax error at or near \"BROKEN\""))
        .build()
}

// =============================================================================
// Acquire / Release Pairing
// =============================================================================

#[tokio::test]
async fn test_successful_query_returns_connection() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::none());

    let result = executor.query("SELECT $1", &[json!(7)]).await.unwrap();

    assert_eq!(result.rows[0]["$1"], json!(7));
    let status = executor.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);
    assert_eq!(driver.connect_count(), 1);
}

#[tokio::test]
async fn test_failed_query_returns_connection() {
    let driver = scripted();
    let executor = executor(&driver, 1, EmitControl::none());

    let err = executor.query("BROKEN", &[]).await.unwrap_err();
    assert_eq!(err.code(), Some("42601"));
    assert_eq!(executor.status().in_use, 0);

    // The single connection is free again, and reused.
    assert_ok!(executor.query("SELECT 1", &[]).await);
    assert_eq!(driver.connect_count(), 1);
}

#[tokio::test]
async fn test_connections_are_reused_across_queries() {
    let driver = scripted();
    let executor = executor(&driver, 4, EmitControl::none());

    for i in 0..10 {
        executor.query("SELECT $1", &[json!(i)]).await.unwrap();
    }

    assert_eq!(driver.connect_count(), 1);
    assert_eq!(driver.executed().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_query_returns_connection() {
    let driver = MockDriver::builder()
        .with_execute_delay(Duration::from_secs(10))
        .build();
    let executor = executor(&driver, 1, EmitControl::none());

    let cancelled =
        tokio::time::timeout(Duration::from_millis(100), executor.query("SELECT pg_sleep(10)", &[]))
            .await;
    assert!(cancelled.is_err());

    let status = executor.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_query_events_off_by_default() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::none());
    let mut events = Vec::new();
    for kind in [EventKind::Connect, EventKind::Query, EventKind::Results] {
        events.push(executor.subscribe(kind));
    }

    for _ in 0..5 {
        executor.query("SELECT 1", &[]).await.unwrap();
    }
    let _ = executor.query("BROKEN", &[]).await;

    for rx in &mut events {
        assert!(rx.try_recv().is_err());
    }
}

#[tokio::test]
async fn test_results_event_matches_returned_rows() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::none().query(true).results(true));
    let mut queries = executor.subscribe(EventKind::Query);
    let mut results = executor.subscribe(EventKind::Results);

    let result = executor
        .query("SELECT $1, $2", &[json!("a"), json!(2)])
        .await
        .unwrap();

    let query = queries.try_recv().unwrap();
    assert_eq!(
        query.to_json(),
        json!({"event": "query", "sql": "SELECT $1, $2", "parms": ["a", 2], "processID": 1000})
    );

    match results.try_recv().unwrap() {
        Event::Results {
            elapsed_ms,
            sql,
            params,
            data,
            process_id,
        } => {
            assert!(elapsed_ms < 1_000);
            assert_eq!(sql, "SELECT $1, $2");
            assert_eq!(params, [json!("a"), json!(2)]);
            assert_eq!(data, result.rows);
            assert_eq!(process_id, 1000);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(queries.try_recv().is_err());
    assert!(results.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_query_emits_nothing() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::all());
    let mut queries = executor.subscribe(EventKind::Query);
    let mut results = executor.subscribe(EventKind::Results);

    assert!(executor.query("BROKEN", &[]).await.is_err());

    assert!(queries.try_recv().is_err());
    assert!(results.try_recv().is_err());
}

#[tokio::test]
async fn test_connect_and_disconnect_events() {
    let driver = MockDriver::builder().with_first_pid(42).build();
    let executor = executor(&driver, 2, EmitControl::none().connect(true).disconnect(true));
    let mut connects = executor.subscribe(EventKind::Connect);
    let mut disconnects = executor.subscribe(EventKind::Disconnect);

    executor.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(connects.try_recv().unwrap(), Event::Connect { process_id: 42 });

    executor.close().await.unwrap();
    assert_eq!(disconnects.try_recv().unwrap(), Event::Disconnect { process_id: 42 });
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_invalid_connection_is_replaced() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::none().disconnect(true));
    let mut disconnects = executor.subscribe(EventKind::Disconnect);

    executor.query("SELECT 1", &[]).await.unwrap();
    driver.set_ping_failure(true);
    executor.query("SELECT 1", &[]).await.unwrap();

    assert_eq!(driver.connect_count(), 2);
    assert_eq!(disconnects.try_recv().unwrap().process_id(), 1000);
}

// =============================================================================
// Connection Failures
// =============================================================================

#[tokio::test]
async fn test_connection_failure_context_and_recovery() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::none());
    driver.set_connect_failure(Some("password authentication failed for user \"tester\""));

    let err = executor.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Acquire {
            source: PoolError::Creation(_),
            ..
        }
    ));
    assert_eq!(
        err.to_string(),
        "failed to create resource: password authentication failed for user \"tester\" \
         (last connection error: password authentication failed for user \"tester\")"
    );
    assert!(executor.last_factory_error().is_some());

    driver.set_connect_failure(None);
    executor.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(executor.last_factory_error(), None);
}

#[tokio::test]
async fn test_query_error_mentions_earlier_connection_failure() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::none());

    // One healthy idle connection, then a failed attempt to open a second.
    executor.query("SELECT 1", &[]).await.unwrap();
    driver.set_connect_failure(Some("too many connections"));
    let held = executor.pool().acquire(None).await.unwrap();
    assert!(executor.query("SELECT 1", &[]).await.is_err());
    executor.pool().release(held).unwrap();

    let err = executor.query("BROKEN", &[]).await.unwrap_err();
    assert!(err.to_string().ends_with("(last connection error: too many connections)"));
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_close_without_pending_is_immediate() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::none());
    executor.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(executor.pool().pending_creations(), 0);

    let start = Instant::now();
    executor.close().await.unwrap();

    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(driver.open_connections(), 0);
    assert!(executor.status().total == 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_with_pending_waits_grace_period() {
    let driver = MockDriver::builder()
        .with_connect_delay(Duration::from_millis(300))
        .build();
    let executor = Arc::new(executor(&driver, 2, EmitControl::none()));

    let query = tokio::spawn({
        let executor = executor.clone();
        async move { executor.query("SELECT 1", &[]).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(executor.pool().pending_creations(), 1);

    let start = Instant::now();
    executor.close().await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(query.await.unwrap().is_ok());
    assert_eq!(driver.connect_count(), 1);
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_close_surfaces_destroy_failure() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::none().disconnect(true));
    let mut disconnects = executor.subscribe(EventKind::Disconnect);
    executor.query("SELECT 1", &[]).await.unwrap();
    driver.set_close_failure(true);

    let err = executor.close().await.unwrap_err();

    assert!(matches!(err, Error::Pool(PoolError::Destroy(_))));
    assert!(disconnects.try_recv().is_err());
}

#[tokio::test]
async fn test_query_after_close_is_rejected() {
    let driver = scripted();
    let executor = executor(&driver, 2, EmitControl::none());
    executor.close().await.unwrap();

    let err = executor.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Acquire {
            source: PoolError::PoolClosed,
            ..
        }
    ));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_queries_settle_without_leaks() {
    let driver = MockDriver::builder()
        .with_execute_delay(Duration::from_millis(50))
        .with_default_response(MockResponse::echo_params())
        .build();
    let executor = Arc::new(executor(&driver, 2, EmitControl::none()));

    // Warm the pool to its maximum so the baseline is stable.
    let (a, b) = tokio::join!(
        executor.query("SELECT 1", &[]),
        executor.query("SELECT 1", &[])
    );
    assert!(a.is_ok() && b.is_ok());
    let baseline = executor.status();
    assert_eq!(baseline.available, 2);

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let executor = executor.clone();
            tokio::spawn(async move { executor.query("SELECT $1", &[json!(i)]).await })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.rows[0]["$1"], json!(i));
    }

    let status = executor.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, baseline.available);
    assert_eq!(driver.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_queries_past_acquire_timeout_reject_cleanly() {
    let driver = MockDriver::builder()
        .with_execute_delay(Duration::from_millis(600))
        .build();
    let executor = Arc::new(executor(&driver, 2, EmitControl::none()));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let executor = executor.clone();
            tokio::spawn(async move { executor.query("SELECT 1", &[]).await })
        })
        .collect();

    let mut ok = 0;
    let mut timed_out = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(Error::Acquire {
                source: PoolError::AcquisitionTimeout(_),
                ..
            }) => timed_out += 1,
            Err(other) => panic!("unexpected error {other}"),
        }
    }

    // Two run immediately, two more after 600ms; the fifth would start at
    // 1200ms, past the one second acquire timeout.
    assert_eq!(ok, 4);
    assert_eq!(timed_out, 1);
    assert_eq!(executor.status().in_use, 0);
    assert!(executor.status().total <= 2);
}
