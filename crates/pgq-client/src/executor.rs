//! Pooled query executor.
//!
//! [`PooledExecutor`] runs each statement on a connection borrowed from a
//! pool and hands the connection back on every outcome. It never blocks on
//! anything other than the pool and the driver.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pgq_pool::{Pool, PoolStatus, ResourcePool};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::{Config, EmitControl};
use crate::driver::{Driver, DriverConnection};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind, SubscriptionId};
use crate::factory::{ConnectionFactory, LastFactoryError};
use crate::postgres::PgDriver;
use crate::result::QueryResult;

/// Pool of PostgreSQL connections.
pub type PgPool = Pool<ConnectionFactory<PgDriver>>;

/// Executor backed by a [`PgPool`].
pub type PgExecutor = PooledExecutor<PgPool>;

/// Executes statements on pooled connections and publishes lifecycle events.
pub struct PooledExecutor<P> {
    pool: P,
    events: Arc<EventBus>,
    last_error: Arc<LastFactoryError>,
    emit: EmitControl,
    grace_period: Duration,
}

impl<P> PooledExecutor<P>
where
    P: ResourcePool,
    P::Resource: DriverConnection,
{
    /// Wrap an existing pool.
    ///
    /// `events` and `last_error` should be the ones given to the pool's
    /// connection factory so connection events and failures show up here.
    pub fn new(
        pool: P,
        events: Arc<EventBus>,
        last_error: Arc<LastFactoryError>,
        emit: EmitControl,
        grace_period: Duration,
    ) -> Self {
        Self {
            pool,
            events,
            last_error,
            emit,
            grace_period,
        }
    }

    /// Run one statement with positional parameters (`$1`, `$2`, ...).
    ///
    /// The connection is borrowed for the duration of the driver call and
    /// returned afterwards, whether the statement succeeded or not. If the
    /// returned future is dropped early, the pool's lease guard returns the
    /// connection instead.
    ///
    /// Events are only published for statements that succeeded.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut conn = match self.pool.acquire(None).await {
            Ok(conn) => conn,
            Err(source) => {
                return Err(Error::Acquire {
                    source,
                    last_connect_error: self.last_error.get(),
                });
            }
        };
        let process_id = conn.process_id();
        tracing::trace!(process_id, "connection acquired");

        let started = Instant::now();
        let outcome = conn.execute(sql, params).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(result) => {
                self.last_error.clear();
                self.publish_success(sql, params, &result, process_id, elapsed);
                self.release(conn, process_id);
                Ok(result)
            }
            Err(e) => {
                self.release(conn, process_id);
                tracing::debug!(process_id, error = %e, "statement failed");
                Err(Error::Query {
                    message: e.message,
                    code: e.code,
                    last_connect_error: self.last_error.get(),
                })
            }
        }
    }

    /// Shut the pool down.
    ///
    /// When connections are still being created, waits the grace period
    /// first so they can land in the pool. Then waits for every borrowed
    /// connection to come back and destroys all of them. Pool failures are
    /// returned as they are; nothing is retried.
    pub async fn close(&self) -> Result<()> {
        let pending = self.pool.pending_creations();
        if pending > 0 {
            tracing::debug!(
                pending,
                grace_ms = self.grace_period.as_millis() as u64,
                "waiting for in-flight connections before closing"
            );
            tokio::time::sleep(self.grace_period).await;
        }

        self.pool.drain().await?;
        self.pool.clear().await?;

        tracing::info!("connection pool closed");
        Ok(())
    }

    /// The underlying pool, for diagnostics.
    #[must_use]
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Register a callback for one kind of event.
    pub fn on<H>(&self, kind: EventKind, handler: H) -> SubscriptionId
    where
        H: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    /// Remove a subscription.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    /// Receive one kind of event through a channel.
    pub fn subscribe(&self, kind: EventKind) -> tokio::sync::mpsc::UnboundedReceiver<Event> {
        self.events.subscribe(kind)
    }

    /// The event registry shared with the connection factory.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Which events are published.
    #[must_use]
    pub fn emit_control(&self) -> EmitControl {
        self.emit
    }

    /// The most recent connection failure, if no query succeeded since.
    #[must_use]
    pub fn last_factory_error(&self) -> Option<String> {
        self.last_error.get()
    }

    fn publish_success(
        &self,
        sql: &str,
        params: &[Value],
        result: &QueryResult,
        process_id: i32,
        elapsed: Duration,
    ) {
        if self.emit.query && self.events.has_observers(EventKind::Query) {
            self.events.publish(&Event::Query {
                sql: sql.to_string(),
                params: params.to_vec(),
                process_id,
            });
        }
        if self.emit.results && self.events.has_observers(EventKind::Results) {
            self.events.publish(&Event::Results {
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                sql: sql.to_string(),
                params: params.to_vec(),
                data: result.rows.clone(),
                process_id,
            });
        }
    }

    fn release(&self, conn: P::Lease, process_id: i32) {
        match self.pool.release(conn) {
            Ok(()) => tracing::trace!(process_id, "connection released"),
            Err(e) => tracing::warn!(process_id, error = %e, "failed to release connection"),
        }
    }
}

impl<D: Driver> PooledExecutor<Pool<ConnectionFactory<D>>> {
    /// Build an executor over a new pool of connections from `driver`.
    ///
    /// Connections are opened lazily on first use, or in the background when
    /// the pool has a minimum size. Must be called inside a Tokio runtime.
    pub fn with_driver(config: Config, driver: D) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventBus::new());
        let last_error = Arc::new(LastFactoryError::new());
        let factory = ConnectionFactory::new(
            driver,
            config.connection.clone(),
            config.emit,
            events.clone(),
            last_error.clone(),
        );
        let pool = Pool::new(config.pool.to_pool_config(), factory)?;

        tracing::debug!(
            host = %config.connection.host,
            max = config.pool.max,
            "executor created"
        );

        Ok(Self::new(
            pool,
            events,
            last_error,
            config.emit,
            config.grace_period(),
        ))
    }

    /// Snapshot of pool occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }
}

impl PooledExecutor<PgPool> {
    /// Build an executor for a PostgreSQL server.
    pub fn connect(config: Config) -> Result<Self> {
        Self::with_driver(config, PgDriver::new())
    }
}

impl<P: fmt::Debug> fmt::Debug for PooledExecutor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledExecutor")
            .field("pool", &self.pool)
            .field("emit", &self.emit)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use crate::result::{Column, Row};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pgq_pool::PoolError;
    use serde_json::json;
    use std::ops::{Deref, DerefMut};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeConn {
        pid: i32,
        fail: bool,
    }

    #[async_trait]
    impl DriverConnection for FakeConn {
        fn process_id(&self) -> i32 {
            self.pid
        }

        async fn execute(&mut self, _sql: &str, params: &[Value]) -> std::result::Result<QueryResult, DriverError> {
            if self.fail {
                return Err(DriverError::new("syntax error at or near \"SELEC\"").with_code("42601"));
            }
            let mut row = Row::new();
            row.insert("n".into(), params.first().cloned().unwrap_or(json!(1)));
            Ok(QueryResult::with_rows(
                "SELECT",
                vec![Column::new("n", "int4", 23)],
                vec![row],
            ))
        }

        async fn ping(&mut self) -> std::result::Result<(), DriverError> {
            Ok(())
        }

        async fn close(self) -> std::result::Result<(), DriverError> {
            Ok(())
        }
    }

    struct FakeLease(FakeConn);

    impl Deref for FakeLease {
        type Target = FakeConn;
        fn deref(&self) -> &FakeConn {
            &self.0
        }
    }

    impl DerefMut for FakeLease {
        fn deref_mut(&mut self) -> &mut FakeConn {
            &mut self.0
        }
    }

    #[derive(Default)]
    struct FakePool {
        log: Mutex<Vec<(&'static str, Instant)>>,
        timeouts: Mutex<Vec<Option<Duration>>>,
        fail_acquire: AtomicBool,
        fail_execute: AtomicBool,
        fail_release: AtomicBool,
        fail_clear: AtomicBool,
        pending: AtomicU32,
    }

    impl FakePool {
        fn record(&self, step: &'static str) {
            self.log.lock().push((step, Instant::now()));
        }

        fn steps(&self) -> Vec<&'static str> {
            self.log.lock().iter().map(|(step, _)| *step).collect()
        }

        fn time_of(&self, step: &str) -> Instant {
            self.log.lock().iter().find(|(s, _)| *s == step).unwrap().1
        }
    }

    #[async_trait]
    impl ResourcePool for FakePool {
        type Resource = FakeConn;
        type Lease = FakeLease;

        async fn acquire(&self, timeout: Option<Duration>) -> pgq_pool::error::Result<FakeLease> {
            self.timeouts.lock().push(timeout);
            if self.fail_acquire.load(Ordering::SeqCst) {
                return Err(PoolError::AcquisitionTimeout(Duration::from_secs(1)));
            }
            self.record("acquire");
            Ok(FakeLease(FakeConn {
                pid: 4711,
                fail: self.fail_execute.load(Ordering::SeqCst),
            }))
        }

        fn release(&self, _lease: FakeLease) -> pgq_pool::error::Result<()> {
            self.record("release");
            if self.fail_release.load(Ordering::SeqCst) {
                return Err(PoolError::ForeignResource);
            }
            Ok(())
        }

        async fn drain(&self) -> pgq_pool::error::Result<()> {
            self.record("drain");
            Ok(())
        }

        async fn clear(&self) -> pgq_pool::error::Result<()> {
            self.record("clear");
            if self.fail_clear.load(Ordering::SeqCst) {
                return Err(PoolError::Destroy("broken pipe".into()));
            }
            Ok(())
        }

        fn pending_creations(&self) -> u32 {
            self.pending.load(Ordering::SeqCst)
        }
    }

    fn executor(emit: EmitControl) -> PooledExecutor<FakePool> {
        PooledExecutor::new(
            FakePool::default(),
            Arc::new(EventBus::new()),
            Arc::new(LastFactoryError::new()),
            emit,
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn test_query_acquires_then_releases() {
        let executor = executor(EmitControl::none());

        let result = executor.query("SELECT $1::int AS n", &[json!(5)]).await.unwrap();

        assert_eq!(result.command, "SELECT");
        assert_eq!(result.rows[0]["n"], json!(5));
        assert_eq!(executor.pool().steps(), ["acquire", "release"]);
        assert_eq!(*executor.pool().timeouts.lock(), [None]);
    }

    #[tokio::test]
    async fn test_failed_query_still_releases() {
        let executor = executor(EmitControl::none());
        executor.pool().fail_execute.store(true, Ordering::SeqCst);

        let err = executor.query("SELEC 1", &[]).await.unwrap_err();

        assert_eq!(err.to_string(), "syntax error at or near \"SELEC\"");
        assert_eq!(err.code(), Some("42601"));
        assert_eq!(executor.pool().steps(), ["acquire", "release"]);
    }

    #[tokio::test]
    async fn test_query_error_carries_connection_failure() {
        let executor = executor(EmitControl::none());
        executor.pool().fail_execute.store(true, Ordering::SeqCst);
        executor.last_error.record("could not connect to server");

        let err = executor.query("SELEC 1", &[]).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "syntax error at or near \"SELEC\" (last connection error: could not connect to server)"
        );
        assert_eq!(executor.last_factory_error().as_deref(), Some("could not connect to server"));
    }

    #[tokio::test]
    async fn test_acquire_failure_releases_nothing() {
        let executor = executor(EmitControl::all());
        executor.pool().fail_acquire.store(true, Ordering::SeqCst);
        executor.last_error.record("password authentication failed");

        let err = executor.query("SELECT 1", &[]).await.unwrap_err();

        assert!(matches!(err, Error::Acquire { .. }));
        assert_eq!(
            err.to_string(),
            "resource acquisition timeout after 1s (last connection error: password authentication failed)"
        );
        assert!(executor.pool().steps().is_empty());
    }

    #[tokio::test]
    async fn test_release_failure_is_swallowed() {
        let executor = executor(EmitControl::none());
        executor.pool().fail_release.store(true, Ordering::SeqCst);

        assert!(executor.query("SELECT 1", &[]).await.is_ok());
        assert_eq!(executor.pool().steps(), ["acquire", "release"]);
    }

    #[tokio::test]
    async fn test_release_failure_keeps_query_error() {
        let executor = executor(EmitControl::none());
        executor.pool().fail_execute.store(true, Ordering::SeqCst);
        executor.pool().fail_release.store(true, Ordering::SeqCst);

        let err = executor.query("SELEC 1", &[]).await.unwrap_err();

        assert!(matches!(err, Error::Query { .. }));
        assert_eq!(err.to_string(), "syntax error at or near \"SELEC\"");
        assert_eq!(err.code(), Some("42601"));
        assert_eq!(executor.pool().steps(), ["acquire", "release"]);
    }

    #[tokio::test]
    async fn test_success_clears_last_factory_error() {
        let executor = executor(EmitControl::none());
        executor.last_error.record("connection refused");

        executor.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(executor.last_factory_error(), None);
    }

    #[tokio::test]
    async fn test_query_event_requires_flag() {
        let executor = executor(EmitControl::none());
        let mut queries = executor.subscribe(EventKind::Query);
        let mut results = executor.subscribe(EventKind::Results);

        for _ in 0..3 {
            executor.query("SELECT 1", &[]).await.unwrap();
        }
        assert!(queries.try_recv().is_err());
        assert!(results.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_query_event_when_enabled() {
        let executor = executor(EmitControl::none().query(true));
        let mut queries = executor.subscribe(EventKind::Query);

        executor.query("SELECT $1", &[json!("a")]).await.unwrap();

        assert_eq!(
            queries.try_recv().unwrap(),
            Event::Query {
                sql: "SELECT $1".into(),
                params: vec![json!("a")],
                process_id: 4711,
            }
        );
        assert!(queries.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_results_event_carries_rows() {
        let executor = executor(EmitControl::none().results(true));
        let mut results = executor.subscribe(EventKind::Results);

        let result = executor.query("SELECT $1", &[json!(9)]).await.unwrap();

        match results.try_recv().unwrap() {
            Event::Results {
                data, process_id, ..
            } => {
                assert_eq!(data, result.rows);
                assert_eq!(process_id, 4711);
            }
            other => unreachable!("unexpected event {other:?}"),
        }
        assert!(results.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_query_emits_nothing() {
        let executor = executor(EmitControl::all());
        executor.pool().fail_execute.store(true, Ordering::SeqCst);
        let mut queries = executor.subscribe(EventKind::Query);
        let mut results = executor.subscribe(EventKind::Results);

        assert!(executor.query("SELEC 1", &[]).await.is_err());
        assert!(queries.try_recv().is_err());
        assert!(results.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_off_stops_delivery() {
        let executor = executor(EmitControl::all());
        let seen = Arc::new(AtomicU32::new(0));
        let counter = seen.clone();
        let id = executor.on(EventKind::Query, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        executor.query("SELECT 1", &[]).await.unwrap();
        assert!(executor.off(id));
        executor.query("SELECT 1", &[]).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_pending_skips_grace() {
        let executor = executor(EmitControl::none());
        let start = Instant::now();

        executor.close().await.unwrap();

        assert_eq!(executor.pool().steps(), ["drain", "clear"]);
        assert!(executor.pool().time_of("drain") - start < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_with_pending_waits_grace() {
        let executor = executor(EmitControl::none());
        executor.pool().pending.store(2, Ordering::SeqCst);
        let start = Instant::now();

        executor.close().await.unwrap();

        assert_eq!(executor.pool().steps(), ["drain", "clear"]);
        assert!(executor.pool().time_of("drain") - start >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_close_surfaces_clear_failure() {
        let executor = executor(EmitControl::none());
        executor.pool().fail_clear.store(true, Ordering::SeqCst);

        let err = executor.close().await.unwrap_err();

        assert!(matches!(err, Error::Pool(PoolError::Destroy(_))));
        assert_eq!(err.to_string(), "failed to destroy resource: broken pipe");
    }
}
