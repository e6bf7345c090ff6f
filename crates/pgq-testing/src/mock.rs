//! Scripted in-memory driver for unit testing.
//!
//! [`MockDriver`] implements [`pgq_client::Driver`] without any network
//! I/O. Statements are answered from a table of canned responses, and every
//! lifecycle hook can be made to fail on demand, so executor and pool
//! behavior can be tested without a database.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgq_testing::mock::{MockDriver, MockResponse};
//!
//! let driver = MockDriver::builder()
//!     .with_response("SELECT 1", MockResponse::scalar("?column?", 1))
//!     .build();
//!
//! let executor = PooledExecutor::with_driver(config, driver.clone())?;
//! executor.query("SELECT 1", &[]).await?;
//! assert_eq!(driver.connect_count(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgq_client::result::command_tag;
use pgq_client::{Column, ConnectionConfig, Driver, DriverConnection, DriverError, QueryResult, Row};
use serde_json::Value;

/// Canned answer to a statement.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows.
    Rows {
        /// Column definitions.
        columns: Vec<Column>,
        /// Row data.
        rows: Vec<Row>,
    },

    /// Return an affected row count (for INSERT/UPDATE/DELETE).
    RowsAffected(u64),

    /// Fail with a server error.
    Error {
        /// SQLSTATE code.
        code: String,
        /// Error message.
        message: String,
    },

    /// Compute the response from the statement and its parameters.
    Custom(Arc<dyn Fn(&str, &[Value]) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", &columns.len())
                .field("rows", &rows.len())
                .finish(),
            Self::RowsAffected(count) => f.debug_tuple("RowsAffected").field(count).finish(),
            Self::Error { code, message } => f
                .debug_struct("Error")
                .field("code", code)
                .field("message", message)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl MockResponse {
    /// A single row with a single column.
    pub fn scalar(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        let type_name = match &value {
            Value::Bool(_) => "bool",
            Value::Number(n) if n.is_i64() || n.is_u64() => "int8",
            Value::Number(_) => "float8",
            Value::String(_) => "text",
            _ => "jsonb",
        };
        let mut row = Row::new();
        row.insert(name.clone(), value);
        Self::Rows {
            columns: vec![Column::new(name, type_name, 0)],
            rows: vec![row],
        }
    }

    /// Rows with the given columns.
    #[must_use]
    pub fn rows(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self::Rows { columns, rows }
    }

    /// A statement that returns no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self::Rows {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// An affected row count.
    #[must_use]
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// A server error.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// One row holding each parameter under `$1`, `$2`, ...
    #[must_use]
    pub fn echo_params() -> Self {
        Self::Custom(Arc::new(|_: &str, params: &[Value]| {
            let columns = (1..=params.len())
                .map(|i| Column::new(format!("${i}"), "jsonb", 0))
                .collect();
            let row = params
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("${}", i + 1), v.clone()))
                .collect();
            MockResponse::Rows {
                columns,
                rows: vec![row],
            }
        }))
    }

    fn resolve(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DriverError> {
        match self {
            Self::Rows { columns, rows } => Ok(QueryResult::with_rows(
                command_tag(sql),
                columns.clone(),
                rows.clone(),
            )),
            Self::RowsAffected(count) => Ok(QueryResult::affected(command_tag(sql), *count)),
            Self::Error { code, message } => {
                Err(DriverError::new(message.clone()).with_code(code.clone()))
            }
            Self::Custom(handler) => handler(sql, params).resolve(sql, params),
        }
    }
}

struct MockState {
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    connect_delay: Duration,
    execute_delay: Duration,
    connect_failure: Mutex<Option<String>>,
    fail_ping: AtomicBool,
    fail_close: AtomicBool,
    next_pid: AtomicI32,
    connects: AtomicUsize,
    connect_attempts: AtomicUsize,
    closes: AtomicUsize,
    pings: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

/// Builder for [`MockDriver`].
pub struct MockDriverBuilder {
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    connect_delay: Duration,
    execute_delay: Duration,
    first_pid: i32,
}

impl MockDriverBuilder {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: MockResponse::empty(),
            connect_delay: Duration::ZERO,
            execute_delay: Duration::ZERO,
            first_pid: 1000,
        }
    }

    /// Add a response for a specific statement.
    #[must_use]
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(sql.into(), response);
        self
    }

    /// Set the response for statements without a specific one.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Delay every connection attempt.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Delay every statement.
    #[must_use]
    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    /// Process id given to the first connection; later ones count up.
    #[must_use]
    pub fn with_first_pid(mut self, pid: i32) -> Self {
        self.first_pid = pid;
        self
    }

    /// Build the driver.
    #[must_use]
    pub fn build(self) -> MockDriver {
        MockDriver {
            state: Arc::new(MockState {
                responses: self.responses,
                default_response: self.default_response,
                connect_delay: self.connect_delay,
                execute_delay: self.execute_delay,
                connect_failure: Mutex::new(None),
                fail_ping: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
                next_pid: AtomicI32::new(self.first_pid),
                connects: AtomicUsize::new(0),
                connect_attempts: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                pings: AtomicUsize::new(0),
                executed: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Default for MockDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory driver with scripted responses and failure injection.
///
/// Clones share state, so a test can keep one clone to steer and inspect
/// the driver while the pool owns another.
#[derive(Clone)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    /// Create a new builder for the mock driver.
    #[must_use]
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::new()
    }

    /// Make connection attempts fail with `message`, or succeed again with
    /// `None`.
    pub fn set_connect_failure(&self, message: Option<&str>) {
        *self.state.connect_failure.lock() = message.map(str::to_string);
    }

    /// Make liveness probes fail.
    pub fn set_ping_failure(&self, fail: bool) {
        self.state.fail_ping.store(fail, Ordering::SeqCst);
    }

    /// Make closing connections fail.
    pub fn set_close_failure(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Number of connections opened.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of connection attempts, failed ones included.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of connections closed successfully.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Number of liveness probes.
    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.connect_count().saturating_sub(self.close_count())
    }

    /// Statements executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().clone()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        MockDriverBuilder::new().build()
    }
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDriver")
            .field("responses", &self.state.responses.len())
            .field("connects", &self.connect_count())
            .field("closes", &self.close_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Connection = MockConnection;

    async fn connect(&self, config: &ConnectionConfig) -> Result<MockConnection, DriverError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.state.connect_delay.is_zero() {
            tokio::time::sleep(self.state.connect_delay).await;
        }

        let failure = self.state.connect_failure.lock().clone();
        if let Some(message) = failure {
            tracing::trace!(host = %config.host, "mock connection refused");
            return Err(DriverError::new(message).with_code("08001"));
        }

        let pid = self.state.next_pid.fetch_add(1, Ordering::SeqCst);
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(host = %config.host, pid, "mock connection opened");
        Ok(MockConnection {
            pid,
            state: self.state.clone(),
        })
    }
}

/// Connection produced by [`MockDriver`].
pub struct MockConnection {
    pid: i32,
    state: Arc<MockState>,
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection").field("pid", &self.pid).finish()
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    fn process_id(&self) -> i32 {
        self.pid
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, DriverError> {
        if !self.state.execute_delay.is_zero() {
            tokio::time::sleep(self.state.execute_delay).await;
        }
        self.state.executed.lock().push(sql.to_string());

        self.state
            .responses
            .get(sql)
            .unwrap_or(&self.state.default_response)
            .resolve(sql, params)
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(DriverError::new("server closed the connection unexpectedly"));
        }
        Ok(())
    }

    async fn close(self) -> Result<(), DriverError> {
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(DriverError::new("could not send terminate message: broken pipe"));
        }
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
