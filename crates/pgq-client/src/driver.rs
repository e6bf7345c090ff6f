//! Database driver abstraction.
//!
//! The executor and the connection factory only see these traits. The
//! PostgreSQL implementation lives in [`crate::postgres`]; tests plug in
//! scripted drivers instead.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ConnectionConfig;
use crate::error::DriverError;
use crate::result::QueryResult;

/// Opens database sessions.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Session type produced by this driver.
    type Connection: DriverConnection;

    /// Establish a new session.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection, DriverError>;
}

/// One open database session.
#[async_trait]
pub trait DriverConnection: Send + Sync + 'static {
    /// Server-side process id of this session.
    fn process_id(&self) -> i32;

    /// Run a statement with positional parameters.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, DriverError>;

    /// Cheap liveness probe.
    async fn ping(&mut self) -> Result<(), DriverError>;

    /// Terminate the session.
    async fn close(self) -> Result<(), DriverError>
    where
        Self: Sized;
}
