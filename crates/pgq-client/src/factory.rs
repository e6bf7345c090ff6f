//! Connection factory plugged into the resource pool.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgq_pool::ResourceFactory;

use crate::config::{ConnectionConfig, EmitControl};
use crate::driver::{Driver, DriverConnection};
use crate::error::DriverError;
use crate::events::{Event, EventBus};

/// Most recent connection failure seen by one executor's factory.
///
/// A failed acquisition is often caused by a failed connection attempt that
/// happened inside the pool, out of the caller's sight. Errors returned to
/// callers carry this message as context. A successful query clears it.
#[derive(Debug, Default)]
pub struct LastFactoryError {
    message: Mutex<Option<String>>,
}

impl LastFactoryError {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection failure, replacing any earlier one.
    pub fn record(&self, message: impl Into<String>) {
        *self.message.lock() = Some(message.into());
    }

    /// Forget the recorded failure.
    pub fn clear(&self) {
        self.message.lock().take();
    }

    /// The recorded failure, if any.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.message.lock().clone()
    }

    /// Whether a failure is recorded.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.message.lock().is_some()
    }
}

/// Creates, validates and destroys driver connections on behalf of a pool.
pub struct ConnectionFactory<D: Driver> {
    driver: D,
    config: ConnectionConfig,
    emit: EmitControl,
    events: Arc<EventBus>,
    last_error: Arc<LastFactoryError>,
}

impl<D: Driver> ConnectionFactory<D> {
    /// Create a factory.
    ///
    /// `events` and `last_error` are shared with the executor that owns the
    /// pool.
    pub fn new(
        driver: D,
        config: ConnectionConfig,
        emit: EmitControl,
        events: Arc<EventBus>,
        last_error: Arc<LastFactoryError>,
    ) -> Self {
        Self {
            driver,
            config,
            emit,
            events,
            last_error,
        }
    }

    /// The driver in use.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Connection parameters.
    #[must_use]
    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl<D: Driver> ResourceFactory for ConnectionFactory<D> {
    type Resource = D::Connection;
    type Error = DriverError;

    async fn create(&self) -> Result<D::Connection, DriverError> {
        match self.driver.connect(&self.config).await {
            Ok(conn) => {
                let process_id = conn.process_id();
                tracing::debug!(process_id, "connection created");
                if self.emit.connect {
                    self.events.publish(&Event::Connect { process_id });
                }
                Ok(conn)
            }
            Err(e) => {
                tracing::warn!(host = %self.config.host, error = %e, "failed to create connection");
                self.last_error.record(e.to_string());
                Err(e)
            }
        }
    }

    async fn validate(&self, conn: &mut D::Connection) -> bool {
        match conn.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(process_id = conn.process_id(), error = %e, "connection failed validation");
                false
            }
        }
    }

    async fn destroy(&self, conn: D::Connection) -> Result<(), DriverError> {
        let process_id = conn.process_id();
        conn.close().await?;
        tracing::debug!(process_id, "connection closed");
        if self.emit.disconnect {
            self.events.publish(&Event::Disconnect { process_id });
        }
        Ok(())
    }
}

impl<D: Driver + fmt::Debug> fmt::Debug for ConnectionFactory<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("driver", &self.driver)
            .field("config", &self.config)
            .field("emit", &self.emit)
            .finish_non_exhaustive()
    }
}
