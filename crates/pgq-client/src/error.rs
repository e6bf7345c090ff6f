//! Client error types.

use std::fmt;

use pgq_pool::PoolError;
use thiserror::Error;

/// Error reported by a database driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    /// Human-readable message.
    pub message: String,
    /// SQLSTATE code, when the server reported one.
    pub code: Option<String>,
}

impl DriverError {
    /// Create a driver error without a SQLSTATE code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a SQLSTATE code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => Self::new(db.message()).with_code(db.code().code()),
            None => Self::new(err.to_string()),
        }
    }
}

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pool could not supply a connection.
    ///
    /// The message carries the most recent connection failure, if any, since
    /// a failed acquisition is often caused by one.
    #[error("{}", composite_message(.source, .last_connect_error))]
    Acquire {
        /// Underlying pool error.
        source: PoolError,
        /// Most recent connection creation failure.
        last_connect_error: Option<String>,
    },

    /// The server rejected the statement.
    #[error("{}", composite_message(.message, .last_connect_error))]
    Query {
        /// Driver error message.
        message: String,
        /// SQLSTATE code, when the server reported one.
        code: Option<String>,
        /// Most recent connection creation failure.
        last_connect_error: Option<String>,
    },

    /// Pool shutdown failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

fn composite_message(error: &impl fmt::Display, last_connect_error: &Option<String>) -> String {
    match last_connect_error {
        Some(last) => format!("{error} (last connection error: {last})"),
        None => error.to_string(),
    }
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Acquire { source, .. } => source.is_transient(),
            Self::Query { code, .. } => code
                .as_deref()
                .is_some_and(|c| c.starts_with("08") || c.starts_with("40") || c == "57P03"),
            _ => false,
        }
    }

    /// SQLSTATE code of a query error.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The connection failure that was recorded when this error occurred.
    #[must_use]
    pub fn last_connect_error(&self) -> Option<&str> {
        match self {
            Self::Acquire {
                last_connect_error, ..
            }
            | Self::Query {
                last_connect_error, ..
            } => last_connect_error.as_deref(),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
