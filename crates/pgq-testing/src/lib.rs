//! # pgq-testing
//!
//! Test infrastructure for pgq development.
//!
//! This crate provides utilities for testing the pooled executor, both
//! without a database and against a real PostgreSQL server.
//!
//! ## Features
//!
//! - Scripted in-memory driver with failure injection (no Docker required)
//! - PostgreSQL container image for testcontainers
//! - Environment-based configuration for live tests
//! - Schema fixtures for setting up and tearing down test data
//!
//! ## Mock Driver Example
//!
//! ```rust,ignore
//! use pgq_client::{Config, ConnectionConfig, PooledExecutor};
//! use pgq_testing::{MockDriver, MockResponse};
//!
//! #[tokio::test]
//! async fn test_with_mock_driver() {
//!     let driver = MockDriver::builder()
//!         .with_response("SELECT 1", MockResponse::scalar("one", 1))
//!         .build();
//!
//!     let config = Config::new(ConnectionConfig::new("mock", "tester", ""));
//!     let executor = PooledExecutor::with_driver(config, driver.clone()).unwrap();
//!
//!     let result = executor.query("SELECT 1", &[]).await.unwrap();
//!     assert_eq!(driver.connect_count(), 1);
//! }
//! ```
//!
//! ## Container Example
//!
//! ```rust,ignore
//! use pgq_testing::PostgresContainer;
//! use testcontainers::runners::AsyncRunner;
//!
//! #[tokio::test]
//! async fn test_with_real_server() {
//!     let image = PostgresContainer::default();
//!     let container = image.clone().start().await.unwrap();
//!     let port = container.get_host_port_ipv4(5432).await.unwrap();
//!     let config = image.connection_config("127.0.0.1", port);
//!     // Build an executor from config...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod container;
pub mod fixtures;
pub mod mock;

pub use container::PostgresContainer;
pub use fixtures::{EnvConfigError, TestFixture, config_from_env};
pub use mock::{MockConnection, MockDriver, MockDriverBuilder, MockResponse};
