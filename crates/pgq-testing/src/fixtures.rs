//! Test fixture utilities.

use pgq_client::{Config, ConnectionConfig, escape_single_quotes};
use thiserror::Error;

/// Environment variable naming the server host.
pub const ENV_HOST: &str = "PGQ_HOST";
/// Environment variable naming the server port.
pub const ENV_PORT: &str = "PGQ_PORT";
/// Environment variable naming the login role.
pub const ENV_USER: &str = "PGQ_USER";
/// Environment variable naming the login password.
pub const ENV_PASSWORD: &str = "PGQ_PASSWORD";
/// Environment variable naming the database.
pub const ENV_DATABASE: &str = "PGQ_DATABASE";

/// Error reading test configuration from the environment.
#[derive(Debug, Error)]
pub enum EnvConfigError {
    /// A required variable is not set.
    #[error("environment variable {0} is not set")]
    Missing(&'static str),

    /// A variable holds an unusable value.
    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Build a configuration from `PGQ_*` environment variables.
///
/// `PGQ_HOST` is required. The rest default to a stock local server:
/// port 5432, user and password `postgres`, database `postgres`.
pub fn config_from_env() -> Result<Config, EnvConfigError> {
    config_from_lookup(|name| std::env::var(name).ok())
}

fn config_from_lookup(
    lookup: impl Fn(&'static str) -> Option<String>,
) -> Result<Config, EnvConfigError> {
    let host = lookup(ENV_HOST).ok_or(EnvConfigError::Missing(ENV_HOST))?;
    let port = match lookup(ENV_PORT) {
        Some(value) => value
            .parse::<u16>()
            .map_err(|_| EnvConfigError::Invalid {
                name: ENV_PORT,
                value,
            })?,
        None => pgq_client::config::DEFAULT_PORT,
    };
    let user = lookup(ENV_USER).unwrap_or_else(|| "postgres".into());
    let password = lookup(ENV_PASSWORD).unwrap_or_else(|| "postgres".into());
    let database = lookup(ENV_DATABASE).unwrap_or_else(|| "postgres".into());

    Ok(Config::new(
        ConnectionConfig::new(host, user, password)
            .port(port)
            .database(database)
            .application_name("pgq-tests"),
    ))
}

/// Test schema fixture for setting up and tearing down test data.
///
/// Every fixture gets its own schema so concurrent test runs do not see each
/// other's tables.
#[derive(Debug, Clone)]
pub struct TestFixture {
    /// Schema name.
    pub schema: String,
    /// Tables created by this fixture, as `(name, column definitions)`.
    pub tables: Vec<(String, String)>,
}

impl TestFixture {
    /// Create a fixture for an explicitly named schema.
    #[must_use]
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            tables: Vec::new(),
        }
    }

    /// Create a fixture with a unique schema name starting with `prefix`.
    #[must_use]
    pub fn unique(prefix: &str) -> Self {
        Self::new(format!("{prefix}_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Add a table to the fixture.
    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, columns: impl Into<String>) -> Self {
        self.tables.push((name.into(), columns.into()));
        self
    }

    /// Schema-qualified name of one of the fixture's tables.
    #[must_use]
    pub fn qualified(&self, table: &str) -> String {
        format!("{}.{}", self.schema, table)
    }

    /// Statements that create the schema and its tables, in order.
    #[must_use]
    pub fn setup_sql(&self) -> Vec<String> {
        let mut statements = vec![format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema)];
        statements.extend(self.tables.iter().map(|(name, columns)| {
            format!("CREATE TABLE {} ({columns})", self.qualified(name))
        }));
        statements
    }

    /// Statement that drops the schema with everything in it.
    #[must_use]
    pub fn teardown_sql(&self) -> String {
        format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema)
    }

    /// Query returning one row when the schema exists.
    #[must_use]
    pub fn exists_sql(&self) -> String {
        format!(
            "SELECT 1 FROM pg_namespace WHERE nspname = '{}'",
            escape_single_quotes(&self.schema)
        )
    }
}
