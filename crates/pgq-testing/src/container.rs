//! PostgreSQL container support via testcontainers.

use pgq_client::ConnectionConfig;
use testcontainers::Image;
use testcontainers::core::{ContainerPort, WaitFor};

/// Port PostgreSQL listens on inside the container.
pub const POSTGRES_PORT: u16 = 5432;

const READY_MESSAGE: &str = "database system is ready to accept connections";

/// PostgreSQL container image.
///
/// Uses the official `postgres` image.
#[derive(Debug, Clone)]
pub struct PostgresContainer {
    /// Superuser name.
    pub user: String,
    /// Superuser password.
    pub password: String,
    /// Database created at startup.
    pub database: String,
    /// Container tag (version).
    pub tag: String,
}

impl Default for PostgresContainer {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "postgres".to_string(),
            tag: "16-alpine".to_string(),
        }
    }
}

impl PostgresContainer {
    /// Create a new PostgreSQL container configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the superuser password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the database created at startup.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the container tag (PostgreSQL version).
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Connection parameters for a running container mapped to `host:port`.
    #[must_use]
    pub fn connection_config(&self, host: impl Into<String>, port: u16) -> ConnectionConfig {
        ConnectionConfig::new(host, &self.user, &self.password)
            .port(port)
            .database(&self.database)
    }
}

impl Image for PostgresContainer {
    fn name(&self) -> &str {
        "postgres"
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        // The init scripts start a temporary server first, so the message
        // shows up on both streams before the real server is listening.
        vec![
            WaitFor::message_on_stderr(READY_MESSAGE),
            WaitFor::message_on_stdout(READY_MESSAGE),
        ]
    }

    fn env_vars(
        &self,
    ) -> impl IntoIterator<
        Item = (
            impl Into<std::borrow::Cow<'_, str>>,
            impl Into<std::borrow::Cow<'_, str>>,
        ),
    > {
        vec![
            ("POSTGRES_USER", self.user.as_str()),
            ("POSTGRES_PASSWORD", self.password.as_str()),
            ("POSTGRES_DB", self.database.as_str()),
        ]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &[ContainerPort::Tcp(POSTGRES_PORT)]
    }
}
