//! Pool configuration.

use std::time::Duration;

/// Configuration for the resource pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Minimum number of resources to keep alive.
    pub min_resources: u32,

    /// Maximum number of resources allowed, idle and lent out combined.
    pub max_resources: u32,

    /// Time to wait for a resource before timing out.
    ///
    /// `Duration::ZERO` waits without limit.
    pub acquire_timeout: Duration,

    /// Time a resource can sit idle before the maintenance task destroys it.
    ///
    /// `Duration::ZERO` disables idle reaping.
    pub idle_timeout: Duration,

    /// Interval between maintenance runs (idle reaping and minimum fill).
    pub reap_interval: Duration,

    /// Whether to validate idle resources before lending them out.
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_resources: 0,
            max_resources: 10,
            acquire_timeout: Duration::ZERO,
            idle_timeout: Duration::from_secs(30),
            reap_interval: Duration::from_secs(1),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of resources.
    #[must_use]
    pub fn min_resources(mut self, count: u32) -> Self {
        self.min_resources = count;
        self
    }

    /// Set the maximum number of resources.
    #[must_use]
    pub fn max_resources(mut self, count: u32) -> Self {
        self.max_resources = count;
        self
    }

    /// Set the acquisition timeout. `Duration::ZERO` waits forever.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the idle resource timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maintenance interval.
    #[must_use]
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Enable or disable validating resources on checkout.
    #[must_use]
    pub fn test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    /// The acquisition deadline to apply, if any.
    #[must_use]
    pub fn effective_acquire_timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        let timeout = requested.unwrap_or(self.acquire_timeout);
        (!timeout.is_zero()).then_some(timeout)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::PoolError> {
        if self.max_resources == 0 {
            return Err(crate::error::PoolError::Configuration(
                "max_resources must be greater than 0".into(),
            ));
        }
        if self.min_resources > self.max_resources {
            return Err(crate::error::PoolError::Configuration(
                "min_resources cannot be greater than max_resources".into(),
            ));
        }
        if self.reap_interval.is_zero() {
            return Err(crate::error::PoolError::Configuration(
                "reap_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_resources, 0);
        assert_eq!(config.max_resources, 10);
        assert_eq!(config.acquire_timeout, Duration::ZERO);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert!(config.test_on_borrow);
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .min_resources(5)
            .max_resources(50)
            .acquire_timeout(Duration::from_secs(60))
            .idle_timeout(Duration::from_secs(120))
            .reap_interval(Duration::from_millis(250))
            .test_on_borrow(false);

        assert_eq!(config.min_resources, 5);
        assert_eq!(config.max_resources, 50);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.reap_interval, Duration::from_millis(250));
        assert!(!config.test_on_borrow);
    }

    #[test]
    fn test_effective_acquire_timeout() {
        let config = PoolConfig::new().acquire_timeout(Duration::from_secs(1));
        assert_eq!(
            config.effective_acquire_timeout(None),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            config.effective_acquire_timeout(Some(Duration::from_millis(10))),
            Some(Duration::from_millis(10))
        );
        assert_eq!(config.effective_acquire_timeout(Some(Duration::ZERO)), None);

        let unlimited = PoolConfig::new();
        assert_eq!(unlimited.effective_acquire_timeout(None), None);
    }

    #[test]
    fn test_config_validation_success() {
        let config = PoolConfig::new().min_resources(1).max_resources(10);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_min_greater_than_max() {
        let config = PoolConfig::new().min_resources(20).max_resources(10);

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("min_resources cannot be greater than max_resources")
        );
    }

    #[test]
    fn test_config_validation_zero_max() {
        let mut config = PoolConfig::new();
        config.max_resources = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("max_resources must be greater than 0")
        );
    }

    #[test]
    fn test_config_equal_min_max() {
        let config = PoolConfig::new().min_resources(5).max_resources(5);

        assert!(config.validate().is_ok());
    }
}
