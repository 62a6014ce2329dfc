//! Pool configuration.

use crate::error::PoolError;

/// Name used in log output when none is configured.
pub const DEFAULT_POOL_NAME: &str = "pgmux";

/// Default maximum number of pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Pool sizing and checkout behaviour.
///
/// Build with [`PoolConfig::new`] and the setters; fields may be added in
/// minor releases.
///
/// There is no acquisition timeout: a pool whose connections
/// are all in use suspends callers until capacity frees. Wrap
/// [`Pool::get`](crate::Pool::get) in `tokio::time::timeout` for a bounded wait.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Name used in log output. Unset means the owner may pick one.
    pub name: Option<String>,

    /// Maximum number of connections allowed, including stolen ones.
    pub max_connections: u32,

    /// Whether to validate reused idle connections on checkout.
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            test_on_checkout: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The configured name, or [`DEFAULT_POOL_NAME`].
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_POOL_NAME)
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Enable or disable validating idle connections on checkout.
    ///
    /// When enabled, a connection taken from the idle set is probed with
    /// [`ConnectionFactory::validate`](crate::ConnectionFactory::validate)
    /// before it is handed out. Failed probes destroy the connection and the
    /// checkout continues with another one.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
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
    fn test_defaults_skip_checkout_probe() {
        let config = PoolConfig::default();
        assert_eq!(config.name, None);
        assert_eq!(config.display_name(), DEFAULT_POOL_NAME);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(!config.test_on_checkout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_setters_chain() {
        let config = PoolConfig::new()
            .name("orders@db")
            .max_connections(5)
            .test_on_checkout(true);
        assert_eq!(
            (config.display_name(), config.max_connections, config.test_on_checkout),
            ("orders@db", 5, true)
        );
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let err = PoolConfig::new().max_connections(0).validate().unwrap_err();
        assert!(matches!(err, PoolError::Configuration(ref m) if m.contains("greater than 0")));
    }
}
