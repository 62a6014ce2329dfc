//! Client configuration.

use std::fmt;
use std::sync::Arc;

use pgmux_pool::PoolConfig;

use crate::error::{Error, Result};
use crate::format::{self, Formatter, Param};

/// Default health check query.
pub const DEFAULT_HEALTH_CHECK_QUERY: &str = "select true;";

/// Default capacity of event broadcast channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How statement templates are rendered before execution.
#[derive(Clone, Default)]
pub enum StatementFormat {
    /// Built-in `%s`/`%I`/`%L` escaping (see [`crate::format`]).
    #[default]
    Escape,
    /// A caller-supplied formatter.
    Custom(Formatter),
    /// No formatting: templates run as-is and passing arguments is an error.
    Disabled,
}

impl StatementFormat {
    /// Render a template with its arguments.
    pub fn render(&self, template: &str, params: &[Param<'_>]) -> Result<String> {
        match self {
            Self::Escape => format::format(template, params),
            Self::Custom(formatter) => formatter(template, params),
            Self::Disabled if params.is_empty() => Ok(template.to_string()),
            Self::Disabled => Err(Error::Format(
                "template arguments specified but no formatter has been configured".into(),
            )),
        }
    }
}

impl fmt::Debug for StatementFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Escape => f.write_str("Escape"),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
            Self::Disabled => f.write_str("Disabled"),
        }
    }
}

/// Configuration for connecting to the backend.
///
/// Covers the server address and credentials, pool sizing, and statement
/// formatting. Start from [`Config::new`] or parse a libpq-style string
/// with [`Config::from_connection_string`].
#[derive(Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server hostname, IP address or Unix socket directory.
    pub host: String,

    /// Server port (default: 5432).
    pub port: u16,

    /// User name.
    pub user: Option<String>,

    /// Password.
    pub password: Option<String>,

    /// Database name.
    pub database: Option<String>,

    /// Application name reported to the server.
    pub application_name: String,

    /// Pool configuration.
    pub pool: PoolConfig,

    /// Statement formatting mode.
    pub format: StatementFormat,

    /// Query used to probe idle connections when checkout validation is on.
    pub health_check_query: Arc<str>,

    /// Capacity of the client and per-connection event channels.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
            database: None,
            application_name: "pgmux".to_string(),
            pool: PoolConfig::default(),
            format: StatementFormat::default(),
            health_check_query: Arc::from(DEFAULT_HEALTH_CHECK_QUERY),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a libpq-style `key=value` connection string.
    ///
    /// Pairs are separated by whitespace or `;`. Values may be single-quoted,
    /// with `\'` and `\\` escapes:
    ///
    /// ```text
    /// host=localhost port=5432 user=app password='s3cret pass' dbname=app
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in parse_pairs(conn_str)? {
            match key.to_lowercase().as_str() {
                "host" | "server" => config.host = value,
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid port: {value}")))?;
                }
                "user" | "username" => config.user = Some(value),
                "password" => config.password = Some(value),
                "dbname" | "database" => config.database = Some(value),
                "application_name" => config.application_name = value,
                "pool_max" | "max_connections" => {
                    let max = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid pool size: {value}")))?;
                    config.pool = config.pool.max_connections(max);
                }
                "validate" => {
                    let enabled = parse_bool(&value)
                        .ok_or_else(|| Error::Config(format!("invalid boolean: {value}")))?;
                    config.pool = config.pool.test_on_checkout(enabled);
                }
                _ => {
                    tracing::debug!(key = %key, "ignoring unknown connection string key");
                }
            }
        }

        Ok(config)
    }

    /// Name identifying this client's pool in logs.
    ///
    /// The configured pool name if set, otherwise `user@database`. The
    /// database falls back to the user name, as the server does.
    #[must_use]
    pub fn pool_name(&self) -> String {
        if let Some(name) = &self.pool.name {
            return name.clone();
        }
        let user = self.user.as_deref().unwrap_or("default");
        let database = self.database.as_deref().unwrap_or(user);
        format!("{user}@{database}")
    }

    /// Render the connection parameters as a libpq-style string.
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        let mut parts = vec![
            format!("host={}", quote_value(&self.host)),
            format!("port={}", self.port),
        ];
        if let Some(user) = &self.user {
            parts.push(format!("user={}", quote_value(user)));
        }
        if let Some(password) = &self.password {
            parts.push(format!("password={}", quote_value(password)));
        }
        if let Some(database) = &self.database {
            parts.push(format!("dbname={}", quote_value(database)));
        }
        parts.push(format!(
            "application_name={}",
            quote_value(&self.application_name)
        ));
        parts.join(" ")
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the maximum number of pooled connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.pool = self.pool.max_connections(count);
        self
    }

    /// Enable or disable probing idle connections before reuse.
    #[must_use]
    pub fn validate_connections(mut self, enabled: bool) -> Self {
        self.pool = self.pool.test_on_checkout(enabled);
        self
    }

    /// Set the statement formatting mode.
    #[must_use]
    pub fn format(mut self, format: StatementFormat) -> Self {
        self.format = format;
        self
    }

    /// Use a custom statement formatter.
    #[must_use]
    pub fn formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&str, &[Param<'_>]) -> Result<String> + Send + Sync + 'static,
    {
        self.format = StatementFormat::Custom(Arc::new(formatter));
        self
    }

    /// Set the health check query.
    #[must_use]
    pub fn health_check_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.health_check_query = query.into();
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be greater than 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be greater than 0".into()));
        }
        self.pool
            .validate()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never expose the password in debug output
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .field("application_name", &self.application_name)
            .field("pool", &self.pool)
            .field("format", &self.format)
            .field("health_check_query", &self.health_check_query)
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

fn parse_pairs(conn_str: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = conn_str.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ';').is_some() {}
        if chars.peek().is_none() {
            return Ok(pairs);
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(Error::Config(format!("invalid key-value: {key}")));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some('\\') => match chars.next() {
                        Some(c) => value.push(c),
                        None => break,
                    },
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::Config(format!(
                            "unterminated quoted value for {key}"
                        )));
                    }
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != ';') {
                value.push(c);
            }
        }

        pairs.push((key, value));
    }
}

fn quote_value(value: &str) -> String {
    if !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\')
    {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
