//! Client configuration.

use crate::error::{CoreError, CoreResult};
use crate::query::DEFAULT_BATCH_SIZE;
use crate::transaction::DEFAULT_RETRIES;
use std::time::Duration;

/// Cache tuning for the caching adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Prefix of every cache slot name.
    pub prefix: String,
    /// How long a writer's lock marker lives if the writer dies.
    pub lock_ttl: Duration,
    /// Lifetime of values written by puts.
    pub item_ttl: Duration,
    /// Lifetime of values filled by reads after a miss.
    pub fill_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "kinddb".to_string(),
            lock_ttl: Duration::from_secs(60),
            item_ttl: Duration::from_secs(24 * 60 * 60),
            fill_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    /// Creates a cache configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the slot name prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the lock marker lifetime.
    #[must_use]
    pub const fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets the lifetime of written values.
    #[must_use]
    pub const fn item_ttl(mut self, ttl: Duration) -> Self {
        self.item_ttl = ttl;
        self
    }

    /// Sets the lifetime of read-filled values.
    #[must_use]
    pub const fn fill_ttl(mut self, ttl: Duration) -> Self {
        self.fill_ttl = ttl;
        self
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend project id.
    pub project: String,

    /// Backend endpoint, `None` for the in-process emulator.
    pub endpoint: Option<String>,

    /// Default namespace for keys and queries.
    pub namespace: Option<String>,

    /// Results per query batch.
    pub batch_size: usize,

    /// Retries after a commit conflict.
    pub retries: u32,

    /// Deadline for each adapter call.
    pub request_timeout: Duration,

    /// Cache settings.
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: "kinddb-local".to_string(),
            endpoint: None,
            namespace: None,
            batch_size: DEFAULT_BATCH_SIZE,
            retries: DEFAULT_RETRIES,
            request_timeout: Duration::from_secs(30),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads configuration from `KINDDB_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a numeric variable does not parse.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`, using the same variable
    /// names as [`Config::from_env`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let mut config = Self::default();
        if let Some(project) = lookup("KINDDB_PROJECT") {
            config.project = project;
        }
        config.endpoint = lookup("KINDDB_ENDPOINT").filter(|e| !e.is_empty());
        config.namespace = lookup("KINDDB_NAMESPACE").filter(|ns| !ns.is_empty());
        if let Some(ms) = lookup("KINDDB_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(parse("KINDDB_REQUEST_TIMEOUT_MS", &ms)?);
        }
        if let Some(size) = lookup("KINDDB_BATCH_SIZE") {
            config.batch_size = parse("KINDDB_BATCH_SIZE", &size)?;
        }
        Ok(config)
    }

    /// Sets the project id.
    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Sets the backend endpoint.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the default namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Sets the query batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the commit retry budget.
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the cache configuration.
    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> CoreResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| CoreError::invalid_argument(format!("{name}={raw:?}: {e}")))
}
