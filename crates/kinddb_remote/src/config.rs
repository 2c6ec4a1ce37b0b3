//! Configuration for the remote adapter.

use kinddb_core::Config;
use std::time::Duration;

/// Connection settings for a remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Backend endpoint, `None` for the shared in-process emulator.
    pub endpoint: Option<String>,
    /// Backend project id.
    pub project: String,
    /// Default namespace installed with the adapter.
    pub namespace: Option<String>,
    /// Bound on calls without a deadline.
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Creates a configuration for `project` against the emulator.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            project: project.into(),
            namespace: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the backend endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the default namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Sets the call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RemoteConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            project: config.project.clone(),
            namespace: config.namespace.clone(),
            timeout: config.request_timeout,
        }
    }
}
