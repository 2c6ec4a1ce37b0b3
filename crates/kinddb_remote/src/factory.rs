//! Default adapter construction.

use crate::adapter::RemoteAdapter;
use crate::config::RemoteConfig;
use crate::http::{HttpClient, HttpService};
use crate::memory::InMemoryService;
use kinddb_core::{context, namespace, Adapter, Config, CoreError, CoreResult};
use std::sync::{Arc, OnceLock};
use tracing::info;

static EMULATOR: OnceLock<Arc<InMemoryService>> = OnceLock::new();

/// Returns the process-wide emulator used when no endpoint is configured.
pub fn shared_emulator() -> Arc<InMemoryService> {
    Arc::clone(EMULATOR.get_or_init(|| Arc::new(InMemoryService::new())))
}

/// Builds a remote adapter and installs its default namespace.
///
/// # Errors
///
/// Returns `InvalidArgument` if an endpoint is configured but no HTTP
/// client is given.
pub fn build_adapter(
    config: &RemoteConfig,
    client: Option<Arc<dyn HttpClient>>,
) -> CoreResult<Arc<dyn Adapter>> {
    let adapter: Arc<dyn Adapter> = match (&config.endpoint, client) {
        (None, _) => {
            info!(project = %config.project, "using in-process emulator");
            Arc::new(RemoteAdapter::new(shared_emulator(), config.project.clone()))
        }
        (Some(endpoint), Some(client)) => {
            info!(project = %config.project, %endpoint, "using remote store");
            let service = HttpService::new(endpoint.clone(), config.project.clone(), client)
                .with_timeout(config.timeout);
            Arc::new(RemoteAdapter::new(service, config.project.clone()))
        }
        (Some(endpoint), None) => {
            return Err(CoreError::invalid_argument(format!(
                "endpoint {endpoint} is configured but no http client was registered"
            )))
        }
    };
    namespace::set_default_namespace(config.namespace.clone());
    Ok(adapter)
}

/// Registers a default factory that reads `KINDDB_*` variables and talks
/// to the shared emulator.
pub fn register_default_service() {
    context::set_default_factory(|| {
        let config = RemoteConfig::from(&Config::from_env()?);
        build_adapter(&config, None)
    });
}

/// Registers a default factory that reads `KINDDB_*` variables and uses
/// `client` when an endpoint is configured.
pub fn register_default_service_with_client(client: Arc<dyn HttpClient>) {
    context::set_default_factory(move || {
        let config = RemoteConfig::from(&Config::from_env()?);
        build_adapter(&config, Some(Arc::clone(&client)))
    });
}
