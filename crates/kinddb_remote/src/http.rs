//! HTTP service client.
//!
//! Each RPC is a CBOR-encoded POST to
//! `{endpoint}/v1/projects/{project}:{method}`. The reply body is the
//! CBOR encoding of `Result<Response, ServiceError>`. The actual HTTP
//! client is abstracted via a trait to allow different implementations
//! (reqwest, ureq, hyper, etc.).

use crate::error::{ServiceError, ServiceResult};
use crate::messages::{
    decode, encode, AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest,
    BeginTransactionResponse, CommitRequest, CommitResponse, LookupRequest, LookupResponse,
    RollbackRequest, RunQueryRequest, RunQueryResponse,
};
use crate::service::StoreService;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    ///
    /// `timeout` bounds the whole exchange when set.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Option<Duration>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn post(&self, url: &str, body: Vec<u8>, timeout: Option<Duration>) -> Result<Vec<u8>, String> {
        (**self).post(url, body, timeout)
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

/// [`StoreService`] reached over HTTP.
pub struct HttpService<C: HttpClient> {
    endpoint: String,
    project: String,
    client: C,
    timeout: Option<Duration>,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpService<C> {
    /// Creates a service client for `project` at `endpoint`.
    pub fn new(endpoint: impl Into<String>, project: impl Into<String>, client: C) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project: project.into(),
            client,
            timeout: None,
            last_error: RwLock::new(None),
        }
    }

    /// Bounds calls that carry no deadline of their own.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the URL of an RPC method.
    pub fn url(&self, method: &str) -> String {
        format!("{}/v1/projects/{}:{method}", self.endpoint, self.project)
    }

    fn call<Req, Res>(&self, method: &str, request: &Req, deadline: Option<Instant>) -> ServiceResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        if !self.client.is_healthy() {
            return Err(ServiceError::Unavailable("http client is not healthy".into()));
        }
        let timeout = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .or(self.timeout);
        if timeout == Some(Duration::ZERO) {
            return Err(ServiceError::DeadlineExceeded);
        }

        let body = encode(request)?;
        let url = self.url(method);
        trace!(%url, bytes = body.len(), "post");
        let reply = self.client.post(&url, body, timeout).map_err(|e| {
            warn!(method, error = %e, "store request failed");
            *self.last_error.write() = Some(e.clone());
            ServiceError::transport(e)
        })?;
        *self.last_error.write() = None;

        decode::<Result<Res, ServiceError>>(&reply)?
    }
}

impl<C: HttpClient> StoreService for HttpService<C> {
    fn lookup(
        &self,
        request: &LookupRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<LookupResponse> {
        self.call("lookup", request, deadline)
    }

    fn allocate_ids(
        &self,
        request: &AllocateIdsRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<AllocateIdsResponse> {
        self.call("allocateIds", request, deadline)
    }

    fn commit(
        &self,
        request: &CommitRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<CommitResponse> {
        self.call("commit", request, deadline)
    }

    fn run_query(
        &self,
        request: &RunQueryRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<RunQueryResponse> {
        self.call("runQuery", request, deadline)
    }

    fn begin_transaction(
        &self,
        request: &BeginTransactionRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<BeginTransactionResponse> {
        self.call("beginTransaction", request, deadline)
    }

    fn rollback(&self, request: &RollbackRequest, deadline: Option<Instant>) -> ServiceResult<()> {
        self.call("rollback", request, deadline)
    }
}

impl<C: HttpClient> std::fmt::Debug for HttpService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpService")
            .field("endpoint", &self.endpoint)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Option<Duration>) -> Result<Vec<u8>, String> {
        let path = url.find("/v1/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Serves HTTP requests from any [`StoreService`].
#[derive(Debug)]
pub struct ServiceDispatcher<S> {
    service: S,
}

impl<S: StoreService> ServiceDispatcher<S> {
    /// Wraps a service.
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Returns the wrapped service.
    pub fn service(&self) -> &S {
        &self.service
    }

    fn dispatch<Req, Res>(
        &self,
        body: &[u8],
        handler: impl FnOnce(&S, &Req) -> ServiceResult<Res>,
    ) -> Result<Vec<u8>, String>
    where
        Req: DeserializeOwned,
        Res: Serialize,
    {
        let reply = decode::<Req>(body).and_then(|request| handler(&self.service, &request));
        encode(&reply).map_err(|e| e.to_string())
    }
}

impl<S: StoreService> LoopbackServer for ServiceDispatcher<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let method = path
            .rsplit_once(':')
            .map(|(_, method)| method)
            .ok_or_else(|| format!("404 no method in {path}"))?;
        match method {
            "lookup" => self.dispatch(body, |s, r: &LookupRequest| s.lookup(r, None)),
            "allocateIds" => self.dispatch(body, |s, r: &AllocateIdsRequest| s.allocate_ids(r, None)),
            "commit" => self.dispatch(body, |s, r: &CommitRequest| s.commit(r, None)),
            "runQuery" => self.dispatch(body, |s, r: &RunQueryRequest| s.run_query(r, None)),
            "beginTransaction" => {
                self.dispatch(body, |s, r: &BeginTransactionRequest| s.begin_transaction(r, None))
            }
            "rollback" => self.dispatch(body, |s, r: &RollbackRequest| s.rollback(r, None)),
            other => Err(format!("404 unknown method {other:?}")),
        }
    }
}
