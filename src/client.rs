/// Session client: the request API application code calls
use crate::config::SessionConfig;
use crate::coordinator::{
    RefreshCoordinator, RequestFailure, SharedAuthorization, SignOutTrigger,
};
use crate::error::Result;
use crate::storage::{CredentialStore, TokenPair};
use crate::transport::{bearer, HttpTransport, Method, Request, Response, Transport};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

struct Registration {
    id: u64,
    coordinator: Arc<RefreshCoordinator>,
}

struct ClientInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    authorization: SharedAuthorization,
    interceptor: RwLock<Option<Registration>>,
    next_registration: AtomicU64,
}

/// Authenticated HTTP client
///
/// Cheap to clone; clones share the default Authorization header and the
/// registered token manager.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

impl SessionClient {
    /// Create a client that talks HTTP to `config.base_url`
    pub fn new(config: SessionConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.clone())?);
        Ok(Self::with_transport(config, transport, store))
    }

    /// Create a client on top of any transport
    pub fn with_transport(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                store,
                authorization: Arc::new(RwLock::new(None)),
                interceptor: RwLock::new(None),
                next_registration: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Load the stored token pair and use its access token for requests
    pub fn restore(&self) -> Result<Option<TokenPair>> {
        let tokens = self.inner.store.get()?;
        self.set_access_token(tokens.as_ref().map(|t| t.access_token.as_str()));
        Ok(tokens)
    }

    /// Replace the default Authorization header, or remove it with `None`
    pub fn set_access_token(&self, access_token: Option<&str>) {
        *self.inner.authorization.write() = access_token.map(bearer);
    }

    /// The default Authorization header sent with every request
    pub fn authorization(&self) -> Option<String> {
        self.inner.authorization.read().clone()
    }

    /// Install automatic token refresh
    ///
    /// `sign_out` runs when the session can not be recovered. Registering
    /// again replaces the previous token manager.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sitzung::prelude::*;
    /// use std::sync::Arc;
    ///
    /// let store = Arc::new(MemoryCredentialStore::new());
    /// let client = SessionClient::new(SessionConfig::new("http://localhost:3333"), store).unwrap();
    ///
    /// let registration = client.register_intercept_token_manager(|| {
    ///     println!("session ended");
    /// });
    /// let history = client.get("/history");
    ///
    /// // Stop refreshing once the session is torn down
    /// registration.detach();
    /// ```
    pub fn register_intercept_token_manager(
        &self,
        sign_out: impl SignOutTrigger + 'static,
    ) -> DetachHandle {
        let id = self.inner.next_registration.fetch_add(1, Ordering::Relaxed);
        let coordinator = Arc::new(RefreshCoordinator::new(
            self.inner.config.clone(),
            self.inner.transport.clone(),
            self.inner.store.clone(),
            Box::new(sign_out),
            self.inner.authorization.clone(),
        ));

        *self.inner.interceptor.write() = Some(Registration { id, coordinator });
        debug!(registration = id, "token manager registered");

        DetachHandle {
            client: Arc::downgrade(&self.inner),
            id,
            detached: AtomicBool::new(false),
        }
    }

    /// The coordinator of the active registration
    pub fn coordinator(&self) -> Option<Arc<RefreshCoordinator>> {
        self.inner
            .interceptor
            .read()
            .as_ref()
            .map(|registration| registration.coordinator.clone())
    }

    pub fn get(&self, path: &str) -> Result<Response> {
        self.send(Request::new(Method::Get, path))
    }

    pub fn delete(&self, path: &str) -> Result<Response> {
        self.send(Request::new(Method::Delete, path))
    }

    pub fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.send(Request::new(Method::Post, path).with_json(body)?)
    }

    pub fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.send(Request::new(Method::Put, path).with_json(body)?)
    }

    pub fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.send(Request::new(Method::Patch, path).with_json(body)?)
    }

    /// Send a request with the default Authorization header
    ///
    /// An explicit Authorization header on `request` takes precedence.
    pub fn send(&self, mut request: Request) -> Result<Response> {
        if request.authorization().is_none() {
            if let Some(header) = self.authorization() {
                request = request.with_default_authorization(header);
            }
        }

        let failure = match self.inner.transport.send(&request) {
            Ok(response) if response.is_success() => return Ok(response),
            Ok(response) => RequestFailure::Status(response),
            Err(err) => RequestFailure::Transport(err),
        };

        match self.coordinator() {
            Some(coordinator) => coordinator.intercept(request, failure).into_result(),
            None => Err(failure.into_error()),
        }
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("config", &self.inner.config)
            .field("registered", &self.inner.interceptor.read().is_some())
            .finish_non_exhaustive()
    }
}

/// Detaches a registered token manager
///
/// Only the first call has an effect, and only while the registration it
/// created is still the active one. Dropping the handle does not detach.
#[derive(Debug)]
pub struct DetachHandle {
    client: Weak<ClientInner>,
    id: u64,
    detached: AtomicBool,
}

impl DetachHandle {
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(client) = self.client.upgrade() else {
            return;
        };

        let mut interceptor = client.interceptor.write();
        if interceptor.as_ref().is_some_and(|r| r.id == self.id) {
            interceptor.take();
            debug!(registration = self.id, "token manager detached");
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}
