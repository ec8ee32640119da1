/// Single-flight access token refresh
///
/// When the API rejects an access token as expired or invalid, the
/// coordinator performs exactly one refresh call no matter how many requests
/// failed at once. Requests that fail while a refresh is underway wait in a
/// FIFO queue and are resolved together when it settles.
use crate::config::SessionConfig;
use crate::error::{RefreshFailure, SessionError, TransportError};
use crate::storage::{CredentialStore, TokenPair};
use crate::transport::{Request, Response, Transport};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{mpsc, Arc};
use tracing::{debug, info, warn};

/// Default Authorization header shared by a client and its coordinator
pub(crate) type SharedAuthorization = Arc<RwLock<Option<String>>>;

/// Ends the user's session
///
/// Must not panic, and tolerates being invoked more than once.
pub trait SignOutTrigger: Send + Sync {
    fn sign_out(&self);
}

impl<F> SignOutTrigger for F
where
    F: Fn() + Send + Sync,
{
    fn sign_out(&self) {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// Why a request did not succeed directly
#[derive(Debug, Clone, PartialEq)]
pub enum RequestFailure {
    /// The server answered with a non-success status
    Status(Response),
    /// No response was received
    Transport(TransportError),
}

impl RequestFailure {
    /// Classify the failure without any refresh handling
    pub fn into_error(self) -> SessionError {
        match self {
            RequestFailure::Status(response) => match response.error_message() {
                Some(message) => SessionError::Domain {
                    status: response.status,
                    message: message.to_string(),
                },
                None => TransportError::Status {
                    status: response.status,
                }
                .into(),
            },
            RequestFailure::Transport(err) => err.into(),
        }
    }
}

/// Result of [`RefreshCoordinator::intercept`]
#[derive(Debug)]
pub enum Outcome {
    /// Not a refresh case; the original error is propagated
    PassThrough(SessionError),
    /// The session was ended without refreshing
    Terminated(SessionError),
    /// The request was replayed with refreshed credentials
    Replayed(Result<Response, SessionError>),
    /// The refresh episode failed and the session was ended
    RefreshFailed(SessionError),
}

impl Outcome {
    pub fn into_result(self) -> Result<Response, SessionError> {
        match self {
            Outcome::Replayed(result) => result,
            Outcome::PassThrough(err) | Outcome::Terminated(err) | Outcome::RefreshFailed(err) => {
                Err(err)
            }
        }
    }
}

type SuccessHandle = Box<dyn FnOnce(Request) + Send>;
type FailureHandle = Box<dyn FnOnce(SessionError) + Send>;

/// A request blocked behind an in-flight refresh
///
/// Exactly one of its handles runs when the episode settles.
pub struct PendingRequest {
    request: Request,
    on_success: SuccessHandle,
    on_failure: FailureHandle,
}

impl PendingRequest {
    pub(crate) fn new(
        request: Request,
        on_success: impl FnOnce(Request) + Send + 'static,
        on_failure: impl FnOnce(SessionError) + Send + 'static,
    ) -> Self {
        Self {
            request,
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    /// Wire both handles to a channel the waiting caller blocks on
    fn channel(request: Request, tx: mpsc::Sender<Result<Request, SessionError>>) -> Self {
        let failure_tx = tx.clone();
        Self::new(
            request,
            move |request| {
                let _ = tx.send(Ok(request));
            },
            move |err| {
                let _ = failure_tx.send(Err(err));
            },
        )
    }

    fn resolve(self, access_token: &str) {
        let mut request = self.request;
        request.set_bearer(access_token);
        (self.on_success)(request)
    }

    fn reject(self, cause: SessionError) {
        (self.on_failure)(cause)
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Episode {
    state: RefreshState,
    waiters: VecDeque<PendingRequest>,
    /// Set while a failed episode signs out; late arrivals fail with it
    failure: Option<SessionError>,
}

/// Coordinates token refreshes for one session
///
/// Construct one per active session. All state transitions happen under a
/// single lock, so two callers can never both observe `Idle` and refresh.
pub struct RefreshCoordinator {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    sign_out: Box<dyn SignOutTrigger>,
    authorization: SharedAuthorization,
    tokens: RwLock<Option<TokenPair>>,
    episode: Mutex<Episode>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        sign_out: Box<dyn SignOutTrigger>,
        authorization: SharedAuthorization,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            sign_out,
            authorization,
            tokens: RwLock::new(None),
            episode: Mutex::new(Episode {
                state: RefreshState::Idle,
                waiters: VecDeque::new(),
                failure: None,
            }),
        }
    }

    pub fn state(&self) -> RefreshState {
        self.episode.lock().state
    }

    /// Number of requests waiting on the current episode
    pub fn pending_waiters(&self) -> usize {
        self.episode.lock().waiters.len()
    }

    /// The token pair obtained by the last successful refresh
    pub fn tokens(&self) -> Option<TokenPair> {
        self.tokens.read().clone()
    }

    /// Decide what happens to a request that did not succeed directly
    ///
    /// Blocks while a refresh is performed or awaited. The returned outcome
    /// carries the value the original caller should receive.
    pub fn intercept(&self, request: Request, failure: RequestFailure) -> Outcome {
        let response = match failure {
            RequestFailure::Status(response) if response.status == 401 => response,
            other => return Outcome::PassThrough(other.into_error()),
        };

        let refresh_signal = response
            .error_message()
            .is_some_and(|message| self.config.is_refresh_signal(message));

        if !refresh_signal || request.is_replay() {
            warn!(
                path = %request.path,
                replay = request.is_replay(),
                message = response.error_message().unwrap_or_default(),
                "request unauthorized; signing out"
            );
            self.sign_out.sign_out();
            return Outcome::Terminated(RequestFailure::Status(response).into_error());
        }

        self.handle_expired(request)
    }

    fn handle_expired(&self, request: Request) -> Outcome {
        let mut episode = self.episode.lock();

        match episode.state {
            RefreshState::Refreshing => {
                if let Some(err) = episode.failure.clone() {
                    drop(episode);
                    debug!(path = %request.path, "refresh already failed; rejecting request");
                    return Outcome::RefreshFailed(err);
                }

                let (tx, rx) = mpsc::channel();
                let position = episode.waiters.len();
                episode
                    .waiters
                    .push_back(PendingRequest::channel(request, tx));
                drop(episode);

                debug!(position, "refresh in progress; request queued");
                match rx.recv() {
                    Ok(Ok(request)) => Outcome::Replayed(self.replay(request)),
                    Ok(Err(err)) => Outcome::RefreshFailed(err),
                    Err(_) => Outcome::RefreshFailed(RefreshFailure::Abandoned.into()),
                }
            }
            RefreshState::Idle => {
                // The request raced an episode that already settled. Only
                // headers the client filled in are swapped for the current one.
                let current = self.authorization.read().clone();
                if let Some(current) = current {
                    let replaceable = request.authorization().is_none()
                        || request.uses_default_authorization();
                    if replaceable && request.authorization() != Some(current.as_str()) {
                        drop(episode);
                        debug!(path = %request.path, "request used outdated credentials; replaying");
                        let request = request.with_default_authorization(current);
                        return Outcome::Replayed(self.replay(request));
                    }
                }

                episode.state = RefreshState::Refreshing;
                drop(episode);
                self.run_episode(request)
            }
        }
    }

    fn run_episode(&self, request: Request) -> Outcome {
        info!(path = %request.path, "access token rejected; refreshing");
        let mut guard = EpisodeGuard {
            coordinator: self,
            settled: false,
        };

        match self.refresh() {
            Ok(tokens) => {
                *self.authorization.write() = Some(tokens.bearer());
                let waiters = guard.settle(|waiter| waiter.resolve(&tokens.access_token));
                info!(waiters, "token refreshed; replaying requests");

                Outcome::Replayed(self.replay(request.with_bearer(&tokens.access_token)))
            }
            Err(cause) => {
                let err = SessionError::RefreshFailure(cause);
                let waiters = guard.fail(&err);
                warn!(error = %err, waiters, "token refresh failed; signing out");

                // Still `Refreshing`: nothing can start a second episode yet
                self.sign_out.sign_out();
                guard.settle(|waiter| waiter.reject(err.clone()));

                Outcome::RefreshFailed(err)
            }
        }
    }

    fn refresh(&self) -> Result<TokenPair, RefreshFailure> {
        let refresh_token = self
            .store
            .get()
            .map_err(|e| RefreshFailure::Storage(e.to_string()))?
            .map(|tokens| tokens.refresh_token)
            .filter(|token| !token.is_empty())
            .ok_or(RefreshFailure::NoRefreshToken)?;

        let mut request = Request::post(self.config.refresh_path.clone());
        request.body = Some(json!({ "refresh_token": refresh_token }));

        let response = self
            .transport
            .send(&request)
            .map_err(RefreshFailure::Transport)?;

        if !response.is_success() {
            return Err(RefreshFailure::Rejected {
                status: response.status,
                message: response.error_message().unwrap_or_default().to_string(),
            });
        }

        let tokens: TokenPair = response
            .json()
            .map_err(|e| RefreshFailure::InvalidResponse(e.to_string()))?;

        self.store
            .save(&tokens)
            .map_err(|e| RefreshFailure::Storage(e.to_string()))?;
        *self.tokens.write() = Some(tokens.clone());

        Ok(tokens)
    }

    /// Re-send a request once; a replay is never refreshed again
    fn replay(&self, request: Request) -> Result<Response, SessionError> {
        let request = request.into_replay();
        debug!(method = request.method.as_str(), path = %request.path, "replaying request");

        match self.transport.send(&request) {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => self
                .intercept(request, RequestFailure::Status(response))
                .into_result(),
            Err(err) => self
                .intercept(request, RequestFailure::Transport(err))
                .into_result(),
        }
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("config", &self.config)
            .field("episode", &self.episode)
            .finish_non_exhaustive()
    }
}

/// Returns the coordinator to `Idle` even if the refresh unwinds
struct EpisodeGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl EpisodeGuard<'_> {
    /// Reject the queue in arrival order and keep the episode open
    ///
    /// Requests arriving until [`settle`](Self::settle) fail with `err`
    /// without being queued.
    fn fail(&mut self, err: &SessionError) -> usize {
        let mut episode = self.coordinator.episode.lock();
        let waiters = std::mem::take(&mut episode.waiters);
        let count = waiters.len();
        for waiter in waiters {
            waiter.reject(err.clone());
        }
        episode.failure = Some(err.clone());
        count
    }

    /// Drain the queue in arrival order, then go back to `Idle`
    fn settle(&mut self, mut dispatch: impl FnMut(PendingRequest)) -> usize {
        let mut episode = self.coordinator.episode.lock();
        let waiters = std::mem::take(&mut episode.waiters);
        let count = waiters.len();
        for waiter in waiters {
            dispatch(waiter);
        }
        episode.failure = None;
        episode.state = RefreshState::Idle;
        self.settled = true;
        count
    }
}

impl Drop for EpisodeGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            // Dropped handles wake their callers with `Abandoned`
            self.settle(drop);
        }
    }
}
