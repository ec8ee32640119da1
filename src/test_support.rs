/// Scripted collaborators shared by the unit tests
use crate::config::DEFAULT_REFRESH_PATH;
use crate::error::{Result, TransportError};
use crate::storage::{CredentialStore, MemoryCredentialStore, TokenPair};
use crate::transport::{bearer, Request, Response, Transport};
use parking_lot::{Condvar, Mutex};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the refresh endpoint answers
#[derive(Debug, Clone)]
pub enum RefreshScript {
    Succeed(TokenPair),
    Fail(TransportError),
    Reject(u16, &'static str),
    /// The transport itself panics mid-call
    Panic,
}

/// Blocks callers of [`wait`](Self::wait) while closed
#[derive(Debug)]
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            open: Mutex::new(true),
            changed: Condvar::new(),
        }
    }
}

impl Gate {
    pub fn close(&self) {
        *self.open.lock() = false;
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.changed.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.changed.wait(&mut open);
        }
    }
}

/// One request as seen by the server
#[derive(Debug, Clone)]
pub struct Sent {
    pub path: String,
    pub authorization: Option<String>,
    pub replay: bool,
}

/// In-memory API server
///
/// Protected routes accept only the current access token and answer
/// `401 token.expired` otherwise. A few fixed paths produce other failures:
/// `/forbidden` (401 not.authorized), `/boom` (500 with a message),
/// `/missing` (404 without a body) and `/offline` (connection error).
pub struct ScriptedTransport {
    valid_access: Mutex<String>,
    refresh: Mutex<RefreshScript>,
    gate: Gate,
    rotate_on_refresh: AtomicBool,
    refresh_calls: AtomicUsize,
    sent: Mutex<Vec<Sent>>,
}

impl ScriptedTransport {
    pub fn new(valid_access: &str, refresh: RefreshScript) -> Arc<Self> {
        Arc::new(Self {
            valid_access: Mutex::new(valid_access.to_string()),
            refresh: Mutex::new(refresh),
            gate: Gate::default(),
            rotate_on_refresh: AtomicBool::new(true),
            refresh_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Make refresh calls block until [`release_refresh`](Self::release_refresh)
    pub fn hold_refresh(&self) {
        self.gate.close();
    }

    pub fn release_refresh(&self) {
        self.gate.open();
    }

    /// Keep rejecting the old access token after handing out a new one
    pub fn keep_access_after_refresh(&self) {
        self.rotate_on_refresh.store(false, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn replays(&self) -> usize {
        self.sent().iter().filter(|s| s.replay).count()
    }

    fn answer_refresh(&self) -> std::result::Result<Response, TransportError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.wait();

        match self.refresh.lock().clone() {
            RefreshScript::Succeed(tokens) => {
                if self.rotate_on_refresh.load(Ordering::SeqCst) {
                    *self.valid_access.lock() = tokens.access_token.clone();
                }
                Ok(Response::new(200, Some(json!(tokens))))
            }
            RefreshScript::Fail(err) => Err(err),
            RefreshScript::Reject(status, message) => {
                Ok(Response::new(status, Some(json!({ "message": message }))))
            }
            RefreshScript::Panic => panic!("refresh endpoint crashed"),
        }
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &Request) -> std::result::Result<Response, TransportError> {
        self.sent.lock().push(Sent {
            path: request.path.clone(),
            authorization: request.authorization().map(str::to_string),
            replay: request.is_replay(),
        });

        match request.path.as_str() {
            DEFAULT_REFRESH_PATH => self.answer_refresh(),
            "/forbidden" => Ok(Response::new(
                401,
                Some(json!({ "status": "error", "message": "not.authorized" })),
            )),
            "/boom" => Ok(Response::new(
                500,
                Some(json!({ "status": "error", "message": "Internal server error" })),
            )),
            "/missing" => Ok(Response::new(404, None)),
            "/offline" => Err(TransportError::Connection("connection refused".to_string())),
            path => {
                let valid = bearer(&self.valid_access.lock());
                if request.authorization() == Some(valid.as_str()) {
                    Ok(Response::new(200, Some(json!({ "path": path }))))
                } else {
                    Ok(Response::new(
                        401,
                        Some(json!({ "status": "error", "message": "token.expired" })),
                    ))
                }
            }
        }
    }
}

/// Memory store that counts reads and saves
///
/// Reads can be held open with [`hold_gets`](Self::hold_gets).
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryCredentialStore,
    gets: AtomicUsize,
    saves: AtomicUsize,
    gate: Gate,
}

impl CountingStore {
    pub fn with_tokens(tokens: TokenPair) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCredentialStore::with_tokens(tokens),
            ..Self::default()
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn hold_gets(&self) {
        self.gate.close();
    }

    pub fn release_gets(&self) {
        self.gate.open();
    }
}

impl CredentialStore for CountingStore {
    fn get(&self) -> Result<Option<TokenPair>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.gate.wait();
        self.inner.get()
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(tokens)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }
}

/// Sign-out trigger that counts invocations
pub fn sign_out_counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = count.clone();
    (count, move || {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

/// Poll `condition` until it holds, failing the test after five seconds
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}
