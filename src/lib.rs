//! Sitzung - Authenticated HTTP sessions with single-flight token refresh
//!
//! This library wraps a blocking HTTP client so that expired access tokens
//! are refreshed transparently while many threads issue requests at once.
//!
//! # Features
//!
//! - Exactly one refresh call per expiry, however many requests failed
//! - Requests that fail during a refresh are queued and replayed in order
//! - Pluggable credential storage (memory, file, OS keyring)
//! - Sign-out callback when the session can not be recovered
//! - Revocable registration of the refresh behaviour
//!
//! # Example
//!
//! ```no_run
//! use sitzung::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(FileCredentialStore::new("gymapp").unwrap());
//! let config = SessionConfig::new("http://192.168.0.112:3333");
//!
//! let client = SessionClient::new(config, store).unwrap();
//! client.restore().unwrap();
//!
//! let registration = client.register_intercept_token_manager(|| {
//!     eprintln!("session expired, please sign in again");
//! });
//!
//! match client.get("/history") {
//!     Ok(response) => println!("{:?}", response.body),
//!     Err(e) => eprintln!("{}", e.user_message("Could not load history")),
//! }
//!
//! registration.detach();
//! ```

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{DetachHandle, SessionClient};
    pub use crate::config::SessionConfig;
    pub use crate::coordinator::{
        Outcome, RefreshCoordinator, RefreshState, RequestFailure, SignOutTrigger,
    };
    pub use crate::error::{RefreshFailure, SessionError, TransportError};
    pub use crate::storage::{
        CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
        TokenPair,
    };
    pub use crate::transport::{HttpTransport, Method, Request, Response, Transport};
}
