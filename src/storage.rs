/// Credential storage with pluggable backends
use crate::error::{Result, SessionError};
use crate::transport::bearer;
use fs2::FileExt;
use keyring::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Access and refresh token pair
///
/// Replaced wholesale on every successful refresh. Field names on the wire
/// are `token` and `refresh_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "token")]
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Authorization header value for the access token
    pub fn bearer(&self) -> String {
        bearer(&self.access_token)
    }
}

/// Durable storage for the session's token pair
pub trait CredentialStore: Send + Sync {
    /// Get the stored token pair
    fn get(&self) -> Result<Option<TokenPair>>;

    /// Save a token pair, overwriting any previous one
    fn save(&self, tokens: &TokenPair) -> Result<()>;

    /// Remove the stored token pair
    fn clear(&self) -> Result<()>;
}

/// In-memory credential store
///
/// Suitable for testing and for sessions that should not outlive the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    tokens: Arc<RwLock<Option<TokenPair>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `tokens`
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(Some(tokens))),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<TokenPair>> {
        Ok(self.tokens.read().clone())
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        *self.tokens.write() = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.tokens.write().take();
        Ok(())
    }
}

/// File-based credential store using XDG conventions
///
/// Keeps the token pair as JSON in `<data_dir>/<app_name>/credentials.json`.
/// Writes hold an exclusive file lock and reads a shared one, so several
/// processes of the same application see whole token pairs only.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    const FILE_NAME: &'static str = "credentials.json";

    /// Create a store for `app_name`
    ///
    /// Checks `$XDG_DATA_HOME` first, then falls back to the platform data
    /// directory (`~/.local/share` on Linux, AppData on Windows).
    pub fn new(app_name: &str) -> Result<Self> {
        let base_dir = if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(xdg_data)
        } else {
            dirs::data_dir().ok_or_else(|| {
                SessionError::StorageError("Could not determine data directory".to_string())
            })?
        };

        Self::with_dir(base_dir.join(app_name))
    }

    /// Create a store that keeps its file in `dir`
    pub fn with_dir(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            SessionError::StorageError(format!("Failed to create storage directory: {}", e))
        })?;

        Ok(Self {
            path: dir.join(Self::FILE_NAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<TokenPair>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path).map_err(|e| {
            SessionError::StorageError(format!("Failed to open credentials file: {}", e))
        })?;
        file.lock_shared()
            .map_err(|e| SessionError::StorageError(format!("Failed to lock credentials: {}", e)))?;

        let mut content = String::new();
        let read = file.read_to_string(&mut content);
        let _ = file.unlock();
        read.map_err(|e| {
            SessionError::StorageError(format!("Failed to read credentials file: {}", e))
        })?;

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SessionError::StorageError(format!("Failed to parse credentials: {}", e)))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        let content = serde_json::to_string_pretty(tokens).map_err(|e| {
            SessionError::StorageError(format!("Failed to serialize credentials: {}", e))
        })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| {
                SessionError::StorageError(format!("Failed to open credentials file: {}", e))
            })?;
        file.lock_exclusive()
            .map_err(|e| SessionError::StorageError(format!("Failed to lock credentials: {}", e)))?;

        // Truncate only once the lock is held
        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(content.as_bytes()))
            .and_then(|_| file.sync_all());
        let _ = file.unlock();

        written.map_err(|e| {
            SessionError::StorageError(format!("Failed to write credentials file: {}", e))
        })
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::StorageError(format!(
                "Failed to remove credentials file: {}",
                e
            ))),
        }
    }
}

/// Secure storage using the OS credential manager
///
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service API (libsecret)
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl KeyringCredentialStore {
    const ACCOUNT: &'static str = "session";

    /// Create a store whose keyring service is named after `app_name`
    pub fn new(app_name: &str) -> Self {
        Self {
            service: format!("sitzung-{}", app_name),
            account: Self::ACCOUNT.to_string(),
        }
    }

    /// Use a different account name, e.g. one per signed-in user
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.account).map_err(|e| {
            SessionError::StorageError(format!("Failed to create keyring entry: {}", e))
        })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self) -> Result<Option<TokenPair>> {
        match self.entry()?.get_password() {
            Ok(json) => serde_json::from_str(&json).map(Some).map_err(|e| {
                SessionError::StorageError(format!("Failed to deserialize credentials: {}", e))
            }),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SessionError::StorageError(format!(
                "Failed to retrieve credentials from keyring: {}",
                e
            ))),
        }
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        let json = serde_json::to_string(tokens).map_err(|e| {
            SessionError::StorageError(format!("Failed to serialize credentials: {}", e))
        })?;

        self.entry()?.set_password(&json).map_err(|e| {
            SessionError::StorageError(format!("Failed to save credentials to keyring: {}", e))
        })
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
            Err(e) => Err(SessionError::StorageError(format!(
                "Failed to delete credentials from keyring: {}",
                e
            ))),
        }
    }
}
