/// Session client configuration
use std::time::Duration;

/// Default per-request timeout enforced by the transport
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default path of the refresh endpoint
pub const DEFAULT_REFRESH_PATH: &str = "/sessions/refresh-token";

/// Messages of a 401 body that ask the client to refresh its access token
pub const DEFAULT_REFRESH_MESSAGES: [&str; 2] = ["token.expired", "token.invalid"];

/// Configuration for a [`SessionClient`](crate::client::SessionClient)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub refresh_path: String,
    pub refresh_messages: Vec<String>,
    pub user_agent: Option<String>,
}

impl SessionConfig {
    /// Create a configuration for the API at `base_url` with default settings
    ///
    /// # Example
    ///
    /// ```
    /// use sitzung::config::SessionConfig;
    /// use std::time::Duration;
    ///
    /// let config = SessionConfig::new("http://192.168.0.112:3333")
    ///     .with_timeout(Duration::from_secs(5));
    /// assert_eq!(config.url("/history"), "http://192.168.0.112:3333/history");
    /// assert!(config.is_refresh_signal("token.expired"));
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            refresh_messages: DEFAULT_REFRESH_MESSAGES
                .iter()
                .map(|m| m.to_string())
                .collect(),
            user_agent: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn with_refresh_messages<I, M>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.refresh_messages = messages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Whether a 401 error message signals an expired or invalid access token
    pub fn is_refresh_signal(&self, message: &str) -> bool {
        self.refresh_messages.iter().any(|m| m == message)
    }

    /// Join a request path onto the base URL
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }

        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
