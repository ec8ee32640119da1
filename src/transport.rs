/// Request/response model and the blocking HTTP transport
use crate::config::SessionConfig;
use crate::error::{Result, SessionError, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

pub const AUTHORIZATION: &str = "Authorization";

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A request descriptor
///
/// Only the Authorization header is rewritten once a request has been
/// issued, when it is replayed with refreshed credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    headers: Vec<(String, String)>,
    default_authorization: bool,
    replay: bool,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            default_authorization: false,
            replay: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Attach a JSON body
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| TransportError::Request(format!("Failed to serialize body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_bearer(mut self, access_token: &str) -> Self {
        self.set_bearer(access_token);
        self
    }

    /// Set a header, replacing any existing header with the same name
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn set_bearer(&mut self, access_token: &str) {
        self.set_header(AUTHORIZATION, bearer(access_token));
        self.default_authorization = false;
    }

    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header(AUTHORIZATION)
    }

    /// Whether the Authorization header came from the client's default
    pub fn uses_default_authorization(&self) -> bool {
        self.default_authorization
    }

    pub(crate) fn with_default_authorization(mut self, header: String) -> Self {
        self.set_header(AUTHORIZATION, header);
        self.default_authorization = true;
        self
    }

    /// Whether this request is being re-sent after a refresh
    pub fn is_replay(&self) -> bool {
        self.replay
    }

    pub(crate) fn into_replay(mut self) -> Self {
        self.replay = true;
        self
    }
}

/// Format an access token as an Authorization header value
pub fn bearer(access_token: &str) -> String {
    format!("Bearer {}", access_token)
}

/// A response with any status code
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Option<Value>,
}

impl Response {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self.body.clone().unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| {
            SessionError::from(TransportError::Request(format!(
                "Failed to parse response body: {}",
                e
            )))
        })
    }

    /// The `message` field of a structured error body
    pub fn error_message(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|body| body.get("message"))
            .and_then(Value::as_str)
    }
}

/// Performs a single HTTP exchange
///
/// Non-success statuses are returned as `Ok(Response)`; `Err` is reserved
/// for failures where no response was received.
pub trait Transport: Send + Sync {
    fn send(&self, request: &Request) -> std::result::Result<Response, TransportError>;
}

/// Transport backed by a blocking `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    config: SessionConfig,
}

impl HttpTransport {
    /// Build a transport that enforces `config.timeout` on every request
    pub fn new(config: SessionConfig) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder().timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().map_err(TransportError::from)?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request) -> std::result::Result<Response, TransportError> {
        let url = self.config.url(&request.path);
        trace!(method = request.method.as_str(), %url, "sending request");

        let mut builder = self.client.request(request.method.into(), &url);
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let text = response.text()?;

        Ok(Response::new(status, parse_body(&text)))
    }
}

fn parse_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}
