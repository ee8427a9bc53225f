//! Option structures for the client, its transport and individual turns.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default API root of the chat service.
pub const DEFAULT_API_BASE: &str = "https://chat.qwen.ai/api";

/// Default `accept-language` sent with every authorized call.
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9";

/// A secret string type for sensitive data like bearer tokens.
/// Prevents accidental logging or display of secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Transport configuration shared by the callback transport and the
/// native fallback client.
///
/// # Example
/// ```rust
/// use qwen_chat::options::TransportOptions;
/// use std::time::Duration;
///
/// let options = TransportOptions::default()
///     .with_timeout(Duration::from_secs(30))
///     .with_header("x-trace".to_string(), "1".to_string());
/// assert_eq!(options.timeout, Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Request timeout
    pub timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl TransportOptions {
    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }
}

/// Client-level configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL for API endpoints
    pub base_url: String,

    /// Value of the `accept-language` header
    pub accept_language: String,

    pub transport: TransportOptions,

    /// Send requests through reqwest directly instead of the callback
    /// transport.
    pub native_fetch: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            transport: TransportOptions::default(),
            native_fetch: false,
        }
    }
}

impl ClientOptions {
    /// Set the base URL. A trailing slash is dropped.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_accept_language(mut self, accept_language: impl Into<String>) -> Self {
        self.accept_language = accept_language.into();
        self
    }

    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_native_fetch(mut self, native_fetch: bool) -> Self {
        self.native_fetch = native_fetch;
        self
    }
}

/// Per-turn overrides. Unset fields fall back to `stream: true` and
/// `incremental_output: true`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental_output: Option<bool>,
}

impl TurnOptions {
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_incremental_output(mut self, incremental_output: bool) -> Self {
        self.incremental_output = Some(incremental_output);
        self
    }

    /// Resolve to concrete `(stream, incremental_output)` values.
    pub fn resolve(&self) -> (bool, bool) {
        (
            self.stream.unwrap_or(true),
            self.incremental_output.unwrap_or(true),
        )
    }
}
