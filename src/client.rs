//! Client facade and error types.

use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE,
};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::http::build_http_client;
use crate::model::{AuthResponse, NewChatRequest, NewChatResponse};
use crate::options::{ClientOptions, SecretString};
use crate::session::{Session, SCRATCH_MODEL, SCRATCH_SESSION_ID};
use crate::sse::ResponseIdLog;
use crate::transport::{Fetch, FetchAdapter, FetchRequest, ReqwestTransport};

/// Environment variable holding the bearer token.
pub const TOKEN_ENV: &str = "QWEN_TOKEN";

/// Environment variable overriding the API base URL.
pub const API_BASE_ENV: &str = "QWEN_API_BASE";

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No bearer token set")]
    MissingCredential,

    #[error("No transport available to send the request")]
    TransportUnavailable,

    #[error("HTTP {status} {reason}{}", display_body(.body))]
    Http {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("Failed to create new session")]
    SessionRejected,

    #[error("Response has no body to stream")]
    StreamUnavailable,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn display_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

struct Inner {
    options: ClientOptions,
    token: RwLock<Option<SecretString>>,
    fetcher: Arc<dyn Fetch>,
    response_ids: ResponseIdLog,
}

/// Shared handle to the chat service.
///
/// Cloning is cheap; every clone sees the same credential and the same
/// response-id log.
///
/// # Example
/// ```no_run
/// use futures::StreamExt;
/// use qwen_chat::{ClientOptions, Qwen, TurnOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Qwen::new(ClientOptions::default())?;
///     client.set_token("your-token");
///
///     let mut session = client.new_session("qwen3-30b-a3b").await?;
///     let mut frames = session.round("Hello!", TurnOptions::default()).await?;
///     while let Some(frame) = frames.next().await {
///         print!("{}", client.extract_content(&frame?));
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Qwen {
    inner: Arc<Inner>,
}

impl Qwen {
    /// Create a client that talks through [`ReqwestTransport`], or through a
    /// plain reqwest client when [`ClientOptions::native_fetch`] is set.
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        let adapter = if options.native_fetch {
            FetchAdapter::native(build_http_client(&options.transport)?)
                .with_fallback_headers(options.transport.extra_headers.clone())
        } else {
            FetchAdapter::new(ReqwestTransport::new(&options.transport)?)
        };
        Ok(Self::with_fetcher(options, Arc::new(adapter)))
    }

    /// Create a client on top of any [`Fetch`] implementation.
    pub fn with_fetcher(options: ClientOptions, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                token: RwLock::new(None),
                fetcher,
                response_ids: ResponseIdLog::default(),
            }),
        }
    }

    /// Create a client from `QWEN_TOKEN` and, if set, `QWEN_API_BASE`.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut options = ClientOptions::default();
        if let Ok(base_url) = std::env::var(API_BASE_ENV) {
            options = options.with_base_url(base_url);
        }
        let token = std::env::var(TOKEN_ENV)
            .map_err(|_| ClientError::Config(format!("{} must be set", TOKEN_ENV)))?;

        let client = Self::new(options)?;
        client.set_token(token);
        Ok(client)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Store the bearer token. Empty input leaves the current token alone.
    pub fn set_token(&self, token: impl Into<SecretString>) {
        let token = token.into();
        if token.is_empty() {
            return;
        }
        *self
            .inner
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub fn has_token(&self) -> bool {
        self.token().is_ok()
    }

    fn token(&self) -> Result<SecretString, ClientError> {
        self.inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ClientError::MissingCredential)
    }

    /// Headers required on every authorized call.
    pub fn headers(&self) -> Result<HeaderMap, ClientError> {
        let token = self.token()?;

        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| ClientError::Config("Invalid bearer token".to_string()))?;
        authorization.set_sensitive(true);

        let accept_language = HeaderValue::from_str(&self.inner.options.accept_language)
            .map_err(|_| ClientError::Config("Invalid accept-language".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, accept_language);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, authorization);
        Ok(headers)
    }

    /// Exchange the current token for a fresh one.
    pub async fn auth(&self) -> Result<(), ClientError> {
        let request = FetchRequest::get(self.endpoint("/v1/auths/")).headers(&self.headers()?);
        let response = self.fetcher().fetch(request).await?.error_for_status().await?;
        let auth: AuthResponse = response.json().await?;

        let token = auth
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ClientError::InvalidResponse("auth response carried no token".to_string()))?;
        self.set_token(token);
        debug!("refreshed bearer token");
        Ok(())
    }

    /// Allocate a new remote conversation for `model`.
    pub async fn new_session(&self, model: impl Into<String>) -> Result<Session, ClientError> {
        let model = model.into();
        let request = FetchRequest::post(self.endpoint("/v2/chats/new"))
            .headers(&self.headers()?)
            .json(&NewChatRequest::new(&model))?;
        let response = self.fetcher().fetch(request).await?.error_for_status().await?;
        let created: NewChatResponse = response.json().await?;

        if !created.success {
            return Err(ClientError::SessionRejected);
        }
        let data = created.data.ok_or_else(|| {
            ClientError::InvalidResponse("session allocation returned no id".to_string())
        })?;

        debug!(session_id = %data.id, %model, "allocated chat session");
        Ok(Session::new(self.clone(), data.id, model))
    }

    /// Attach to an existing conversation.
    pub fn session(&self, id: impl Into<String>, model: impl Into<String>) -> Session {
        Session::new(self.clone(), id.into(), model.into())
    }

    /// The fixed scratch conversation, usable without an allocation round-trip.
    pub fn temp_session(&self) -> Session {
        self.session(SCRATCH_SESSION_ID, SCRATCH_MODEL)
    }

    /// Display text of a frame. Records the frame's id in the response log.
    pub fn extract_content(&self, frame: &str) -> String {
        self.inner.response_ids.extract(frame)
    }

    /// Frame identifiers seen by [`Qwen::extract_content`], oldest first.
    pub fn observed_response_ids(&self) -> Vec<String> {
        self.inner.response_ids.snapshot()
    }

    pub fn response_id_log(&self) -> &ResponseIdLog {
        &self.inner.response_ids
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.inner.options.base_url, path)
    }

    pub(crate) fn fetcher(&self) -> &dyn Fetch {
        self.inner.fetcher.as_ref()
    }
}

impl std::fmt::Debug for Qwen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Qwen")
            .field("base_url", &self.inner.options.base_url)
            .field("has_token", &self.has_token())
            .finish()
    }
}
