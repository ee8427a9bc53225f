//! Fetch-style request/response adapter over a callback-driven transport.
//!
//! A [`CallbackTransport`] only knows how to fire off a request and report
//! back through callbacks, possibly more than once. [`FetchAdapter`] turns
//! that into a single awaited [`FetchResponse`]:
//!
//! - request bodies are normalized into a transport payload ([`body`]),
//! - outbound headers are flattened and response headers parsed ([`headers`]),
//! - the first callback wins; every later callback is dropped.
//!
//! When the transport can stream, the response resolves as soon as headers
//! arrive and its body is read incrementally through a [`ByteStream`].

pub mod body;
pub mod headers;
pub mod native;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use crate::client::ClientError;
use crate::http::add_extra_headers;
use crate::stream::ByteStream;

pub use body::{Blob, FormPart, NormalizedBody, Payload, RequestBody};
pub use native::ReqwestTransport;

/// Anything that can turn a [`FetchRequest`] into a [`FetchResponse`].
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ClientError>;
}

/// Representation the transport is asked to deliver the body in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// Whole body, delivered with the `load` callback.
    Buffer,
    /// Live body stream, delivered once headers are known.
    Stream,
}

/// Progress of a transport request, mirroring `XMLHttpRequest.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Unsent,
    Opened,
    HeadersReceived,
    Loading,
    Done,
}

/// What the adapter hands to a [`CallbackTransport`].
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub payload: Payload,
    pub binary: bool,
    pub response_type: ResponseType,
}

/// What a [`CallbackTransport`] reports back.
#[derive(Debug)]
pub struct RawResponse {
    /// `0` when the transport could not observe a real status.
    pub status: u16,
    pub status_text: Option<String>,
    /// Raw `name: value` lines.
    pub response_headers: Option<String>,
    pub ready_state: ReadyState,
    pub final_url: Option<String>,
    pub body: ResponseBody,
}

impl RawResponse {
    pub fn new(status: u16, ready_state: ReadyState) -> Self {
        Self {
            status,
            status_text: None,
            response_headers: None,
            ready_state,
            final_url: None,
            body: ResponseBody::Empty,
        }
    }

    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = Some(status_text.into());
        self
    }

    pub fn with_headers(mut self, raw: impl Into<String>) -> Self {
        self.response_headers = Some(raw.into());
        self
    }

    pub fn with_final_url(mut self, url: impl Into<String>) -> Self {
        self.final_url = Some(url.into());
        self
    }

    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }
}

/// A lower-level transport that reports results through callbacks.
///
/// `dispatch` returns immediately. The implementation must eventually call
/// [`TransportCallbacks::load`] or [`TransportCallbacks::error`], and may call
/// [`TransportCallbacks::ready_state_change`] as the request progresses.
/// Extra or late calls are harmless.
pub trait CallbackTransport: Send + Sync {
    /// Whether the transport can hand out a live body stream.
    fn supports_streaming(&self) -> bool;

    fn dispatch(&self, request: TransportRequest, callbacks: TransportCallbacks);
}

type Outcome = Result<FetchResponse, ClientError>;

/// One-shot settlement of an in-flight request.
pub struct Settlement {
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl Settlement {
    fn new() -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let settlement = Arc::new(Self {
            sender: Mutex::new(Some(tx)),
        });
        (settlement, rx)
    }

    /// Settle with the outcome produced by `outcome`. Returns `false`, without
    /// evaluating `outcome`, if the request was already settled.
    fn settle(&self, outcome: impl FnOnce() -> Outcome) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                // The receiver is gone if the caller stopped waiting.
                let _ = tx.send(outcome());
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Callback handles given to a [`CallbackTransport`] for one request.
#[derive(Clone)]
pub struct TransportCallbacks {
    settlement: Arc<Settlement>,
    response_type: ResponseType,
    request_url: String,
}

impl TransportCallbacks {
    /// The request finished.
    pub fn load(&self, response: RawResponse) {
        let url = self.request_url.clone();
        if !self.settlement.settle(|| Ok(build_response(response, url))) {
            debug!(url = %self.request_url, "dropping load callback for settled request");
        }
    }

    /// The request failed. `None` stands for a failure without details.
    pub fn error(&self, error: Option<String>) {
        let message = error
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "transport request failed".to_string());
        if !self.settlement.settle(|| Err(ClientError::Transport(message))) {
            debug!(url = %self.request_url, "dropping error callback for settled request");
        }
    }

    /// The request progressed. In streaming mode the response is handed out
    /// as soon as headers are in.
    pub fn ready_state_change(&self, response: RawResponse) {
        if self.response_type == ResponseType::Stream
            && response.ready_state == ReadyState::HeadersReceived
        {
            self.load(response);
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settlement.is_settled()
    }
}

/// Map the transport's status to the one the caller sees. Returns whether
/// the status was remapped.
pub fn normalize_status(status: u16) -> (StatusCode, bool) {
    if status == 0 {
        return (StatusCode::OK, true);
    }
    match StatusCode::from_u16(status) {
        Ok(code) => (code, false),
        Err(_) => (StatusCode::OK, true),
    }
}

fn build_response(raw: RawResponse, request_url: String) -> FetchResponse {
    let headers = headers::parse_raw_headers(raw.response_headers.as_deref());
    let (status, remapped) = normalize_status(raw.status);
    if remapped {
        warn!(status = raw.status, url = %request_url, "transport reported no usable status, assuming 200");
    }

    FetchResponse {
        status,
        status_text: raw
            .status_text
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "OK".to_string()),
        headers,
        url: raw.final_url.unwrap_or(request_url),
        body: raw.body,
    }
}

/// Body of a [`FetchResponse`].
#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(ByteStream),
}

/// A completed response, possibly with a body still being received.
#[derive(Debug)]
pub struct FetchResponse {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    url: String,
    body: ResponseBody,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: ResponseBody) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or("OK").to_string(),
            headers: HeaderMap::new(),
            url: String::new(),
            body,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `true` for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn has_body(&self) -> bool {
        !matches!(self.body, ResponseBody::Empty)
    }

    /// Take the body as a stream. `None` if the response has no body.
    pub fn body_stream(&mut self) -> Option<ByteStream> {
        match std::mem::take(&mut self.body) {
            ResponseBody::Empty => None,
            ResponseBody::Bytes(bytes) => Some(ByteStream::once(bytes)),
            ResponseBody::Stream(stream) => Some(stream),
        }
    }

    pub async fn bytes(mut self) -> Result<Bytes, ClientError> {
        match self.body_stream() {
            Some(stream) => stream.read_to_end().await,
            None => Ok(Bytes::new()),
        }
    }

    pub async fn text(self) -> Result<String, ClientError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Turn a non-2xx response into [`ClientError::Http`], reading the body
    /// for the error message.
    pub async fn error_for_status(self) -> Result<Self, ClientError> {
        if self.ok() {
            return Ok(self);
        }
        let status = self.status.as_u16();
        let reason = self.status_text.clone();
        let body = self.text().await.unwrap_or_default();
        Err(ClientError::Http {
            status,
            reason,
            body,
        })
    }
}

/// A request as handed to the adapter.
#[derive(Debug)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Body carried over from an upstream request whose kind is not known
    /// until it is read.
    pub carried_body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            body: None,
            carried_body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                self.headers.push((name.as_str().to_string(), value.to_string()));
            }
        }
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON text body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, ClientError> {
        let text = serde_json::to_string(value)?;
        Ok(self.body(text))
    }

    pub fn carried_body(mut self, body: Bytes) -> Self {
        self.carried_body = Some(body);
        self
    }

    /// Body text when the body is plain text.
    pub fn body_text(&self) -> Option<&str> {
        match &self.body {
            Some(RequestBody::Text(text)) => Some(text),
            _ => None,
        }
    }
}

/// Fetch implementation over a [`CallbackTransport`], or over a plain
/// reqwest client when no callback transport is installed.
#[derive(Clone, Default)]
pub struct FetchAdapter {
    transport: Option<Arc<dyn CallbackTransport>>,
    fallback: Option<reqwest::Client>,
    fallback_headers: Option<HashMap<String, String>>,
}

impl FetchAdapter {
    pub fn new<T: CallbackTransport + 'static>(transport: T) -> Self {
        Self {
            transport: Some(Arc::new(transport)),
            ..Self::default()
        }
    }

    /// An adapter that sends every request through `client` directly.
    pub fn native(client: reqwest::Client) -> Self {
        Self {
            fallback: Some(client),
            ..Self::default()
        }
    }

    /// Headers added to every request sent through the native client.
    pub fn with_fallback_headers(mut self, headers: Option<HashMap<String, String>>) -> Self {
        self.fallback_headers = headers;
        self
    }

    async fn fetch_native(
        &self,
        client: &reqwest::Client,
        request: FetchRequest,
    ) -> Result<FetchResponse, ClientError> {
        let headers = headers::to_plain_headers(&request.headers);
        let body = body::resolve_body(&request.method, request.body, request.carried_body).await?;

        debug!(method = %request.method, url = %request.url, "sending request natively");
        let mut builder = client.request(request.method, &request.url);
        builder = add_extra_headers(builder, &self.fallback_headers);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        let builder = native::apply_payload(builder, body.payload)?;

        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().to_string();
        let response_headers = response.headers().clone();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from));

        Ok(FetchResponse::new(status, ResponseBody::Stream(ByteStream::new(stream)))
            .with_headers(response_headers)
            .with_url(url))
    }
}

#[async_trait]
impl Fetch for FetchAdapter {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ClientError> {
        if request.url.is_empty() {
            return Err(ClientError::InvalidUrl("URL is required".to_string()));
        }
        let url = Url::parse(&request.url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        let Some(transport) = self.transport.as_ref() else {
            return match &self.fallback {
                Some(client) => self.fetch_native(client, request).await,
                None => Err(ClientError::TransportUnavailable),
            };
        };

        let headers = headers::to_plain_headers(&request.headers);
        let body = body::resolve_body(&request.method, request.body, request.carried_body).await?;
        let response_type = if transport.supports_streaming() {
            ResponseType::Stream
        } else {
            ResponseType::Buffer
        };

        let (settlement, outcome) = Settlement::new();
        let callbacks = TransportCallbacks {
            settlement,
            response_type,
            request_url: url.to_string(),
        };

        debug!(method = %request.method, url = %url, ?response_type, "dispatching request");
        transport.dispatch(
            TransportRequest {
                url: url.to_string(),
                method: request.method,
                headers,
                payload: body.payload,
                binary: body.binary,
                response_type,
            },
            callbacks,
        );

        outcome.await.map_err(|_| {
            ClientError::Transport("transport dropped the request without a response".to_string())
        })?
    }
}
