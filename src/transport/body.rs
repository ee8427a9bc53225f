//! Request body classification.
//!
//! Every outbound body is reduced to one [`NormalizedBody`]: a [`Payload`]
//! the callback transport accepts, plus a flag telling it whether the payload
//! is binary.

use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;
use std::ops::Range;

use crate::client::ClientError;
use crate::stream::ByteStream;

/// A body whose bytes arrive asynchronously and must be fully read before
/// the transport can send them.
#[derive(Debug)]
pub struct Blob {
    content_type: Option<String>,
    source: ByteStream,
}

impl Blob {
    pub fn new(source: ByteStream) -> Self {
        Self {
            content_type: None,
            source,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub async fn materialize(self) -> Result<Bytes, ClientError> {
        self.source.read_to_end().await
    }
}

impl From<Bytes> for Blob {
    fn from(bytes: Bytes) -> Self {
        Self::new(ByteStream::once(bytes))
    }
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: Option<String>,
        content_type: Option<String>,
        data: Bytes,
    },
}

/// The closed set of body kinds a caller can hand to the adapter.
#[derive(Debug)]
pub enum RequestBody {
    Text(String),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
    Multipart(Vec<FormPart>),
    Blob(Blob),
    Buffer(Bytes),
    /// A window over a shared buffer.
    View { buffer: Bytes, range: Range<usize> },
    /// Any other structured value, sent as its textual serialization.
    Json(Value),
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Buffer(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Buffer(Bytes::from(bytes))
    }
}

/// Transport-native payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
    Multipart(Vec<FormPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBody {
    pub payload: Payload,
    pub binary: bool,
}

impl NormalizedBody {
    pub fn empty() -> Self {
        Self::text(String::new())
    }

    pub fn text(text: String) -> Self {
        Self {
            payload: Payload::Text(text),
            binary: false,
        }
    }

    pub fn binary(bytes: Bytes) -> Self {
        Self {
            payload: Payload::Binary(bytes),
            binary: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.payload {
            Payload::Text(text) => text.is_empty(),
            Payload::Binary(bytes) => bytes.is_empty(),
            Payload::Multipart(parts) => parts.is_empty(),
        }
    }
}

/// Convert an explicit body into its transport form.
pub async fn normalize_body(body: Option<RequestBody>) -> Result<NormalizedBody, ClientError> {
    let Some(body) = body else {
        return Ok(NormalizedBody::empty());
    };

    let normalized = match body {
        RequestBody::Text(text) => NormalizedBody::text(text),
        RequestBody::Form(pairs) => NormalizedBody::text(
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish(),
        ),
        RequestBody::Multipart(parts) => NormalizedBody {
            payload: Payload::Multipart(parts),
            binary: false,
        },
        RequestBody::Blob(blob) => NormalizedBody::binary(blob.materialize().await?),
        RequestBody::Buffer(bytes) => NormalizedBody::binary(bytes),
        RequestBody::View { buffer, range } => {
            if range.start > range.end || range.end > buffer.len() {
                return Err(ClientError::InvalidBody(format!(
                    "view {}..{} is outside a buffer of {} bytes",
                    range.start,
                    range.end,
                    buffer.len()
                )));
            }
            NormalizedBody::binary(buffer.slice(range))
        }
        RequestBody::Json(value) => NormalizedBody::text(value.to_string()),
    };

    Ok(normalized)
}

/// Pick the body to send for a request.
///
/// An explicit body wins. Otherwise a body carried over from an upstream
/// request, whose kind is unknown, is read as text first and as binary
/// second. GET and HEAD never carry a body.
pub async fn resolve_body(
    method: &Method,
    explicit: Option<RequestBody>,
    carried: Option<Bytes>,
) -> Result<NormalizedBody, ClientError> {
    if *method == Method::GET || *method == Method::HEAD {
        return Ok(NormalizedBody::empty());
    }

    if explicit.is_some() {
        return normalize_body(explicit).await;
    }

    let Some(carried) = carried else {
        return Ok(NormalizedBody::empty());
    };

    if let Ok(text) = std::str::from_utf8(&carried) {
        if !text.is_empty() {
            return Ok(NormalizedBody::text(text.to_string()));
        }
    }

    if !carried.is_empty() {
        return Ok(NormalizedBody::binary(carried));
    }

    Ok(NormalizedBody::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    #[tokio::test]
    async fn test_absent_body_is_empty_text() {
        let body = normalize_body(None).await.unwrap();
        assert_eq!(body, NormalizedBody::text(String::new()));
        assert!(!body.binary);
    }

    #[tokio::test]
    async fn test_text_passes_through() {
        let body = normalize_body(Some("hello".into())).await.unwrap();
        assert_eq!(body.payload, Payload::Text("hello".to_string()));
        assert!(!body.binary);
    }

    #[tokio::test]
    async fn test_form_is_url_encoded() {
        let form = RequestBody::Form(vec![
            ("q".to_string(), "a b".to_string()),
            ("lang".to_string(), "zh&en".to_string()),
        ]);
        let body = normalize_body(Some(form)).await.unwrap();
        assert_eq!(body.payload, Payload::Text("q=a+b&lang=zh%26en".to_string()));
        assert!(!body.binary);
    }

    #[tokio::test]
    async fn test_multipart_passes_through() {
        let parts = vec![FormPart::Text {
            name: "field".to_string(),
            value: "value".to_string(),
        }];
        let body = normalize_body(Some(RequestBody::Multipart(parts.clone())))
            .await
            .unwrap();
        assert_eq!(body.payload, Payload::Multipart(parts));
        assert!(!body.binary);
    }

    #[tokio::test]
    async fn test_blob_is_materialized() {
        let source = ByteStream::new(stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]));
        let blob = Blob::new(source).with_content_type("application/octet-stream");
        let body = normalize_body(Some(RequestBody::Blob(blob))).await.unwrap();
        assert_eq!(body, NormalizedBody::binary(Bytes::from_static(b"abcd")));
    }

    #[tokio::test]
    async fn test_blob_read_failure_propagates() {
        let source = ByteStream::new(stream::iter(vec![Err(ClientError::Transport(
            "disk gone".to_string(),
        ))]));
        let result = normalize_body(Some(RequestBody::Blob(Blob::new(source)))).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn test_buffer_shares_bytes() {
        let buffer = Bytes::from_static(b"\x00\x01\x02");
        let body = normalize_body(Some(RequestBody::Buffer(buffer.clone())))
            .await
            .unwrap();
        match body.payload {
            Payload::Binary(bytes) => assert_eq!(bytes.as_ptr(), buffer.as_ptr()),
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(body.binary);
    }

    #[tokio::test]
    async fn test_view_references_window() {
        let buffer = Bytes::from_static(b"0123456789");
        let body = normalize_body(Some(RequestBody::View {
            buffer: buffer.clone(),
            range: 2..5,
        }))
        .await
        .unwrap();
        assert_eq!(body, NormalizedBody::binary(Bytes::from_static(b"234")));

        let out_of_bounds = normalize_body(Some(RequestBody::View {
            buffer,
            range: 8..12,
        }))
        .await;
        assert!(matches!(out_of_bounds, Err(ClientError::InvalidBody(_))));
    }

    #[tokio::test]
    async fn test_other_values_fall_back_to_text() {
        let body = normalize_body(Some(RequestBody::Json(json!({"a": 1}))))
            .await
            .unwrap();
        assert_eq!(body, NormalizedBody::text("{\"a\":1}".to_string()));
    }

    #[tokio::test]
    async fn test_get_and_head_never_carry_a_body() {
        for method in [Method::GET, Method::HEAD] {
            let body = resolve_body(
                &method,
                Some("explicit".into()),
                Some(Bytes::from_static(b"carried")),
            )
            .await
            .unwrap();
            assert!(body.is_empty());
        }
    }

    #[tokio::test]
    async fn test_carried_body_prefers_text_then_binary() {
        let text = resolve_body(&Method::POST, None, Some(Bytes::from_static(b"plain")))
            .await
            .unwrap();
        assert_eq!(text, NormalizedBody::text("plain".to_string()));

        let binary = resolve_body(&Method::PUT, None, Some(Bytes::from_static(&[0xff, 0xfe])))
            .await
            .unwrap();
        assert_eq!(binary, NormalizedBody::binary(Bytes::from_static(&[0xff, 0xfe])));

        let empty = resolve_body(&Method::POST, None, Some(Bytes::new()))
            .await
            .unwrap();
        assert_eq!(empty, NormalizedBody::empty());
    }

    #[tokio::test]
    async fn test_explicit_body_wins_over_carried() {
        let body = resolve_body(
            &Method::POST,
            Some("explicit".into()),
            Some(Bytes::from_static(b"carried")),
        )
        .await
        .unwrap();
        assert_eq!(body, NormalizedBody::text("explicit".to_string()));
    }
}
