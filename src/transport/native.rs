//! A [`CallbackTransport`] backed by reqwest.
//!
//! Each dispatched request runs on its own tokio task and reports back
//! through the callbacks like a browser-side cross-origin helper would:
//! streamed requests report `HeadersReceived` with the live body, buffered
//! requests report `HeadersReceived` first and `load` once the body is read.

use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use std::collections::HashMap;
use tracing::debug;

use super::headers::render_raw_headers;
use super::{
    CallbackTransport, FormPart, Payload, RawResponse, ReadyState, ResponseBody, ResponseType,
    TransportCallbacks, TransportRequest,
};
use crate::client::ClientError;
use crate::http::{add_extra_headers, build_http_client};
use crate::options::TransportOptions;
use crate::stream::ByteStream;

/// Attach a normalized payload to a reqwest request.
pub fn apply_payload(builder: RequestBuilder, payload: Payload) -> Result<RequestBuilder, ClientError> {
    let builder = match payload {
        Payload::Text(text) if text.is_empty() => builder,
        Payload::Text(text) => builder.body(text),
        Payload::Binary(bytes) => builder.body(bytes),
        Payload::Multipart(parts) => builder.multipart(multipart_form(parts)?),
    };
    Ok(builder)
}

fn multipart_form(parts: Vec<FormPart>) -> Result<Form, ClientError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name, value),
            FormPart::File {
                name,
                file_name,
                content_type,
                data,
            } => {
                let mut file = Part::bytes(data.to_vec());
                if let Some(file_name) = file_name {
                    file = file.file_name(file_name);
                }
                if let Some(content_type) = content_type {
                    file = file.mime_str(&content_type)?;
                }
                form.part(name, file)
            }
        };
    }
    Ok(form)
}

pub struct ReqwestTransport {
    client: Client,
    extra_headers: Option<HashMap<String, String>>,
    streaming: bool,
}

impl ReqwestTransport {
    pub fn new(options: &TransportOptions) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(options)?,
            extra_headers: options.extra_headers.clone(),
            streaming: true,
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            extra_headers: None,
            streaming: true,
        }
    }

    /// Deliver whole bodies through `load` instead of streaming them.
    pub fn buffered(mut self) -> Self {
        self.streaming = false;
        self
    }

    fn build(&self, request: TransportRequest) -> Result<RequestBuilder, ClientError> {
        let mut builder = self.client.request(request.method, &request.url);
        builder = add_extra_headers(builder, &self.extra_headers);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        apply_payload(builder, request.payload)
    }
}

impl CallbackTransport for ReqwestTransport {
    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    fn dispatch(&self, request: TransportRequest, callbacks: TransportCallbacks) {
        let response_type = request.response_type;
        let builder = match self.build(request) {
            Ok(builder) => builder,
            Err(e) => {
                callbacks.error(Some(e.to_string()));
                return;
            }
        };

        tokio::spawn(async move {
            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    callbacks.error(Some(e.to_string()));
                    return;
                }
            };

            let status = response.status();
            let raw_headers = render_raw_headers(response.headers());
            let final_url = response.url().to_string();
            let head = RawResponse::new(status.as_u16(), ReadyState::HeadersReceived)
                .with_status_text(status.canonical_reason().unwrap_or_default())
                .with_headers(raw_headers.clone())
                .with_final_url(final_url.clone());

            match response_type {
                ResponseType::Stream => {
                    let body = response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(ClientError::from));
                    callbacks.ready_state_change(
                        head.with_body(ResponseBody::Stream(ByteStream::new(body))),
                    );
                }
                ResponseType::Buffer => {
                    callbacks.ready_state_change(head);
                    match response.bytes().await {
                        Ok(bytes) => callbacks.load(
                            RawResponse::new(status.as_u16(), ReadyState::Done)
                                .with_status_text(status.canonical_reason().unwrap_or_default())
                                .with_headers(raw_headers)
                                .with_final_url(final_url)
                                .with_body(ResponseBody::Bytes(bytes)),
                        ),
                        Err(e) => callbacks.error(Some(e.to_string())),
                    }
                }
            }
            debug!(status = status.as_u16(), "transport request delivered");
        });
    }
}
