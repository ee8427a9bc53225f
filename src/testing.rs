//! Test doubles shared by unit tests: a scripted [`Fetch`], a one-shot local
//! HTTP server and a log capture.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::client::ClientError;
use crate::stream::ByteStream;
use crate::transport::{Fetch, FetchRequest, FetchResponse, ResponseBody};

/// Replays queued responses and records every request it receives.
pub struct FakeFetch {
    responses: Mutex<VecDeque<FetchResponse>>,
    requests: Mutex<Vec<FetchRequest>>,
}

/// Request line and body of a recorded request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    body: Option<String>,
}

impl RecordedRequest {
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn body_json(&self) -> Value {
        serde_json::from_str(self.body_text().unwrap_or("null")).unwrap()
    }
}

impl FakeFetch {
    pub fn new(responses: Vec<FetchResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| RecordedRequest {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                body: request.body_text().map(str::to_string),
            })
            .collect()
    }
}

#[async_trait]
impl Fetch for FakeFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ClientError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ClientError::Transport("no scripted response left".to_string()))
    }
}

pub fn json_response(status: StatusCode, value: Value) -> FetchResponse {
    FetchResponse::new(status, ResponseBody::Bytes(Bytes::from(value.to_string())))
}

/// A streamed body made of `chunks`, counting how often it is released.
pub fn counted_stream(
    chunks: Vec<Result<&'static str, ClientError>>,
    releases: &Arc<AtomicUsize>,
) -> ByteStream {
    let items: Vec<Result<Bytes, ClientError>> = chunks
        .into_iter()
        .map(|chunk| chunk.map(|text| Bytes::from_static(text.as_bytes())))
        .collect();
    let releases = releases.clone();
    ByteStream::new(stream::iter(items)).with_release_hook(move || {
        releases.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::Transport("reader already closed".to_string()))
    })
}

pub fn stream_response(body: ByteStream) -> FetchResponse {
    FetchResponse::new(StatusCode::OK, ResponseBody::Stream(body))
}

/// Serve one `200 OK` response on a local port. The handle resolves to the
/// raw request text once the response is written.
pub async fn serve_once(
    content_type: &'static str,
    body: &'static str,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });
    (url, server)
}

/// Read a request head and as much body as its `content-length` announces.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let read = socket.read(&mut chunk).await.unwrap();
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buffer[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buffer.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Formatted log output collected from a scoped subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let logs = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || logs.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Lines logged at `level`, e.g. `"WARN"`.
    pub fn lines_at(&self, level: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.split_whitespace().nth(1) == Some(level))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
