//! Chat sessions and the per-turn streaming protocol.
//!
//! A [`Session`] is one linear conversation. Each call to
//! [`Session::round`] sends one user message and yields the raw frames of
//! the answer as they arrive. Two protocol side effects happen inline:
//!
//! - the first `data: ` frame naming a `response_id` becomes the parent of
//!   the next turn,
//! - a `data: ` frame whose status starts with `finished` ends the turn.
//!
//! The stream borrows the session mutably, so a second turn cannot start
//! while one is still being read.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use tracing::debug;
use url::Url;

use crate::client::{ClientError, Qwen};
use crate::model::TurnRequest;
use crate::options::TurnOptions;
use crate::sse::{self, FrameSplitter};
use crate::stream::ByteStream;
use crate::transport::FetchRequest;

/// Id of the shared scratch conversation.
pub const SCRATCH_SESSION_ID: &str = "078c6d24-3c49-499a-ab42-7716068ff459";

/// Model used by the scratch conversation.
pub const SCRATCH_MODEL: &str = "qwen3-coder-30b-a3b-instruct";

pub const DEFAULT_MODEL: &str = "qwen3-30b-a3b";

/// Raw frames of one turn.
pub type FrameStream<'a> = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// No turn in flight.
    #[default]
    Idle,
    /// Turn sent, no response id seen yet.
    AwaitingChainId,
    /// Response id captured, reading the rest of the answer.
    Streaming,
}

/// Side effects of one frame on the turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub chain_id: Option<String>,
    pub finished: bool,
}

/// State machine of a single turn, independent of any I/O.
#[derive(Debug, Clone)]
pub struct TurnProtocol {
    state: TurnState,
}

impl TurnProtocol {
    pub fn start() -> Self {
        Self {
            state: TurnState::AwaitingChainId,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn observe(&mut self, frame: &str) -> Observation {
        let mut observation = Observation::default();
        if self.state == TurnState::Idle || !sse::is_data_frame(frame) {
            return observation;
        }

        if self.state == TurnState::AwaitingChainId {
            if let Some(id) = sse::response_id(frame) {
                observation.chain_id = Some(id.to_string());
                self.state = TurnState::Streaming;
            }
        }

        if sse::is_finished(frame) {
            observation.finished = true;
            self.state = TurnState::Idle;
        }

        observation
    }

    pub fn end(&mut self) {
        self.state = TurnState::Idle;
    }
}

pub struct Session {
    id: String,
    model: String,
    parent_id: Option<String>,
    state: TurnState,
    client: Qwen,
}

impl Session {
    pub(crate) fn new(client: Qwen, id: String, model: String) -> Self {
        Self {
            id,
            model,
            parent_id: None,
            state: TurnState::Idle,
            client,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Response id the next turn will be chained to.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn turn_state(&self) -> TurnState {
        self.state
    }

    /// Send `message` and stream the raw frames of the answer.
    ///
    /// Fails before any frame is produced if the session has no id, no
    /// token is set, the server answers with a non-2xx status, or the
    /// response has no body. Use [`Qwen::extract_content`] or
    /// [`sse::extract_content`] to turn frames into text.
    pub async fn round<'a>(
        &'a mut self,
        message: &str,
        options: TurnOptions,
    ) -> Result<FrameStream<'a>, ClientError> {
        if self.id.is_empty() {
            return Err(ClientError::InvalidState("Session has no id".to_string()));
        }

        let endpoint = self.client.endpoint("/v2/chat/completions");
        let mut url = Url::parse(&endpoint)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
        url.query_pairs_mut().append_pair("chat_id", &self.id);

        let turn = TurnRequest::new(
            &self.id,
            self.parent_id.as_deref(),
            &self.model,
            message,
            options,
        );
        let request = FetchRequest::post(url.as_str())
            .headers(&self.client.headers()?)
            .json(&turn)?;

        let mut response = self
            .client
            .fetcher()
            .fetch(request)
            .await?
            .error_for_status()
            .await?;
        let body = response
            .body_stream()
            .ok_or(ClientError::StreamUnavailable)?;

        debug!(session_id = %self.id, parent_id = ?self.parent_id, "turn started");
        Ok(Box::pin(turn_frames(ActiveTurn::begin(self, body))))
    }

    /// Run a whole turn and return the answer text.
    pub async fn ask(&mut self, message: &str) -> Result<String, ClientError> {
        let client = self.client.clone();
        let mut frames = self.round(message, TurnOptions::default()).await?;

        let mut answer = String::new();
        while let Some(frame) = frames.next().await {
            answer.push_str(&client.extract_content(&frame?));
        }
        Ok(answer)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("parent_id", &self.parent_id)
            .field("state", &self.state)
            .finish()
    }
}

/// A turn being read. Dropping it releases the body and idles the session.
struct ActiveTurn<'a> {
    session: &'a mut Session,
    body: ByteStream,
    protocol: TurnProtocol,
}

impl<'a> ActiveTurn<'a> {
    fn begin(session: &'a mut Session, body: ByteStream) -> Self {
        let protocol = TurnProtocol::start();
        session.state = protocol.state();
        Self {
            session,
            body,
            protocol,
        }
    }

    /// Apply a frame's side effects. Returns `true` once the turn is over.
    fn observe(&mut self, frame: &str) -> bool {
        let observation = self.protocol.observe(frame);
        if let Some(chain_id) = observation.chain_id {
            debug!(session_id = %self.session.id, %chain_id, "captured response id");
            self.session.parent_id = Some(chain_id);
        }
        self.session.state = self.protocol.state();
        observation.finished
    }
}

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        self.body.cancel();
        self.protocol.end();
        self.session.state = TurnState::Idle;
    }
}

fn turn_frames(
    mut turn: ActiveTurn<'_>,
) -> impl Stream<Item = Result<String, ClientError>> + Send + '_ {
    async_stream::try_stream! {
        let mut splitter = FrameSplitter::default();
        let mut finished = false;
        let mut count = 0usize;

        while let Some(chunk) = turn.body.next().await {
            let chunk = chunk?;
            for frame in splitter.feed(&chunk) {
                finished = turn.observe(&frame);
                count += 1;
                yield frame;
                if finished {
                    break;
                }
            }
            if finished {
                break;
            }
        }

        if !finished {
            if let Some(frame) = splitter.finish() {
                turn.observe(&frame);
                count += 1;
                yield frame;
            }
        }

        debug!(frames = count, finished, "turn ended");
    }
}
