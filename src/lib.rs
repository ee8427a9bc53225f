//! # qwen-chat - streaming chat client for the Qwen web API
//!
//! A small, pragmatic Rust library that drives multi-turn conversations
//! against the Qwen chat service and streams the answers back frame by frame.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Fetch-style adapter over a callback-driven transport, with a guaranteed
//!   single settlement per request
//! - Incremental frame codec for the service's `data: ` stream framing
//! - Sessions that chain each turn to the previous response automatically
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! 1. **`sse`**: splits the streamed body into frames and extracts text
//! 2. **`transport`**: `FetchAdapter` over any `CallbackTransport`
//!    (`ReqwestTransport` by default)
//! 3. **`session`**: one conversation, one turn at a time
//! 4. **`client`**: the `Qwen` handle holding the bearer token
//!
//! ## Example
//! ```no_run
//! use futures::StreamExt;
//! use qwen_chat::{Qwen, TurnOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Qwen::from_env()?;
//!     let mut session = client.temp_session();
//!
//!     let mut frames = session.round("Hello!", TurnOptions::default()).await?;
//!     while let Some(frame) = frames.next().await {
//!         print!("{}", client.extract_content(&frame?));
//!     }
//!     drop(frames);
//!
//!     // Chained to the previous answer.
//!     println!("{}", session.ask("And again, shorter.").await?);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod http;
pub mod model;
pub mod options;
pub mod session;
pub mod sse;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use client::{ClientError, Qwen};
pub use options::{ClientOptions, SecretString, TransportOptions, TurnOptions};
pub use session::{Session, TurnState};
pub use sse::{extract_content, Frame};
pub use stream::ByteStream;
pub use transport::{CallbackTransport, Fetch, FetchAdapter, FetchRequest, FetchResponse};
