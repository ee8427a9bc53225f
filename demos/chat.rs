//! Interactive chat against the Qwen web API.
//!
//! Run with:
//! ```bash
//! export QWEN_TOKEN="your-token"
//! cargo run --example chat                     # scratch conversation
//! cargo run --example chat -- new qwen-max-latest  # fresh conversation
//! cargo run --example chat -- <chat-id>          # resume an existing one
//! ```
//! Each line read from stdin is sent as one turn; answers stream to stdout.

use futures::StreamExt;
use qwen_chat::session::DEFAULT_MODEL;
use qwen_chat::{Qwen, TurnOptions};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let client = Qwen::from_env()?;

    let mut args = std::env::args().skip(1);
    let mut session = match args.next().as_deref() {
        Some("new") => {
            let model = args.next().unwrap_or_else(|| DEFAULT_MODEL.to_string());
            client.new_session(model).await?
        }
        Some(id) => client.session(id, args.next().unwrap_or_else(|| DEFAULT_MODEL.to_string())),
        None => client.temp_session(),
    };
    eprintln!("session {} ({})", session.id(), session.model());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut frames = session.round(line, TurnOptions::default()).await?;
        while let Some(frame) = frames.next().await {
            print!("{}", client.extract_content(&frame?));
            std::io::stdout().flush()?;
        }
        println!();
    }

    Ok(())
}
