//! Frame codec for the chat completion stream.
//!
//! The server writes frames separated by a blank line, each usually
//! prefixed with `data: `:
//! ```text
//! data: {"response.created":{"chat_id":"...","response_id":"..."}}
//!
//! data: {"id":"...","choices":[{"delta":{"content":"Hel","status":"typing"}}]}
//!
//! data: {"id":"...","choices":[{"delta":{"content":"","status":"finished"}}]}
//! ```
//! A non-streaming answer arrives as a single JSON document with a top-level
//! `data` field and no blank-line terminator.

use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Prefix of data-bearing frames.
pub const DATA_PREFIX: &str = "data: ";

/// Separator between frames.
pub const FRAME_DELIMITER: &str = "\n\n";

/// Incremental splitter that carries undelimited text across reads.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buffer: String,
    // Trailing bytes of a UTF-8 sequence cut by a read boundary.
    pending: Vec<u8>,
}

impl FrameSplitter {
    /// Feed one read and drain every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find(FRAME_DELIMITER) {
            let frame = self.buffer[..pos].trim().to_string();
            self.buffer.drain(..pos + FRAME_DELIMITER.len());
            if !frame.is_empty() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            self.buffer
                .push_str(&String::from_utf8_lossy(&std::mem::take(&mut self.pending)));
        }
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty() && self.pending.is_empty()
    }

    /// Parse a complete payload in one shot.
    pub fn split_all(input: &str) -> Vec<String> {
        let mut splitter = Self::default();
        let mut frames = splitter.feed(input.as_bytes());
        frames.extend(splitter.finish());
        frames
    }

    fn decode(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, invalid) = rest.split_at(e.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &invalid[len..];
                        }
                        None => {
                            self.pending = invalid.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Shape of a parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Connection setup; carries no content.
    Handshake,
    /// A complete, non-streamed answer.
    Final(String),
    /// An incremental piece of the answer.
    Delta(String),
}

impl Frame {
    pub fn content(&self) -> &str {
        match self {
            Frame::Handshake => "",
            Frame::Final(content) | Frame::Delta(content) => content,
        }
    }

    pub fn into_content(self) -> String {
        match self {
            Frame::Handshake => String::new(),
            Frame::Final(content) | Frame::Delta(content) => content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    /// Top-level `id` field, when present.
    pub id: Option<String>,
    pub frame: Frame,
}

/// Parse and classify a raw frame. `None` if it is not valid JSON.
pub fn parse_frame(raw: &str) -> Option<ParsedFrame> {
    let body = raw.strip_prefix(DATA_PREFIX).unwrap_or(raw);
    let value: Value = serde_json::from_str(body).ok()?;

    let text_at = |pointer: &str| {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let frame = if value.get("data").is_some() {
        Frame::Final(text_at("/data/choices/0/message/content"))
    } else if value.get("choices").is_none() {
        Frame::Handshake
    } else {
        Frame::Delta(text_at("/choices/0/delta/content"))
    };

    Some(ParsedFrame {
        id: value.get("id").and_then(Value::as_str).map(str::to_string),
        frame,
    })
}

/// Display text carried by a raw frame. Unparsable frames yield `""`.
pub fn extract_content(raw: &str) -> String {
    parse_frame(raw)
        .map(|parsed| parsed.frame.into_content())
        .unwrap_or_default()
}

pub fn is_data_frame(raw: &str) -> bool {
    raw.starts_with(DATA_PREFIX)
}

/// Value of the first `"response_id"` string field in the frame.
pub fn response_id(raw: &str) -> Option<&str> {
    raw.match_indices("\"response_id\"")
        .find_map(|(pos, key)| string_value_after(&raw[pos + key.len()..]))
        .map(|value| value.split('"').next().unwrap_or(value))
        .filter(|value| !value.is_empty())
}

/// Whether the last `"status"` field in the frame starts with `finished`.
pub fn is_finished(raw: &str) -> bool {
    raw.rmatch_indices("\"status\"")
        .find_map(|(pos, key)| string_value_after(&raw[pos + key.len()..]))
        .is_some_and(|value| value.starts_with("finished"))
}

// Text following `: "` after a key, tolerating whitespace around the colon.
fn string_value_after(after_key: &str) -> Option<&str> {
    after_key
        .trim_start()
        .strip_prefix(':')?
        .trim_start()
        .strip_prefix('"')
}

/// Ordered log of frame identifiers seen by a client, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ResponseIdLog(Arc<Mutex<Vec<String>>>);

impl ResponseIdLog {
    pub fn record(&self, id: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Extract display text from a frame, recording its identifier.
    pub fn extract(&self, raw: &str) -> String {
        match parse_frame(raw) {
            Some(parsed) => {
                if let Some(id) = parsed.id {
                    self.record(id);
                }
                parsed.frame.into_content()
            }
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_two_delta_frames() {
        let input = "data: {\"id\":\"x\",\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n\
                     data: {\"id\":\"x\",\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n";
        let frames = FrameSplitter::split_all(input);

        assert_eq!(frames.len(), 2);
        let parsed: Vec<Frame> = frames
            .iter()
            .map(|f| parse_frame(f).unwrap().frame)
            .collect();
        assert_eq!(
            parsed,
            vec![Frame::Delta("a".to_string()), Frame::Delta("b".to_string())]
        );
        assert_eq!(extract_content(&frames[0]), "a");
        assert_eq!(extract_content(&frames[1]), "b");
    }

    #[test]
    fn test_carries_partial_frame_across_reads() {
        let mut splitter = FrameSplitter::default();
        assert!(splitter
            .feed(b"data: {\"choices\":[{\"delta\":{\"con")
            .is_empty());
        let frames = splitter.feed(b"tent\":\"hi\"}}]}\n\ndata: {\"id\"");
        assert_eq!(frames.len(), 1);
        assert_eq!(extract_content(&frames[0]), "hi");
        assert!(!splitter.is_empty_buffer());

        let frames = splitter.feed(b":\"y\"}\n\n");
        assert_eq!(frames, vec!["data: {\"id\":\"y\"}".to_string()]);
        assert!(splitter.is_empty_buffer());
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_carries_split_utf8_sequence() {
        let text = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\n";
        let bytes = text.as_bytes();
        // Cut inside the first multi-byte character.
        let cut = text.find('你').unwrap() + 1;

        let mut splitter = FrameSplitter::default();
        assert!(splitter.feed(&bytes[..cut]).is_empty());
        let frames = splitter.feed(&bytes[cut..]);
        assert_eq!(extract_content(&frames[0]), "你好");
    }

    #[test]
    fn test_finish_flushes_undelimited_document() {
        let mut splitter = FrameSplitter::default();
        let body = "{\"id\":\"x\",\"data\":{\"choices\":[{\"message\":{\"content\":\"done\"}}]}}";
        assert!(splitter.feed(body.as_bytes()).is_empty());
        assert_eq!(splitter.finish().as_deref(), Some(body));
    }

    #[test]
    fn test_handshake_detection() {
        let parsed = parse_frame("{\"id\":\"x\"}").unwrap();
        assert_eq!(parsed.frame, Frame::Handshake);
        assert_eq!(parsed.id.as_deref(), Some("x"));
        assert_eq!(extract_content("{\"id\":\"x\"}"), "");
    }

    #[test]
    fn test_final_detection() {
        let raw = "{\"id\":\"x\",\"data\":{\"choices\":[{\"message\":{\"content\":\"done\"}}]}}";
        assert_eq!(
            parse_frame(raw).unwrap().frame,
            Frame::Final("done".to_string())
        );
        assert_eq!(extract_content(raw), "done");
        assert_eq!(extract_content("{\"data\":{}}"), "");
    }

    #[test]
    fn test_delta_without_content_is_empty() {
        let raw = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}";
        assert_eq!(parse_frame(raw).unwrap().frame, Frame::Delta(String::new()));
    }

    #[test]
    fn test_malformed_frames_extract_to_empty() {
        assert_eq!(extract_content("data: {\"choices\":"), "");
        assert_eq!(extract_content(": keep-alive"), "");
        assert_eq!(extract_content(""), "");
        assert!(parse_frame("data: [DONE]").is_none());
    }

    #[test]
    fn test_response_id() {
        let raw = "data: {\"response.created\":{\"chat_id\":\"c\",\"response_id\":\"r-1\"}}";
        assert_eq!(response_id(raw), Some("r-1"));
        assert_eq!(response_id("data: {\"response_id\" : \"r-2\"}"), Some("r-2"));
        assert_eq!(response_id("data: {\"id\":\"x\"}"), None);
        assert_eq!(response_id("data: {\"response_id\":null}"), None);
    }

    #[test]
    fn test_is_finished() {
        assert!(is_finished(
            "data: {\"choices\":[{\"delta\":{\"content\":\"\",\"status\": \"finished\"}}]}"
        ));
        assert!(is_finished("data: {\"status\":\"finished_with_error\"}"));
        assert!(!is_finished("data: {\"status\":\"typing\"}"));
        assert!(!is_finished("data: {\"content\":\"finished\"}"));
        // Only the last status field counts.
        assert!(!is_finished(
            "data: {\"status\":\"finished\",\"choices\":[{\"delta\":{\"status\":\"typing\"}}]}"
        ));
    }

    #[test]
    fn test_response_id_log_records_in_order() {
        let log = ResponseIdLog::default();
        assert_eq!(log.extract("data: {\"id\":\"a\"}"), "");
        assert_eq!(
            log.extract("data: {\"id\":\"b\",\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"),
            "x"
        );
        assert_eq!(log.extract("not json"), "");
        assert_eq!(log.extract("{\"choices\":[]}"), "");
        assert_eq!(log.snapshot(), vec!["a".to_string(), "b".to_string()]);

        log.clear();
        assert!(log.is_empty());
    }
}
