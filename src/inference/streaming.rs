//! NDJSON streaming response parser for Ollama chat completions.
//!
//! Reads a response body as a byte stream, splits it into lines, parses each
//! line as an `OllamaChatChunk`, and flattens every chunk into zero or more
//! `BackendEvent`s (text fragments first, then tool calls).

use std::collections::VecDeque;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};

use super::errors::InferenceError;
use super::types::{BackendEvent, OllamaChatChunk, ToolCallIntent};

// ─── NDJSON line parser ──────────────────────────────────────────────────────

/// Parse a raw NDJSON byte stream into `BackendEvent`s.
///
/// The stream ends after the chunk flagged `done`, when the body ends, or
/// after the first error item.
pub fn parse_ndjson_stream<S, B, E>(
    body: S,
) -> impl Stream<Item = Result<BackendEvent, InferenceError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let state = StreamState {
        body: Box::pin(body),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }

            if state.finished {
                return None;
            }

            // Complete line in the buffer?
            if let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                state.process_line(&String::from_utf8_lossy(&line));
                continue;
            }

            // Need more data from the body
            match state.body.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    state.pending.push_back(Err(InferenceError::StreamError {
                        reason: format!("stream read error: {e}"),
                    }));
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    state.process_line(&String::from_utf8_lossy(&rest));
                    state.finished = true;
                }
            }
        }
    })
}

// ─── Stream State ────────────────────────────────────────────────────────────

struct StreamState<S> {
    body: Pin<Box<S>>,
    /// Bytes of the current, not yet terminated line.
    buffer: Vec<u8>,
    /// Events parsed but not yet yielded.
    pending: VecDeque<Result<BackendEvent, InferenceError>>,
    finished: bool,
}

impl<S> StreamState<S> {
    fn process_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || self.finished {
            return;
        }

        match parse_chunk(line) {
            Ok((events, done)) => {
                self.pending.extend(events);
                if done {
                    self.finished = true;
                }
            }
            Err(e) => self.pending.push_back(Err(e)),
        }
    }
}

/// Parse one NDJSON line into its events and `done` flag.
pub fn parse_chunk(
    line: &str,
) -> Result<(Vec<Result<BackendEvent, InferenceError>>, bool), InferenceError> {
    let chunk: OllamaChatChunk =
        serde_json::from_str(line).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse NDJSON chunk: {e} (data: {line})"),
        })?;

    if let Some(error) = chunk.error {
        return Err(InferenceError::StreamError { reason: error });
    }

    let mut events = Vec::new();
    if let Some(message) = chunk.message {
        if let Some(content) = message.content.filter(|c| !c.is_empty()) {
            events.push(Ok(BackendEvent::Content(content)));
        }
        for call in message.tool_calls.unwrap_or_default() {
            let intent = ToolCallIntent::from_raw(
                call.id.as_deref(),
                &call.function.name,
                call.function.arguments,
            );
            if let Ok(ref intent) = intent {
                tracing::debug!(tool = %intent.qualified_name, id = %intent.id, "model requested tool");
            }
            events.push(intent.map(BackendEvent::ToolCall));
        }
    }

    Ok((events, chunk.done))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
