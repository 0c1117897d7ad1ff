//! Line-oriented decoding of streaming provider responses (SSE and NDJSON)

use super::{ChunkStream, ProviderResult};
use crate::error::ProviderError;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

/// Outcome of parsing one line of a streaming body
#[derive(Debug, PartialEq)]
pub enum LineEvent {
    /// Text to forward to the consumer
    Chunk(String),
    /// Keep-alive, metadata or empty delta
    Skip,
    /// Provider signalled the end of the stream
    Done,
    /// Provider reported an error inside the stream
    Error(ProviderError),
}

/// Accumulates raw bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and drain every complete line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            lines.push(line);
        }
        lines
    }

    /// Take whatever is left once the body ends
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

struct DecodeState<S, F> {
    body: Pin<Box<S>>,
    buffer: LineBuffer,
    ready: VecDeque<ProviderResult<String>>,
    finished: bool,
    parse: F,
}

impl<S, F> DecodeState<S, F>
where
    F: Fn(&str) -> LineEvent,
{
    fn apply(&mut self, line: &str) {
        match (self.parse)(line) {
            LineEvent::Chunk(text) => self.ready.push_back(Ok(text)),
            LineEvent::Skip => {}
            LineEvent::Done => self.finished = true,
            LineEvent::Error(e) => {
                self.ready.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Turn a byte stream into a stream of text chunks using a per-line parser
pub fn decode_lines<S, E, F>(body: S, parse: F) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
    F: Fn(&str) -> LineEvent + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        buffer: LineBuffer::new(),
        ready: VecDeque::new(),
        finished: false,
        parse,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    for line in state.buffer.push(&bytes) {
                        state.apply(&line);
                        if state.finished {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    state.ready.push_back(Err(ProviderError::Stream(e.to_string())));
                    state.finished = true;
                }
                None => {
                    if let Some(line) = state.buffer.finish() {
                        state.apply(&line);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
