//! Incremental decoding of storyteller responses.
//!
//! A [`StreamDecoder`] reads a [`GenerationOutput`] to completion and returns
//! the full response text. Streamed bodies are interpreted by a [`Framing`]
//! strategy chosen from the output's [`FramingKind`](crate::generation::FramingKind):
//!
//! - [`EventStreamFraming`]: newline-delimited `data: ` lines, each either
//!   the `[DONE]` sentinel or a JSON chunk with a content delta.
//! - [`SingleShotFraming`]: the first read is the whole response.
//!
//! While an event stream is being read the decoder can publish interim
//! choice previews on a `watch` channel.

use crate::generation::GenerationOutput;
use crate::parser::preview_choices;
use crate::story::Choice;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Errors that end a decode.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Network error while reading response: {0}")]
    Network(String),

    #[error("Response stream ended before a terminal marker")]
    StreamIncomplete,

    #[error("Response contained no usable text")]
    EmptyContent,
}

/// A `data: ` payload that is not a valid chunk. Logged and skipped.
#[derive(Debug, Error)]
#[error("Malformed stream fragment: {0}")]
pub struct MalformedFragment(#[from] serde_json::Error);

/// A decode strategy for one body framing.
pub trait Framing: Send {
    /// Consume decoded text, appending response content to `text`.
    ///
    /// Returns `true` once a terminal condition has been seen.
    fn push(&mut self, chunk: &str, text: &mut String) -> bool;

    /// Called when the body ends without a terminal condition. Returns
    /// `true` if buffered input completed the response.
    fn finish(&mut self, text: &mut String) -> bool;

    /// Whether interim previews make sense for this framing.
    fn incremental(&self) -> bool {
        false
    }
}

/// Framing for `data: ` event streams.
#[derive(Debug, Default)]
pub struct EventStreamFraming {
    line: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Content and terminal flag carried by one chunk.
#[derive(Debug, PartialEq, Eq)]
struct Fragment {
    content: Option<String>,
    stop: bool,
}

fn parse_fragment(payload: &str) -> Result<Fragment, MalformedFragment> {
    let chunk: ChunkPayload = serde_json::from_str(payload)?;
    let first = chunk.choices.into_iter().next().unwrap_or_default();

    Ok(Fragment {
        content: first.delta.and_then(|d| d.content),
        stop: first.finish_reason.as_deref() == Some("stop"),
    })
}

impl EventStreamFraming {
    fn consume_line(&mut self, line: &str, text: &mut String) -> bool {
        let Some(payload) = line.strip_prefix("data: ") else {
            return false;
        };

        let payload = payload.trim();
        if payload.is_empty() {
            return false;
        }
        if payload == "[DONE]" {
            return true;
        }

        match parse_fragment(payload) {
            Ok(fragment) => {
                if let Some(content) = fragment.content {
                    text.push_str(&content);
                }
                fragment.stop
            }
            Err(error) => {
                warn!(%error, payload, "skipping stream fragment");
                false
            }
        }
    }
}

impl Framing for EventStreamFraming {
    fn push(&mut self, chunk: &str, text: &mut String) -> bool {
        self.line.push_str(chunk);

        while let Some(end) = self.line.find('\n') {
            let line: String = self.line.drain(..=end).collect();
            if self.consume_line(line.trim_end_matches(['\n', '\r']), text) {
                return true;
            }
        }
        false
    }

    fn finish(&mut self, text: &mut String) -> bool {
        let rest = std::mem::take(&mut self.line);
        !rest.is_empty() && self.consume_line(rest.trim_end_matches('\r'), text)
    }

    fn incremental(&self) -> bool {
        true
    }
}

/// Framing for bodies delivered in a single read.
#[derive(Debug, Default)]
pub struct SingleShotFraming;

impl Framing for SingleShotFraming {
    fn push(&mut self, chunk: &str, text: &mut String) -> bool {
        text.push_str(chunk);
        true
    }

    fn finish(&mut self, _text: &mut String) -> bool {
        false
    }
}

/// Reassembles UTF-8 sequences split across chunk boundaries.
#[derive(Debug, Default)]
struct Utf8Buffer {
    pending: Vec<u8>,
}

impl Utf8Buffer {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // Incomplete sequence at the end: hold it for the next chunk.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };

        let decoded = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
        self.pending.drain(..valid);
        decoded
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Reads generation outputs to their full text.
#[derive(Debug, Default)]
pub struct StreamDecoder<'a> {
    previews: Option<&'a watch::Sender<Vec<Choice>>>,
}

impl<'a> StreamDecoder<'a> {
    pub fn new() -> Self {
        Self { previews: None }
    }

    /// Publish interim choice previews on `sender` while decoding.
    ///
    /// The channel is reset to an empty list at the start of each decode,
    /// and a published preview never has fewer choices than the one before.
    pub fn with_previews(mut self, sender: &'a watch::Sender<Vec<Choice>>) -> Self {
        self.previews = Some(sender);
        self
    }

    /// Decode `output` into the full response text.
    pub async fn decode(&self, output: GenerationOutput) -> Result<String, DecodeError> {
        let text = match output {
            GenerationOutput::Content(text) => text,
            GenerationOutput::Stream { framing, body } => {
                self.decode_stream(framing.strategy(), body).await?
            }
        };

        if text.trim().is_empty() {
            return Err(DecodeError::EmptyContent);
        }
        Ok(text)
    }

    /// Read `body` with `framing` until a terminal condition.
    ///
    /// The body is owned by this call and dropped on every return path.
    pub async fn decode_stream<S, E>(
        &self,
        mut framing: Box<dyn Framing>,
        body: S,
    ) -> Result<String, DecodeError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let mut body = std::pin::pin!(body);
        let mut utf8 = Utf8Buffer::default();
        let mut text = String::new();
        let mut published = 0;

        if let Some(previews) = self.previews {
            previews.send_replace(Vec::new());
        }

        while let Some(chunk) = body.next().await {
            let bytes = chunk.map_err(|e| DecodeError::Network(e.to_string()))?;
            let decoded = utf8.push(&bytes);

            let before = text.len();
            let terminal = framing.push(&decoded, &mut text);

            if framing.incremental() && text.len() != before {
                self.publish_preview(&text, &mut published);
            }
            if terminal {
                debug!(len = text.len(), "response stream complete");
                return Ok(text);
            }
        }

        let tail = utf8.finish();
        let terminal =
            (!tail.is_empty() && framing.push(&tail, &mut text)) || framing.finish(&mut text);

        if terminal {
            debug!(len = text.len(), "response stream complete at close");
            Ok(text)
        } else {
            warn!(len = text.len(), "response stream closed without terminal marker");
            Err(DecodeError::StreamIncomplete)
        }
    }

    fn publish_preview(&self, text: &str, published: &mut usize) {
        let Some(previews) = self.previews else {
            return;
        };
        let Some(choices) = preview_choices(text) else {
            return;
        };
        if choices.len() < *published {
            return;
        }

        *published = choices.len();
        previews.send_if_modified(|current| {
            if *current == choices {
                false
            } else {
                *current = choices;
                true
            }
        });
    }
}
