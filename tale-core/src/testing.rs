//! Testing utilities for the story engine.
//!
//! This module provides tools for deterministic tests without API calls:
//! - `MockGenerator` that answers with scripted replies
//! - Helpers that build event-stream bodies from plain text

use crate::generation::{GenerationError, GenerationOutput, StoryGenerator};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use storyteller::{ByteStream, StoryRequest};
use tokio::sync::Notify;

/// A scripted reply from the mock generator.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Finished text, returned as-is.
    Content(String),
    /// Text delivered in one read.
    SingleShot(String),
    /// Raw body chunks with event-stream framing.
    EventStream(Vec<String>),
    /// The request fails before any output.
    Fail(String),
}

impl MockReply {
    /// Stream `text` as event-stream deltas of about `piece` characters,
    /// followed by `[DONE]`.
    pub fn streamed(text: &str, piece: usize) -> Self {
        let mut lines = delta_lines(text, piece);
        lines.push("data: [DONE]\n".to_string());
        MockReply::EventStream(lines)
    }

    /// Stream `text` as deltas but close without a terminal marker.
    pub fn truncated(text: &str, piece: usize) -> Self {
        MockReply::EventStream(delta_lines(text, piece))
    }
}

/// A generator that returns scripted replies in order.
#[derive(Default)]
pub struct MockGenerator {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<StoryRequest>>,
    hold: Option<Arc<Notify>>,
}

impl MockGenerator {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            hold: None,
        }
    }

    /// Make every request wait for a permit on `gate` before answering.
    pub fn with_hold(mut self, gate: Arc<Notify>) -> Self {
        self.hold = Some(gate);
        self
    }

    /// Add a reply to the queue.
    pub fn queue_reply(&self, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<StoryRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StoryGenerator for MockGenerator {
    async fn generate(&self, request: &StoryRequest) -> Result<GenerationOutput, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(gate) = &self.hold {
            gate.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| MockReply::Fail("no more scripted replies".to_string()));

        match reply {
            MockReply::Content(text) => Ok(GenerationOutput::Content(text)),
            MockReply::SingleShot(text) => Ok(GenerationOutput::single_shot(text)),
            MockReply::EventStream(chunks) => Ok(GenerationOutput::event_stream(byte_stream(chunks))),
            MockReply::Fail(message) => Err(GenerationError::Rejected(message)),
        }
    }
}

/// Format a response the way the storyteller is asked to.
pub fn story_text(narrative: &str, choices: &[&str]) -> String {
    let mut text = format!("{narrative}\n\nChoices:\n");
    for (i, choice) in choices.iter().enumerate() {
        text.push_str(&format!("{}. {choice}\n", i + 1));
    }
    text
}

/// One `data: ` line carrying `content` as a delta.
pub fn delta_line(content: &str) -> String {
    let chunk = serde_json::json!({
        "choices": [{ "delta": { "content": content }, "finish_reason": null }]
    });
    format!("data: {chunk}\n")
}

/// Split `text` into delta lines of at most `piece` characters each.
pub fn delta_lines(text: &str, piece: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(piece.max(1))
        .map(|part| delta_line(&part.iter().collect::<String>()))
        .collect()
}

/// A body that yields `chunks` and then closes.
pub fn byte_stream(chunks: Vec<String>) -> ByteStream {
    Box::pin(futures::stream::iter(
        chunks.into_iter().map(|c| Ok::<_, storyteller::Error>(Bytes::from(c))),
    ))
}

/// A body that yields `chunks` and then fails with a network error.
pub fn failing_stream(chunks: Vec<String>) -> ByteStream {
    let items = chunks
        .into_iter()
        .map(|c| Ok::<_, storyteller::Error>(Bytes::from(c)))
        .chain(std::iter::once(Err(storyteller::Error::Network(
            "connection reset".to_string(),
        ))));
    Box::pin(futures::stream::iter(items))
}
