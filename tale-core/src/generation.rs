//! The seam between the engine and the storytelling service.

use crate::decoder::{EventStreamFraming, Framing, SingleShotFraming};
use crate::story::{Character, Story};
use async_trait::async_trait;
use bytes::Bytes;
use storyteller::{ByteStream, SceneContext, StoryRequest, Storyteller};
use thiserror::Error;

/// Errors from producing a generation output.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Storyteller error: {0}")]
    Service(#[from] storyteller::Error),

    #[error("Generation rejected: {0}")]
    Rejected(String),
}

/// How a streamed body is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingKind {
    /// `data: ` lines carrying JSON deltas, ended by `[DONE]` or a stop reason.
    EventStream,
    /// One read holding the whole text.
    SingleShot,
}

impl FramingKind {
    /// The decode strategy for this framing.
    pub fn strategy(self) -> Box<dyn Framing> {
        match self {
            FramingKind::EventStream => Box::new(EventStreamFraming::default()),
            FramingKind::SingleShot => Box::new(SingleShotFraming::default()),
        }
    }
}

/// What a generator hands back for one request.
pub enum GenerationOutput {
    /// The finished text.
    Content(String),
    /// A body still to be read and decoded.
    Stream { framing: FramingKind, body: ByteStream },
}

impl GenerationOutput {
    pub fn event_stream(body: ByteStream) -> Self {
        GenerationOutput::Stream {
            framing: FramingKind::EventStream,
            body,
        }
    }

    /// Wrap finished text in a one-chunk stream.
    pub fn single_shot(text: impl Into<String>) -> Self {
        let chunk: Result<Bytes, storyteller::Error> = Ok(Bytes::from(text.into()));
        GenerationOutput::Stream {
            framing: FramingKind::SingleShot,
            body: Box::pin(futures::stream::once(async move { chunk })),
        }
    }
}

impl std::fmt::Debug for GenerationOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationOutput::Content(text) => f.debug_tuple("Content").field(text).finish(),
            GenerationOutput::Stream { framing, .. } => f
                .debug_struct("Stream")
                .field("framing", framing)
                .finish_non_exhaustive(),
        }
    }
}

/// Produces the next story segment for a request.
#[async_trait]
pub trait StoryGenerator: Send + Sync {
    async fn generate(&self, request: &StoryRequest) -> Result<GenerationOutput, GenerationError>;
}

/// Request for the opening scene of a new story.
pub fn opening_request(character: &Character) -> StoryRequest {
    StoryRequest::opening(character.into())
}

/// Request for the scene that follows picking `choice` in `story`.
///
/// The story's character snapshot is used, not the active character.
pub fn continuation_request(story: &Story, choice: &str) -> StoryRequest {
    let context = story
        .history
        .iter()
        .map(|node| SceneContext {
            content: node.content.clone(),
            choice: node.selected_choice.clone(),
        })
        .collect();

    StoryRequest::opening((&story.character).into())
        .with_context(context)
        .with_scene(&story.current_node.content)
        .with_choice(choice)
}

/// Whether the storyteller is asked for a streamed or a buffered answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Streamed,
    Buffered,
}

/// [`StoryGenerator`] backed by the storytelling service.
#[derive(Clone)]
pub struct StorytellerGenerator {
    client: Storyteller,
    delivery: Delivery,
}

impl StorytellerGenerator {
    pub fn new(client: Storyteller, delivery: Delivery) -> Self {
        Self { client, delivery }
    }
}

#[async_trait]
impl StoryGenerator for StorytellerGenerator {
    async fn generate(&self, request: &StoryRequest) -> Result<GenerationOutput, GenerationError> {
        match self.delivery {
            Delivery::Streamed => Ok(GenerationOutput::event_stream(
                self.client.stream(request).await?,
            )),
            Delivery::Buffered => Ok(GenerationOutput::single_shot(
                self.client.complete(request).await?,
            )),
        }
    }
}
