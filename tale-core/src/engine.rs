//! TaleEngine - starting adventures and applying choices.
//!
//! Wires a [`StoryGenerator`] to the [`StorySessionStore`]: build the
//! request, decode the reply, parse it into a node, and commit the node.

use crate::decoder::{DecodeError, StreamDecoder};
use crate::generation::{
    continuation_request, opening_request, Delivery, GenerationError, StoryGenerator,
    StorytellerGenerator,
};
use crate::parser::parse;
use crate::persist::JsonFileRepository;
use crate::repository::{RepositoryError, SessionRepository};
use crate::session::{SessionError, StorySessionStore};
use crate::story::{Choice, Story, StoryNode};
use std::path::PathBuf;
use std::sync::Arc;
use storyteller::{StoryRequest, Storyteller, StorytellerConfig};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_DATA_DIR: &str = ".tale";

/// Errors from TaleEngine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No active character")]
    NoActiveCharacter,

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Decoding failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<storyteller::Error> for EngineError {
    fn from(e: storyteller::Error) -> Self {
        EngineError::Generation(GenerationError::Service(e))
    }
}

/// Configuration for an engine backed by the storytelling service and a
/// data directory.
#[derive(Debug, Clone)]
pub struct TaleConfig {
    pub storyteller: StorytellerConfig,
    pub data_dir: PathBuf,
    pub delivery: Delivery,
}

impl TaleConfig {
    pub fn new(storyteller: StorytellerConfig) -> Self {
        Self {
            storyteller,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            delivery: Delivery::default(),
        }
    }

    /// Read the storyteller settings from the environment. `TALE_DATA_DIR`
    /// overrides the data directory.
    pub fn from_env() -> Result<Self, storyteller::Error> {
        let mut config = Self::new(StorytellerConfig::from_env()?);
        if let Ok(dir) = std::env::var("TALE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }
}

/// The story engine.
pub struct TaleEngine<G, R> {
    generator: Arc<G>,
    store: StorySessionStore<R>,
}

impl TaleEngine<StorytellerGenerator, JsonFileRepository> {
    /// Build an engine that talks to the storytelling service and keeps its
    /// stories in `config.data_dir`.
    pub async fn from_config(config: TaleConfig) -> Result<Self, EngineError> {
        let client = Storyteller::new(config.storyteller)?;
        let repository = JsonFileRepository::open(&config.data_dir).await?;

        info!(data_dir = %config.data_dir.display(), "opened tale engine");
        Ok(Self::new(
            StorytellerGenerator::new(client, config.delivery),
            repository,
        ))
    }
}

impl<G: StoryGenerator, R: SessionRepository> TaleEngine<G, R> {
    pub fn new(generator: G, repository: R) -> Self {
        Self {
            generator: Arc::new(generator),
            store: StorySessionStore::new(repository),
        }
    }

    pub fn store(&self) -> &StorySessionStore<R> {
        &self.store
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Start a new story for the active character.
    pub async fn start_adventure(&self, cancel: &CancellationToken) -> Result<Story, EngineError> {
        self.open_story(cancel, None).await
    }

    /// Like [`start_adventure`](Self::start_adventure), publishing interim
    /// choices on `previews` while the opening scene streams in.
    pub async fn start_adventure_with_previews(
        &self,
        cancel: &CancellationToken,
        previews: &watch::Sender<Vec<Choice>>,
    ) -> Result<Story, EngineError> {
        self.open_story(cancel, Some(previews)).await
    }

    /// Pick `choice` in the story `story_id` and move it forward.
    ///
    /// Nothing is written unless a complete reply was decoded and parsed.
    pub async fn choose(
        &self,
        story_id: &str,
        choice: &str,
        cancel: &CancellationToken,
    ) -> Result<Story, EngineError> {
        self.advance_story(story_id, choice, cancel, None).await
    }

    /// Like [`choose`](Self::choose), publishing interim choices on
    /// `previews` while the next scene streams in.
    ///
    /// The channel is reset to empty when generation starts. The committed
    /// node is always parsed from the full text, not from a preview.
    pub async fn choose_with_previews(
        &self,
        story_id: &str,
        choice: &str,
        cancel: &CancellationToken,
        previews: &watch::Sender<Vec<Choice>>,
    ) -> Result<Story, EngineError> {
        self.advance_story(story_id, choice, cancel, Some(previews))
            .await
    }

    async fn open_story(
        &self,
        cancel: &CancellationToken,
        previews: Option<&watch::Sender<Vec<Choice>>>,
    ) -> Result<Story, EngineError> {
        let character = self
            .store
            .active_character()
            .await?
            .ok_or(EngineError::NoActiveCharacter)?;

        let node = self
            .generate_node(opening_request(&character), cancel, previews)
            .await?;
        Ok(self.store.create(&character, node).await?)
    }

    async fn advance_story(
        &self,
        story_id: &str,
        choice: &str,
        cancel: &CancellationToken,
        previews: Option<&watch::Sender<Vec<Choice>>>,
    ) -> Result<Story, EngineError> {
        let story = self
            .store
            .story(story_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(story_id.to_string()))?;
        let active = self.store.active_character().await?;

        let ticket = self.store.begin_advance(&story, active.as_ref())?;
        let request = continuation_request(ticket.story(), choice);

        let node = match self.generate_node(request, cancel, previews).await {
            Ok(node) => node,
            Err(e) => {
                warn!(story_id, error = %e, "choice not applied");
                return Err(e);
            }
        };

        Ok(self.store.advance(ticket, choice, node).await?)
    }

    async fn generate_node(
        &self,
        request: StoryRequest,
        cancel: &CancellationToken,
        previews: Option<&watch::Sender<Vec<Choice>>>,
    ) -> Result<StoryNode, EngineError> {
        let mut decoder = StreamDecoder::new();
        if let Some(previews) = previews {
            previews.send_replace(Vec::new());
            decoder = decoder.with_previews(previews);
        }

        let work = async {
            let output = self.generator.generate(&request).await?;
            let text = decoder.decode(output).await?;
            Ok::<_, EngineError>(parse(&text))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            node = work => node,
        }
    }
}
