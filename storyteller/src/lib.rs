//! Minimal client for chat-completion storytelling services.
//!
//! This crate provides a focused client for OpenAI-compatible
//! `chat/completions` endpoints (OpenRouter by default) with:
//! - Single-shot completions that return the whole story segment
//! - Streamed completions that hand back the raw event-stream body
//! - The interactive-fiction prompt that asks for a `Choices:` block
//!
//! Decoding the event stream is left to the caller so that partial
//! output can be inspected while it arrives.

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when talking to the storytelling service.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Raw response body of a streamed completion.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Connection and sampling settings for [`Storyteller`].
#[derive(Debug, Clone)]
pub struct StorytellerConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    /// Upper bound for receiving the response status and headers. Reading
    /// the body afterwards is not bounded, so long streams are not cut off.
    pub timeout: Duration,
    /// Sent as `HTTP-Referer`, which OpenRouter uses for attribution.
    pub app_url: Option<String>,
    /// Sent as `X-Title`.
    pub app_title: Option<String>,
}

impl StorytellerConfig {
    /// Create a config with the given API key and default settings.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 1.0,
            top_p: 0.95,
            max_tokens: 8192,
            timeout: DEFAULT_TIMEOUT,
            app_url: None,
            app_title: None,
        }
    }

    /// Build a config from the environment.
    ///
    /// Reads `OPENROUTER_API_KEY` (required), and optionally
    /// `STORYTELLER_MODEL`, `STORYTELLER_BASE_URL` and `STORYTELLER_APP_URL`.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("OPENROUTER_API_KEY").map_err(|_| Error::NoApiKey)?;
        let mut config = Self::new(api_key);

        if let Ok(model) = std::env::var("STORYTELLER_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("STORYTELLER_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(app_url) = std::env::var("STORYTELLER_APP_URL") {
            config.app_url = Some(app_url);
        }

        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_app(mut self, url: impl Into<String>, title: impl Into<String>) -> Self {
        self.app_url = Some(url.into());
        self.app_title = Some(title.into());
        self
    }
}

/// Storytelling service client.
#[derive(Clone)]
pub struct Storyteller {
    client: reqwest::Client,
    config: StorytellerConfig,
}

impl Storyteller {
    /// Create a new client from a config.
    pub fn new(config: StorytellerConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create a client from the environment (see [`StorytellerConfig::from_env`]).
    pub fn from_env() -> Result<Self, Error> {
        Self::new(StorytellerConfig::from_env()?)
    }

    pub fn config(&self) -> &StorytellerConfig {
        &self.config
    }

    /// Request a story segment and return its full text.
    pub async fn complete(&self, request: &StoryRequest) -> Result<String, Error> {
        let response = self.send(request, false).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Parse("Invalid API response format".to_string()))
    }

    /// Request a story segment and return the raw event-stream body.
    pub async fn stream(&self, request: &StoryRequest) -> Result<ByteStream, Error> {
        let response = self.send(request, true).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Network(e.to_string())));

        Ok(Box::pin(stream))
    }

    async fn send(&self, request: &StoryRequest, stream: bool) -> Result<reqwest::Response, Error> {
        let api_request = self.build_api_request(request, stream);
        let headers = self.build_headers()?;

        debug!(
            model = %api_request.model,
            stream,
            context_len = request.context.len(),
            "requesting story segment"
        );

        let pending = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .headers(headers)
            .json(&api_request)
            .send();

        let response = tokio::time::timeout(self.config.timeout, pending)
            .await
            .map_err(|_| {
                Error::Network(format!(
                    "no response within {}s",
                    self.config.timeout.as_secs_f32()
                ))
            })?
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        Ok(response)
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        if let Some(ref url) = self.config.app_url {
            headers.insert(
                "HTTP-Referer",
                HeaderValue::from_str(url)
                    .map_err(|e| Error::Config(format!("Invalid app URL: {e}")))?,
            );
        }
        if let Some(ref title) = self.config.app_title {
            headers.insert(
                "X-Title",
                HeaderValue::from_str(title)
                    .map_err(|e| Error::Config(format!("Invalid app title: {e}")))?,
            );
        }
        Ok(headers)
    }

    fn build_api_request(&self, request: &StoryRequest, stream: bool) -> ApiRequest {
        ApiRequest {
            model: self.config.model.clone(),
            messages: vec![
                ApiMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ApiMessage {
                    role: "user".to_string(),
                    content: request.user_prompt(),
                },
            ],
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            stream,
        }
    }
}

// ============================================================================
// Public types
// ============================================================================

/// The protagonist the story is told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hero {
    pub name: String,
    pub backstory: String,
}

impl Hero {
    pub fn new(name: impl Into<String>, backstory: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backstory: backstory.into(),
        }
    }
}

/// One earlier scene and the choice the player took from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneContext {
    pub content: String,
    pub choice: Option<String>,
}

/// A request for the next story segment.
#[derive(Debug, Clone)]
pub struct StoryRequest {
    pub hero: Hero,
    /// Narrative of the scene the player is leaving, if any.
    pub current_scene: Option<String>,
    /// Choice the player picked in the current scene.
    pub selected_choice: Option<String>,
    /// Older scenes, oldest first.
    pub context: Vec<SceneContext>,
}

impl StoryRequest {
    /// Request the opening scene of a new story.
    pub fn opening(hero: Hero) -> Self {
        Self {
            hero,
            current_scene: None,
            selected_choice: None,
            context: Vec::new(),
        }
    }

    pub fn with_scene(mut self, scene: impl Into<String>) -> Self {
        self.current_scene = Some(scene.into());
        self
    }

    pub fn with_choice(mut self, choice: impl Into<String>) -> Self {
        self.selected_choice = Some(choice.into());
        self
    }

    pub fn with_context(mut self, context: Vec<SceneContext>) -> Self {
        self.context = context;
        self
    }

    /// Render the user message sent alongside [`SYSTEM_PROMPT`].
    pub fn user_prompt(&self) -> String {
        let mut prompt = format!(
            "Character Name: {}\nCharacter Backstory: {}\n",
            self.hero.name, self.hero.backstory
        );

        if !self.context.is_empty() {
            let context = self
                .context
                .iter()
                .map(|scene| match &scene.choice {
                    Some(choice) => format!("{}\nPlayer chose: {choice}", scene.content),
                    None => scene.content.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            prompt.push_str(&format!("Story Context:\n{context}\n"));
        }

        match &self.current_scene {
            Some(scene) => prompt.push_str(&format!("Current Scene: {scene}\n")),
            None => prompt.push_str("Start a new story\n"),
        }

        if let Some(choice) = &self.selected_choice {
            prompt.push_str(&format!("Player chose: {choice}\n"));
        }

        prompt.push_str("Continue the story and provide 2-3 choices.");
        prompt
    }
}

/// Instructions that make the model answer in the `Choices:` block format.
pub const SYSTEM_PROMPT: &str = "\
You are a creative storyteller crafting an interactive adventure story in any language.
Create engaging narratives with multiple choice options (2-3) at key decision points.
Each response should include a story segment followed by clear choices for the reader.
Maintain consistency with the character's backstory and previous choices.
Keep responses concise but immersive.

Format your response EXACTLY like this, with a blank line before \"Choices:\":
[Story content here]

Choices:
1. [First choice]
2. [Second choice]
3. [Optional third choice]

Always include the \"Choices:\" header followed by numbered options.
Keep story segments between 100-200 words for better pacing.";

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    top_p: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
