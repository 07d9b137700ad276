//! Branching story engine driven by a streaming storyteller.
//!
//! This crate provides:
//! - Parsing of storyteller replies into story nodes with choices
//! - Decoding of event-stream and single-shot response bodies
//! - A story store with per-story advance guarding and character binding
//! - Story persistence in a data directory
//!
//! # Quick Start
//!
//! ```ignore
//! use tale_core::{Character, TaleConfig, TaleEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = TaleEngine::from_config(TaleConfig::from_env()?).await?;
//!     engine
//!         .store()
//!         .set_active_character(Character::new("Aria", "A wandering cartographer."))
//!         .await?;
//!
//!     let cancel = CancellationToken::new();
//!     let story = engine.start_adventure(&cancel).await?;
//!     println!("{}", story.current_node.content);
//!
//!     let first = story.current_node.choices[0].text.clone();
//!     let story = engine.choose(&story.id, &first, &cancel).await?;
//!     println!("{}", story.current_node.content);
//!     Ok(())
//! }
//! ```

pub mod binding;
pub mod decoder;
pub mod engine;
pub mod generation;
pub mod parser;
pub mod persist;
pub mod repository;
pub mod session;
pub mod story;
pub mod testing;

// Re-export for convenience
pub use binding::{binding_status, BindingStatus, CharacterBindingGate};
pub use decoder::{DecodeError, StreamDecoder};
pub use engine::{EngineError, TaleConfig, TaleEngine};
pub use generation::{Delivery, GenerationError, GenerationOutput, StoryGenerator};
pub use persist::JsonFileRepository;
pub use repository::{MemoryRepository, RepositoryError, SessionRepository};
pub use session::{AdvanceState, SessionError, StorySessionStore};
pub use story::{Character, Choice, Story, StoryNode};
