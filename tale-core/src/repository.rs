//! Storage interface for stories and the active character.

use crate::story::{Character, Story};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Outcome of [`SessionRepository::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A story with the same id was replaced in place.
    Replaced,
    /// No story had the id; it was inserted at the front.
    Inserted,
}

/// Stories ordered most-recently-created first, plus a single
/// active-character slot.
///
/// Writes replace whole records. There is no version check: the last
/// writer wins.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Story>, RepositoryError>;

    async fn get(&self, id: &str) -> Result<Option<Story>, RepositoryError>;

    /// Replace the story with the same id, or insert it at the front.
    ///
    /// Never clears `archived` on a stored story.
    async fn upsert(&self, story: Story) -> Result<Upsert, RepositoryError>;

    /// Remove a story. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, RepositoryError>;

    async fn active_character(&self) -> Result<Option<Character>, RepositoryError>;

    async fn set_active_character(&self, character: Character) -> Result<(), RepositoryError>;

    /// Empty the slot, returning what it held.
    async fn clear_active_character(&self) -> Result<Option<Character>, RepositoryError>;
}

/// Upsert into an ordered story list.
///
/// A replaced record keeps `archived` set if it was set before, so a stale
/// copy written after an archival cannot revive the story.
pub(crate) fn upsert_into(stories: &mut Vec<Story>, mut story: Story) -> Upsert {
    match stories.iter_mut().find(|s| s.id == story.id) {
        Some(existing) => {
            story.archived |= existing.archived;
            *existing = story;
            Upsert::Replaced
        }
        None => {
            stories.insert(0, story);
            Upsert::Inserted
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    stories: Vec<Story>,
    character: Option<Character>,
}

/// In-memory repository, used by tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the repository with an active character.
    pub fn with_character(character: Character) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                stories: Vec::new(),
                character: Some(character),
            }),
        }
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn list(&self) -> Result<Vec<Story>, RepositoryError> {
        Ok(self.state.read().await.stories.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Story>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.stories.iter().find(|s| s.id == id).cloned())
    }

    async fn upsert(&self, story: Story) -> Result<Upsert, RepositoryError> {
        Ok(upsert_into(&mut self.state.write().await.stories, story))
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.stories.len();
        state.stories.retain(|s| s.id != id);
        Ok(state.stories.len() != before)
    }

    async fn active_character(&self) -> Result<Option<Character>, RepositoryError> {
        Ok(self.state.read().await.character.clone())
    }

    async fn set_active_character(&self, character: Character) -> Result<(), RepositoryError> {
        self.state.write().await.character = Some(character);
        Ok(())
    }

    async fn clear_active_character(&self) -> Result<Option<Character>, RepositoryError> {
        Ok(self.state.write().await.character.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_with_id;

    fn story(id: &str) -> Story {
        let mut story = Story::new(
            &Character::new("Aria", "A cartographer."),
            parse_with_id("Start.", "node-1"),
        );
        story.id = id.to_string();
        story
    }

    #[tokio::test]
    async fn test_upsert_inserts_at_front() {
        let repo = MemoryRepository::new();

        assert_eq!(repo.upsert(story("story-1")).await.unwrap(), Upsert::Inserted);
        assert_eq!(repo.upsert(story("story-2")).await.unwrap(), Upsert::Inserted);

        let ids: Vec<String> = repo.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["story-2", "story-1"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let repo = MemoryRepository::new();
        repo.upsert(story("story-1")).await.unwrap();
        repo.upsert(story("story-2")).await.unwrap();

        let mut updated = story("story-1");
        updated.title = "Renamed".to_string();
        assert_eq!(repo.upsert(updated).await.unwrap(), Upsert::Replaced);

        let stories = repo.list().await.unwrap();
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[1].title, "Renamed");
    }

    #[tokio::test]
    async fn test_upsert_never_clears_archived() {
        let repo = MemoryRepository::new();
        let mut archived = story("story-1");
        archived.archived = true;
        repo.upsert(archived).await.unwrap();

        let mut stale = story("story-1");
        stale.title = "Stale copy".to_string();
        assert_eq!(repo.upsert(stale).await.unwrap(), Upsert::Replaced);

        let stored = repo.get("story-1").await.unwrap().unwrap();
        assert!(stored.archived);
        assert_eq!(stored.title, "Stale copy");
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let repo = MemoryRepository::new();
        repo.upsert(story("story-1")).await.unwrap();

        assert!(repo.get("story-1").await.unwrap().is_some());
        assert!(repo.delete("story-1").await.unwrap());
        assert!(!repo.delete("story-1").await.unwrap());
        assert!(repo.get("story-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_character_slot() {
        let repo = MemoryRepository::new();
        assert!(repo.active_character().await.unwrap().is_none());

        repo.set_active_character(Character::new("Aria", "x"))
            .await
            .unwrap();
        assert_eq!(repo.active_character().await.unwrap().unwrap().name, "Aria");

        let cleared = repo.clear_active_character().await.unwrap();
        assert_eq!(cleared.unwrap().name, "Aria");
        assert!(repo.active_character().await.unwrap().is_none());
    }
}
