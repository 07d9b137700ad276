//! StorySessionStore - owns the story graph.
//!
//! All reads and writes go through an injected [`SessionRepository`]. The
//! store adds the rules on top of it: how stories are created and advanced,
//! when they are archived, and the per-story guard that keeps two advances
//! of the same story from interleaving.

use crate::binding::{binding_status, BindingStatus};
use crate::repository::{RepositoryError, SessionRepository, Upsert};
use crate::story::{Character, Story, StoryNode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from StorySessionStore operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Story {story_id} is archived and can no longer advance")]
    InvalidTransition { story_id: String },

    #[error("Story {story_id} belongs to {expected}, not the active character")]
    IdentityMismatch { story_id: String, expected: String },

    #[error("Story {story_id} is already processing a choice")]
    AlreadyProcessing { story_id: String },

    #[error("Story not found: {0}")]
    NotFound(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Advance state of one story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceState {
    Idle,
    Advancing,
}

type StateTable = Arc<Mutex<HashMap<String, AdvanceState>>>;

fn lock(table: &StateTable) -> std::sync::MutexGuard<'_, HashMap<String, AdvanceState>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Permission to advance one story, held while its next node is generated.
///
/// Dropping the ticket returns the story to [`AdvanceState::Idle`], whether
/// or not the advance was committed.
#[derive(Debug)]
pub struct AdvanceTicket {
    story: Story,
    states: StateTable,
}

impl AdvanceTicket {
    /// The story as it was when the ticket was issued.
    pub fn story(&self) -> &Story {
        &self.story
    }
}

impl Drop for AdvanceTicket {
    fn drop(&mut self) {
        lock(&self.states).remove(&self.story.id);
    }
}

/// Story graph rules over a session repository.
pub struct StorySessionStore<R> {
    repository: Arc<R>,
    states: StateTable,
}

impl<R> Clone for StorySessionStore<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            states: Arc::clone(&self.states),
        }
    }
}

impl<R: SessionRepository> StorySessionStore<R> {
    pub fn new(repository: R) -> Self {
        Self::from_shared(Arc::new(repository))
    }

    pub fn from_shared(repository: Arc<R>) -> Self {
        Self {
            repository,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Create a story for `character` at `initial_node` and store it first.
    pub async fn create(
        &self,
        character: &Character,
        initial_node: StoryNode,
    ) -> Result<Story, SessionError> {
        let story = Story::new(character, initial_node);
        self.repository.upsert(story.clone()).await?;

        info!(story_id = %story.id, character = %character.name, "created story");
        Ok(story)
    }

    /// Current advance state of a story.
    pub fn advance_state(&self, story_id: &str) -> AdvanceState {
        lock(&self.states)
            .get(story_id)
            .copied()
            .unwrap_or(AdvanceState::Idle)
    }

    /// Move `story` from Idle to Advancing.
    ///
    /// Fails if the story is not playable by `active`, or if another
    /// advance of the same story is still pending.
    pub fn begin_advance(
        &self,
        story: &Story,
        active: Option<&Character>,
    ) -> Result<AdvanceTicket, SessionError> {
        match binding_status(story, active) {
            BindingStatus::Playable => {}
            BindingStatus::Archived => {
                return Err(SessionError::InvalidTransition {
                    story_id: story.id.clone(),
                })
            }
            BindingStatus::IdentityMismatch => {
                return Err(SessionError::IdentityMismatch {
                    story_id: story.id.clone(),
                    expected: story.character.name.clone(),
                })
            }
        }

        let mut states = lock(&self.states);
        if states.get(&story.id) == Some(&AdvanceState::Advancing) {
            return Err(SessionError::AlreadyProcessing {
                story_id: story.id.clone(),
            });
        }
        states.insert(story.id.clone(), AdvanceState::Advancing);

        Ok(AdvanceTicket {
            story: story.clone(),
            states: Arc::clone(&self.states),
        })
    }

    /// Commit an advance: the current node moves into history with
    /// `selected_choice` recorded, and `next_node` becomes current.
    ///
    /// The stored record is re-read first, so a story archived while the
    /// node was being generated is still refused.
    pub async fn advance(
        &self,
        ticket: AdvanceTicket,
        selected_choice: &str,
        next_node: StoryNode,
    ) -> Result<Story, SessionError> {
        let mut story = match self.repository.get(&ticket.story.id).await? {
            Some(stored) => stored,
            None => ticket.story.clone(),
        };

        if story.archived {
            return Err(SessionError::InvalidTransition { story_id: story.id });
        }

        story.advance(selected_choice, next_node);

        if self.repository.upsert(story.clone()).await? == Upsert::Inserted {
            warn!(story_id = %story.id, "advanced story was missing from the repository, inserted it");
        }

        // The repository keeps an archival that landed after the check above.
        if let Some(stored) = self.repository.get(&story.id).await? {
            if stored.archived {
                warn!(story_id = %story.id, "story was archived while advancing");
            }
            story = stored;
        }

        info!(
            story_id = %story.id,
            history_len = story.history.len(),
            "advanced story"
        );
        Ok(story)
    }

    /// Archive every story bound to `character_name`. Returns how many
    /// stories changed.
    pub async fn on_character_deleted(&self, character_name: &str) -> Result<usize, SessionError> {
        let mut archived = 0;

        for mut story in self.repository.list().await? {
            if story.archived || !story.is_bound_to(character_name) {
                continue;
            }
            story.archived = true;
            self.repository.upsert(story).await?;
            archived += 1;
        }

        info!(character = character_name, archived, "archived stories of deleted character");
        Ok(archived)
    }

    pub fn binding_status(&self, story: &Story, active: Option<&Character>) -> BindingStatus {
        binding_status(story, active)
    }

    /// All stories, most recently created first.
    pub async fn stories(&self) -> Result<Vec<Story>, SessionError> {
        Ok(self.repository.list().await?)
    }

    pub async fn story(&self, id: &str) -> Result<Option<Story>, SessionError> {
        Ok(self.repository.get(id).await?)
    }

    pub async fn active_stories(&self) -> Result<Vec<Story>, SessionError> {
        let mut stories = self.stories().await?;
        stories.retain(|s| !s.archived);
        Ok(stories)
    }

    pub async fn archived_stories(&self) -> Result<Vec<Story>, SessionError> {
        let mut stories = self.stories().await?;
        stories.retain(|s| s.archived);
        Ok(stories)
    }

    /// Delete a story. Returns whether it existed.
    pub async fn delete_story(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.repository.delete(id).await?)
    }

    pub async fn active_character(&self) -> Result<Option<Character>, SessionError> {
        Ok(self.repository.active_character().await?)
    }

    /// Make `character` the active character.
    ///
    /// Stories of a previous character are left as they are; they simply
    /// stop being playable until that name is active again.
    pub async fn set_active_character(&self, character: Character) -> Result<(), SessionError> {
        Ok(self.repository.set_active_character(character).await?)
    }

    /// Delete the active character, archiving its stories first.
    pub async fn clear_active_character(&self) -> Result<Option<Character>, SessionError> {
        if let Some(character) = self.repository.active_character().await? {
            self.on_character_deleted(&character.name).await?;
        }
        Ok(self.repository.clear_active_character().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_with_id;
    use crate::repository::MemoryRepository;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn aria() -> Character {
        Character::new("Aria", "A cartographer.")
    }

    fn node(id: &str) -> StoryNode {
        parse_with_id("Scene.\n\nChoices:\n1. Left\n2. Right\n", id)
    }

    fn store() -> StorySessionStore<MemoryRepository> {
        StorySessionStore::new(MemoryRepository::with_character(aria()))
    }

    #[tokio::test]
    async fn test_create_stores_story_first() {
        let store = store();
        let first = store.create(&aria(), node("node-1")).await.unwrap();
        let second = store.create(&aria(), node("node-2")).await.unwrap();

        assert_ne!(first.id, second.id);
        assert!(first.id.starts_with("story-"));
        assert_eq!(first.title, "Aria's Adventure");

        let ids: Vec<String> = store.stories().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, [second.id, first.id]);
    }

    #[tokio::test]
    async fn test_advance_appends_history() {
        let store = store();
        let story = store.create(&aria(), node("node-1")).await.unwrap();

        let ticket = store.begin_advance(&story, Some(&aria())).unwrap();
        assert_eq!(store.advance_state(&story.id), AdvanceState::Advancing);

        let advanced = store.advance(ticket, "Left", node("node-2")).await.unwrap();

        assert_eq!(store.advance_state(&story.id), AdvanceState::Idle);
        assert_eq!(advanced.history.len(), 1);
        assert_eq!(advanced.history[0].id, "node-1");
        assert_eq!(advanced.history[0].selected_choice.as_deref(), Some("Left"));
        assert_eq!(advanced.current_node.id, "node-2");
        assert_eq!(store.story(&story.id).await.unwrap().unwrap(), advanced);
    }

    #[tokio::test]
    async fn test_second_advance_rejected_while_pending() {
        let store = store();
        let story = store.create(&aria(), node("node-1")).await.unwrap();

        let ticket = store.begin_advance(&story, Some(&aria())).unwrap();
        let second = store.begin_advance(&story, Some(&aria()));
        assert!(matches!(second, Err(SessionError::AlreadyProcessing { .. })));

        drop(ticket);
        assert!(store.begin_advance(&story, Some(&aria())).is_ok());
    }

    #[tokio::test]
    async fn test_guard_is_per_story() {
        let store = store();
        let a = store.create(&aria(), node("node-1")).await.unwrap();
        let b = store.create(&aria(), node("node-2")).await.unwrap();

        let _ta = store.begin_advance(&a, Some(&aria())).unwrap();
        assert!(store.begin_advance(&b, Some(&aria())).is_ok());
    }

    #[tokio::test]
    async fn test_begin_advance_checks_binding() {
        let store = store();
        let story = store.create(&aria(), node("node-1")).await.unwrap();
        let bram = Character::new("Bram", "A smith.");

        assert!(matches!(
            store.begin_advance(&story, Some(&bram)),
            Err(SessionError::IdentityMismatch { .. })
        ));
        assert!(matches!(
            store.begin_advance(&story, None),
            Err(SessionError::IdentityMismatch { .. })
        ));
        assert_eq!(store.advance_state(&story.id), AdvanceState::Idle);
    }

    #[tokio::test]
    async fn test_archived_while_pending_is_refused() {
        let store = store();
        let story = store.create(&aria(), node("node-1")).await.unwrap();

        let ticket = store.begin_advance(&story, Some(&aria())).unwrap();
        store.on_character_deleted("Aria").await.unwrap();

        let result = store.advance(ticket, "Left", node("node-2")).await;
        assert!(matches!(result, Err(SessionError::InvalidTransition { .. })));

        let stored = store.story(&story.id).await.unwrap().unwrap();
        assert!(stored.history.is_empty());
        assert_eq!(store.advance_state(&story.id), AdvanceState::Idle);
    }

    /// Holds back writes of advanced, unarchived stories until released.
    struct HeldAdvanceRepository {
        inner: MemoryRepository,
        release: Notify,
    }

    #[async_trait]
    impl SessionRepository for HeldAdvanceRepository {
        async fn list(&self) -> Result<Vec<Story>, RepositoryError> {
            self.inner.list().await
        }

        async fn get(&self, id: &str) -> Result<Option<Story>, RepositoryError> {
            self.inner.get(id).await
        }

        async fn upsert(&self, story: Story) -> Result<Upsert, RepositoryError> {
            if !story.history.is_empty() && !story.archived {
                self.release.notified().await;
            }
            self.inner.upsert(story).await
        }

        async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
            self.inner.delete(id).await
        }

        async fn active_character(&self) -> Result<Option<Character>, RepositoryError> {
            self.inner.active_character().await
        }

        async fn set_active_character(&self, character: Character) -> Result<(), RepositoryError> {
            self.inner.set_active_character(character).await
        }

        async fn clear_active_character(&self) -> Result<Option<Character>, RepositoryError> {
            self.inner.clear_active_character().await
        }
    }

    #[tokio::test]
    async fn test_archival_during_advance_write_is_kept() {
        let store = StorySessionStore::new(HeldAdvanceRepository {
            inner: MemoryRepository::with_character(aria()),
            release: Notify::new(),
        });
        let story = store.create(&aria(), node("node-1")).await.unwrap();
        let ticket = store.begin_advance(&story, Some(&aria())).unwrap();

        let (advanced, cleared) = tokio::join!(store.advance(ticket, "Left", node("node-2")), async {
            let cleared = store.clear_active_character().await;
            store.repository().release.notify_one();
            cleared
        });

        assert_eq!(cleared.unwrap().map(|c| c.name).as_deref(), Some("Aria"));
        let stored = store.story(&story.id).await.unwrap().unwrap();
        assert!(stored.archived);
        if let Ok(advanced) = advanced {
            assert!(advanced.archived);
            assert_eq!(stored.history.len(), 1);
        }
        assert_eq!(store.advance_state(&story.id), AdvanceState::Idle);
    }

    #[tokio::test]
    async fn test_advance_reinserts_missing_story() {
        let store = store();
        let story = store.create(&aria(), node("node-1")).await.unwrap();
        let ticket = store.begin_advance(&story, Some(&aria())).unwrap();

        store.delete_story(&story.id).await.unwrap();
        let advanced = store.advance(ticket, "Right", node("node-2")).await.unwrap();

        assert_eq!(advanced.history.len(), 1);
        assert!(store.story(&story.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_character_archives_only_its_stories() {
        let store = store();
        let mine = store.create(&aria(), node("node-1")).await.unwrap();
        let theirs = store
            .create(&Character::new("Bram", "A smith."), node("node-2"))
            .await
            .unwrap();

        let cleared = store.clear_active_character().await.unwrap();
        assert_eq!(cleared.unwrap().name, "Aria");
        assert!(store.active_character().await.unwrap().is_none());

        assert!(store.story(&mine.id).await.unwrap().unwrap().archived);
        assert!(!store.story(&theirs.id).await.unwrap().unwrap().archived);
        assert_eq!(store.archived_stories().await.unwrap().len(), 1);
        assert_eq!(store.active_stories().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_archival_is_monotonic() {
        let store = store();
        let story = store.create(&aria(), node("node-1")).await.unwrap();

        store.clear_active_character().await.unwrap();
        store.set_active_character(aria()).await.unwrap();
        assert_eq!(store.on_character_deleted("Bram").await.unwrap(), 0);

        let stored = store.story(&story.id).await.unwrap().unwrap();
        assert!(stored.archived);
        assert_eq!(
            store.binding_status(&stored, Some(&aria())),
            BindingStatus::Archived
        );
        assert!(matches!(
            store.begin_advance(&stored, Some(&aria())),
            Err(SessionError::InvalidTransition { .. })
        ));
    }
}
