//! File-backed session repository.
//!
//! Keeps two JSON files in a directory, mirroring the two keys the browser
//! client stores: `stories.json` (a versioned list, most recent first) and
//! `character.json` (the active character, absent when none).

use crate::repository::{upsert_into, RepositoryError, SessionRepository, Upsert};
use crate::story::{Character, Story};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Current stories file version.
const STORIES_VERSION: u32 = 1;

const STORIES_FILE: &str = "stories.json";
const CHARACTER_FILE: &str = "character.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedStories {
    version: u32,
    stories: Vec<Story>,
}

/// Repository persisting to JSON files in one directory.
#[derive(Debug)]
pub struct JsonFileRepository {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileRepository {
    /// Open (creating if needed) a repository in `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stories_path(&self) -> PathBuf {
        self.dir.join(STORIES_FILE)
    }

    fn character_path(&self) -> PathBuf {
        self.dir.join(CHARACTER_FILE)
    }

    async fn load_stories(&self) -> Result<Vec<Story>, RepositoryError> {
        let Some(content) = read_optional(&self.stories_path()).await? else {
            return Ok(Vec::new());
        };

        let saved: SavedStories = serde_json::from_str(&content)?;
        if saved.version != STORIES_VERSION {
            return Err(RepositoryError::VersionMismatch {
                expected: STORIES_VERSION,
                found: saved.version,
            });
        }

        Ok(saved.stories)
    }

    async fn save_stories(&self, stories: Vec<Story>) -> Result<(), RepositoryError> {
        let saved = SavedStories {
            version: STORIES_VERSION,
            stories,
        };
        let content = serde_json::to_string_pretty(&saved)?;
        fs::write(self.stories_path(), content).await?;
        debug!(count = saved.stories.len(), dir = %self.dir.display(), "saved stories");
        Ok(())
    }
}

/// Read a file, treating a missing file as `None`.
async fn read_optional(path: &Path) -> Result<Option<String>, RepositoryError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SessionRepository for JsonFileRepository {
    async fn list(&self) -> Result<Vec<Story>, RepositoryError> {
        self.load_stories().await
    }

    async fn get(&self, id: &str) -> Result<Option<Story>, RepositoryError> {
        Ok(self.load_stories().await?.into_iter().find(|s| s.id == id))
    }

    async fn upsert(&self, story: Story) -> Result<Upsert, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut stories = self.load_stories().await?;
        let outcome = upsert_into(&mut stories, story);
        self.save_stories(stories).await?;
        Ok(outcome)
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut stories = self.load_stories().await?;
        let before = stories.len();
        stories.retain(|s| s.id != id);
        let removed = stories.len() != before;
        if removed {
            self.save_stories(stories).await?;
        }
        Ok(removed)
    }

    async fn active_character(&self) -> Result<Option<Character>, RepositoryError> {
        match read_optional(&self.character_path()).await? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    async fn set_active_character(&self, character: Character) -> Result<(), RepositoryError> {
        let content = serde_json::to_string_pretty(&character)?;
        fs::write(self.character_path(), content).await?;
        Ok(())
    }

    async fn clear_active_character(&self) -> Result<Option<Character>, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let previous = self.active_character().await?;
        match fs::remove_file(self.character_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(previous)
    }
}
