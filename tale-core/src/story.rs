//! Story graph records: characters, nodes, choices and stories.
//!
//! Field names serialize in camelCase so saved sessions stay readable by
//! the browser client that shares the format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// The protagonist a story is bound to. Identity is the exact `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub backstory: String,
}

impl Character {
    pub fn new(name: impl Into<String>, backstory: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backstory: backstory.into(),
        }
    }
}

impl From<&Character> for storyteller::Hero {
    fn from(character: &Character) -> Self {
        storyteller::Hero::new(&character.name, &character.backstory)
    }
}

/// One selectable option of a node.
///
/// The id is only unique within the owning node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
}

impl Choice {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A generated narrative segment and the choices available from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryNode {
    pub id: String,
    pub content: String,
    pub choices: Vec<Choice>,
    /// Set once, when the node moves into history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_choice: Option<String>,
}

/// One playable adventure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    pub current_node: StoryNode,
    /// Nodes already left behind, oldest first. Append-only.
    pub history: Vec<StoryNode>,
    /// Snapshot taken when the story was created.
    pub character: Character,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
}

impl Story {
    /// Start a story for `character` at `initial_node`.
    pub fn new(character: &Character, initial_node: StoryNode) -> Self {
        Self {
            id: story_id(),
            title: format!("{}'s Adventure", character.name),
            current_node: initial_node,
            history: Vec::new(),
            character: character.clone(),
            last_updated: Utc::now(),
            archived: false,
        }
    }

    /// Whether this story belongs to the character called `name`.
    pub fn is_bound_to(&self, name: &str) -> bool {
        self.character.name == name
    }

    /// Move the current node into history, recording the choice taken from
    /// it, and make `next` the current node.
    pub(crate) fn advance(&mut self, selected_choice: &str, next: StoryNode) {
        let mut left = std::mem::replace(&mut self.current_node, next);
        left.selected_choice = Some(selected_choice.to_string());
        self.history.push(left);
        self.last_updated = Utc::now();
    }
}

static LAST_ID_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the epoch, strictly increasing within the process.
///
/// When the clock has not moved since the last call the previous value is
/// bumped by one, so two ids minted in the same tick never collide.
fn next_id_millis() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let mut last = LAST_ID_MILLIS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_ID_MILLIS.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Mint a `story-<millis>` id.
pub fn story_id() -> String {
    format!("story-{}", next_id_millis())
}

/// Mint a `node-<millis>` id.
pub fn node_id() -> String {
    format!("node-{}", next_id_millis())
}
