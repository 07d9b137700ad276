//! QA tests for stories kept in a data directory.
//!
//! These tests verify that stories and the active character survive a
//! reopen, and that the files keep the camelCase field names.
//! Run with: `cargo test -p tale-core --test qa_persistence`

use tale_core::engine::TaleEngine;
use tale_core::persist::JsonFileRepository;
use tale_core::testing::{story_text, MockGenerator, MockReply};
use tale_core::{BindingStatus, Character};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn aria() -> Character {
    Character::new("Aria", "A wandering cartographer.")
}

async fn engine_in(
    dir: &TempDir,
    replies: Vec<MockReply>,
) -> TaleEngine<MockGenerator, JsonFileRepository> {
    let repository = JsonFileRepository::open(dir.path())
        .await
        .expect("Failed to open repository");
    TaleEngine::new(MockGenerator::new(replies), repository)
}

// =============================================================================
// TEST 1: Story played across two sessions
// =============================================================================

#[tokio::test]
async fn test_story_continues_after_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let cancel = CancellationToken::new();

    let story_id = {
        let engine = engine_in(
            &temp_dir,
            vec![MockReply::streamed(
                &story_text("A ruined tower.", &["Climb", "Circle it"]),
                8,
            )],
        )
        .await;
        engine.store().set_active_character(aria()).await.unwrap();
        engine.start_adventure(&cancel).await.unwrap().id
    };

    let engine = engine_in(
        &temp_dir,
        vec![MockReply::Content(story_text(
            "The stairs hold.",
            &["Keep climbing", "Rest"],
        ))],
    )
    .await;

    let active = engine.store().active_character().await.unwrap();
    assert_eq!(active.as_ref().map(|c| c.name.as_str()), Some("Aria"));

    let story = engine.store().story(&story_id).await.unwrap().unwrap();
    assert_eq!(
        engine.store().binding_status(&story, active.as_ref()),
        BindingStatus::Playable
    );

    let story = engine.choose(&story_id, "Climb", &cancel).await.unwrap();
    assert_eq!(story.history.len(), 1);
    assert_eq!(story.history[0].content, "A ruined tower.");

    let reopened = JsonFileRepository::open(temp_dir.path()).await.unwrap();
    let engine = TaleEngine::new(MockGenerator::default(), reopened);
    let stored = engine.store().story(&story_id).await.unwrap().unwrap();
    assert_eq!(stored, story);
}

// =============================================================================
// TEST 2: File layout
// =============================================================================

#[tokio::test]
async fn test_stories_file_uses_camel_case() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let engine = engine_in(
        &temp_dir,
        vec![
            MockReply::Content(story_text("Dunes.", &["North", "South"])),
            MockReply::Content(story_text("An oasis.", &["Drink", "Hide"])),
        ],
    )
    .await;
    let cancel = CancellationToken::new();

    engine.store().set_active_character(aria()).await.unwrap();
    let story = engine.start_adventure(&cancel).await.unwrap();
    engine.choose(&story.id, "North", &cancel).await.unwrap();

    let content = tokio::fs::read_to_string(temp_dir.path().join("stories.json"))
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&content).unwrap();

    assert_eq!(json["version"], 1);
    let saved = &json["stories"][0];
    assert_eq!(saved["id"], story.id.as_str());
    assert!(saved.get("currentNode").is_some());
    assert!(saved.get("lastUpdated").is_some());
    assert_eq!(saved["history"][0]["selectedChoice"], "North");
    assert!(saved["currentNode"].get("selectedChoice").is_none());
    assert_eq!(saved["character"]["name"], "Aria");
}

// =============================================================================
// TEST 3: Archived stories stay archived
// =============================================================================

#[tokio::test]
async fn test_archived_flag_survives_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let cancel = CancellationToken::new();

    {
        let engine = engine_in(
            &temp_dir,
            vec![MockReply::Content(story_text("Snow.", &["Dig", "Wait"]))],
        )
        .await;
        engine.store().set_active_character(aria()).await.unwrap();
        engine.start_adventure(&cancel).await.unwrap();
        engine.store().clear_active_character().await.unwrap();
    }

    let engine = engine_in(&temp_dir, Vec::new()).await;
    engine.store().set_active_character(aria()).await.unwrap();

    let archived = engine.store().archived_stories().await.unwrap();
    assert_eq!(archived.len(), 1);
    assert!(engine.store().active_stories().await.unwrap().is_empty());

    let active = engine.store().active_character().await.unwrap();
    assert_eq!(
        engine.store().binding_status(&archived[0], active.as_ref()),
        BindingStatus::Archived
    );
}
