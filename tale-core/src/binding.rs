//! Whether a story accepts input from the active character.

use crate::story::{Character, Story};

/// How a story relates to the active character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStatus {
    /// The active character owns the story; choices may be submitted.
    Playable,
    /// No active character, or one with a different name.
    IdentityMismatch,
    /// The owning character was deleted. Terminal.
    Archived,
}

/// Classify `story` against the active character.
pub fn binding_status(story: &Story, active: Option<&Character>) -> BindingStatus {
    if story.archived {
        return BindingStatus::Archived;
    }

    match active {
        Some(character) if story.is_bound_to(&character.name) => BindingStatus::Playable,
        _ => BindingStatus::IdentityMismatch,
    }
}

/// Decides whether choice controls for a story are enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterBindingGate;

impl CharacterBindingGate {
    /// Whether choices may be submitted for `story`.
    pub fn accepts_input(story: &Story, active: Option<&Character>) -> bool {
        binding_status(story, active) == BindingStatus::Playable
    }

    /// Guidance to show instead of enabled controls, if any.
    pub fn notice(story: &Story, active: Option<&Character>) -> Option<String> {
        match binding_status(story, active) {
            BindingStatus::Playable => None,
            BindingStatus::Archived => Some(format!(
                "This story's character has been deleted. Create a character with the name \"{}\" to continue this adventure.",
                story.character.name
            )),
            BindingStatus::IdentityMismatch => Some(format!(
                "This story belongs to \"{}\". Switch to that character to continue this adventure.",
                story.character.name
            )),
        }
    }
}
