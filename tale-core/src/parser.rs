//! Splits storyteller output into a narrative and its numbered choices.
//!
//! The accepted shape is:
//!
//! ```text
//! <narrative>
//!
//! Choices:
//! 1. <choice>
//! 2. <choice>
//! ```
//!
//! Parsing runs in two stages. [`split_segments`] finds the header line
//! (`Choices:` or `Options:`, any case, directly after a blank line) and
//! cuts the text there; [`match_choice_line`] then recognizes numbered
//! lines in the block that follows. A node never comes out without
//! choices: when none are found the two [`FALLBACK_CHOICES`] are used.

use crate::story::{node_id, Choice, StoryNode};
use tracing::debug;

/// Substituted when a response yields no choices.
pub const FALLBACK_CHOICES: [&str; 2] = ["Continue the adventure", "Take a different path"];

const HEADERS: [&str; 2] = ["choices:", "options:"];

/// Narrative and choice block of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segments<'a> {
    /// Trimmed text before the header (the whole text when there is none).
    pub narrative: &'a str,
    /// Everything after the header line, if a header was found.
    pub choices: Option<&'a str>,
}

/// Cut `text` at the first header line that follows a blank line.
pub fn split_segments(text: &str) -> Segments<'_> {
    let mut offset = 0;
    let mut previous_blank = false;

    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);

        if previous_blank && is_header(body) {
            return Segments {
                narrative: text[..offset].trim(),
                choices: Some(&text[offset + line.len()..]),
            };
        }

        previous_blank = body.trim().is_empty();
        offset += line.len();
    }

    Segments {
        narrative: text.trim(),
        choices: None,
    }
}

fn is_header(line: &str) -> bool {
    let line = line.trim();
    HEADERS.iter().any(|h| line.eq_ignore_ascii_case(h))
}

/// Match `<ws>* <digits> . <ws>+ <text>` and return the trimmed text.
pub fn match_choice_line(line: &str) -> Option<&str> {
    let rest = line.trim_start();
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    let rest = rest[digits..].strip_prefix('.')?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let text = rest.trim();
    (!text.is_empty()).then_some(text)
}

/// Every numbered line of a choice block, as `choice-<n>` in order.
pub fn extract_choices(block: &str) -> Vec<Choice> {
    block
        .lines()
        .filter_map(match_choice_line)
        .enumerate()
        .map(|(i, text)| Choice::new(format!("choice-{}", i + 1), text))
        .collect()
}

/// The two fixed choices used when a response offered none.
pub fn fallback_choices() -> Vec<Choice> {
    FALLBACK_CHOICES
        .iter()
        .enumerate()
        .map(|(i, text)| Choice::new(format!("default-{}", i + 1), *text))
        .collect()
}

/// Parse a finished response into a node with a fresh id.
pub fn parse(text: &str) -> StoryNode {
    parse_with_id(text, node_id())
}

/// Parse a finished response into a node with the given id.
pub fn parse_with_id(text: &str, id: impl Into<String>) -> StoryNode {
    let segments = split_segments(text);
    let mut choices = segments.choices.map(extract_choices).unwrap_or_default();

    if choices.is_empty() {
        debug!(
            has_header = segments.choices.is_some(),
            "no choices in response, using fallback choices"
        );
        choices = fallback_choices();
    }

    StoryNode {
        id: id.into(),
        content: segments.narrative.to_string(),
        choices,
        selected_choice: None,
    }
}

/// Choices visible so far in partial output.
///
/// Returns `None` until the header is present and at least two numbered
/// lines follow it. No fallback is applied.
pub fn preview_choices(text: &str) -> Option<Vec<Choice>> {
    let choices = extract_choices(split_segments(text).choices?);
    (choices.len() >= 2).then_some(choices)
}
