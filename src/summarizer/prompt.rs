//! Prompt text and response schemas for summary generation.

use crate::speaker::SpeakerId;
use crate::transcript::{TranscriptEntry, format_lines};
use serde_json::{Value, json};
use std::time::Duration;

/// An agent as presented to the summarizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerActivity {
    pub id: SpeakerId,
    pub name: String,
    /// Time since the speaker last finished a turn; `None` if it never spoke.
    pub last_spoke: Option<Duration>,
}

impl SpeakerActivity {
    fn describe(&self) -> String {
        let last = match self.last_spoke {
            Some(ago) => format!("{}s ago", ago.as_secs()),
            None => "never".to_string(),
        };
        format!("{} (ID: {}) - last spoke: {last}", self.name, self.id)
    }
}

/// Prompt asking to merge accumulated summaries into one narrative.
pub fn consolidation_prompt(summaries: &[String]) -> String {
    format!(
        "You are the archivist of a live debate.\n\
         Merge the {count} chapter summaries below into one cohesive narrative of the whole \
         discussion, under 400 words. Drop repetition, keep the key arguments and how the \
         positions shifted.\n\
         Attribute every argument to its speaker by name, the human participant included.\n\n\
         CHAPTER SUMMARIES:\n{chapters}\n\n\
         Respond with JSON containing 'consolidatedSummary'.",
        count = summaries.len(),
        chapters = summaries.join("\n\n"),
    )
}

/// Prompt asking for a summary of the unseen lines plus a speaking plan.
pub fn fragment_prompt(
    unseen: &[TranscriptEntry],
    agents: &[SpeakerActivity],
    human: Option<(&SpeakerId, &str)>,
    priority: Option<&SpeakerId>,
) -> String {
    let roster = agents
        .iter()
        .map(SpeakerActivity::describe)
        .collect::<Vec<_>>()
        .join("\n");
    let participant = match human {
        Some((id, name)) => format!("HUMAN PARTICIPANT: {name} (ID: {id})\n"),
        None => String::new(),
    };
    let priority = match priority {
        Some(id) => id.to_string(),
        None => "whoever spoke least recently".to_string(),
    };

    format!(
        "You assist the moderator of a live debate.\n\
         1) Read the NEW transcript lines below; they follow the last summary.\n\
         2) Summarize only these new developments in under 100 words. Do not retell older history.\n\
         3) Name the speaker of every argument explicitly. Never write \"the speaker\" or a bare pronoun.\n\
         4) Plan the next 8 speaking turns so that every participant gets the floor. Put {priority} first.\n\n\
         AVAILABLE SPEAKERS:\n{roster}\n{participant}\n\
         NEW TRANSCRIPT LINES:\n{lines}\n\n\
         Respond with JSON containing 'newFragmentSummary' and 'nextSpeakerIds' (array of ids).",
        lines = format_lines(unseen),
    )
}

/// Response schema for consolidation.
pub fn consolidation_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "consolidatedSummary": { "type": "STRING" }
        }
    })
}

/// Response schema for fragment summaries.
pub fn fragment_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "newFragmentSummary": { "type": "STRING" },
            "nextSpeakerIds": { "type": "ARRAY", "items": { "type": "STRING" } }
        },
        "required": ["newFragmentSummary", "nextSpeakerIds"]
    })
}
