//! Notifications published by the orchestrator and the read-only state snapshot.

use crate::session::ResetReason;
use crate::speaker::{Speaker, SpeakerId};
use crate::transcript::TranscriptEntry;
use crate::turn::TurnEnd;
use serde::Serialize;

/// Change notifications for UI collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    TurnStarted {
        speaker: SpeakerId,
        fresh_session: bool,
    },
    SpeakingStarted {
        speaker: SpeakerId,
    },
    Volume {
        speaker: SpeakerId,
        level: f32,
    },
    TurnEnded {
        speaker: SpeakerId,
        end: TurnEnd,
    },
    TranscriptAppended {
        entry: TranscriptEntry,
    },
    SummaryUpdated {
        summary: String,
    },
    SuggestionsUpdated {
        speakers: Vec<SpeakerId>,
    },
    WaitingForHuman,
    SessionReset {
        speaker: SpeakerId,
        reason: ResetReason,
    },
    /// The conversation was fully reset.
    Reset,
    /// A setting changed; pull a fresh [`Snapshot`].
    StateChanged,
}

/// Point-in-time copy of the orchestrator's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub running: bool,
    pub chaos_mode: bool,
    pub allow_self_reply: bool,
    pub summaries_enabled: bool,
    pub audio_accumulation: bool,
    pub human_participating: bool,
    pub waiting_for_human: bool,
    pub summarizing: bool,
    pub topic: String,
    pub speakers: Vec<Speaker>,
    /// Speakers with a turn in flight, sorted.
    pub active: Vec<SpeakerId>,
    pub suggestions: Vec<SpeakerId>,
    pub override_next: Option<SpeakerId>,
    pub last_speaker: Option<SpeakerId>,
    pub cooldowns: usize,
    pub transcript: Vec<TranscriptEntry>,
    pub summaries: Vec<String>,
    pub last_summarized: usize,
    pub audio_history: usize,
    /// Cached sessions in insertion order.
    pub sessions: Vec<SpeakerId>,
    pub pending_interjection: Option<String>,
    pub uploaded_context: Option<String>,
}
