//! Turn bookkeeping owned by the control loop.

use crate::speaker::SpeakerId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

/// Active turns, cooldowns and the speaking plan.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Speakers with a turn in flight.
    pub active: HashSet<SpeakerId>,
    /// When each speaker last finished a turn.
    pub cooldowns: HashMap<SpeakerId, Instant>,
    /// Summarizer's proposed order, consumed from the front.
    pub suggestions: VecDeque<SpeakerId>,
    /// Externally chosen next speaker.
    pub override_next: Option<SpeakerId>,
    pub last_speaker: Option<SpeakerId>,
    /// A human turn is pending; ticks do nothing until it is submitted.
    pub waiting_for_human: bool,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_turn(&mut self, speaker: &SpeakerId) {
        self.active.insert(speaker.clone());
    }

    /// Releases the slot, stamps the cooldown and records the last speaker.
    pub fn finish_turn(&mut self, speaker: &SpeakerId, now: Instant) {
        self.active.remove(speaker);
        self.cooldowns.insert(speaker.clone(), now);
        self.last_speaker = Some(speaker.clone());
    }

    pub fn last_turn_at(&self, speaker: &SpeakerId) -> Option<Instant> {
        self.cooldowns.get(speaker).copied()
    }

    pub fn replace_suggestions(&mut self, ids: Vec<SpeakerId>) {
        self.suggestions = ids.into();
    }

    /// Back to the initial state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
