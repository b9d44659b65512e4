//! Generation configuration handed to a streaming client when it connects.

use crate::speaker::{GenerationParams, Speaker, Voice};
use crate::transcript::TranscriptEntry;
use serde::Serialize;

/// Top-k sampling applied to every speaker session.
const TOP_K: u32 = 95;

/// Output token ceiling per response.
const MAX_OUTPUT_TOKENS: u32 = 4096;

/// Everything a client needs to open a speaker's session.
///
/// Opaque to the scheduler; only the session manager builds it and only clients read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    pub speaker_name: String,
    pub voice: Voice,
    pub system_instruction: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub seed: u32,
}

/// Builds a [`LiveConfig`] from a speaker and the conversation so far.
#[derive(Debug, Clone)]
pub struct LiveConfigBuilder<'a> {
    speaker: &'a Speaker,
    params: GenerationParams,
    topic: &'a str,
    summaries: &'a [String],
    recent: &'a [TranscriptEntry],
    seed: u32,
}

impl<'a> LiveConfigBuilder<'a> {
    pub fn new(speaker: &'a Speaker, params: GenerationParams, topic: &'a str) -> Self {
        Self {
            speaker,
            params,
            topic,
            summaries: &[],
            recent: &[],
            seed: 0,
        }
    }

    /// Accumulated chapter summaries, oldest first.
    pub fn summaries(mut self, summaries: &'a [String]) -> Self {
        self.summaries = summaries;
        self
    }

    /// The most recent transcript entries the speaker should answer.
    pub fn recent(mut self, recent: &'a [TranscriptEntry]) -> Self {
        self.recent = recent;
        self
    }

    pub fn seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> LiveConfig {
        LiveConfig {
            speaker_name: self.speaker.name.clone(),
            voice: self.speaker.voice.clone(),
            system_instruction: self.system_instruction(),
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            top_k: TOP_K,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            seed: self.seed,
        }
    }

    fn system_instruction(&self) -> String {
        let mut context = String::new();
        if !self.summaries.is_empty() {
            context.push_str("--- PREVIOUS DEBATE CHAPTERS ---\n");
            context.push_str(&self.summaries.join("\n\n"));
            context.push_str("\n\n");
        }

        let recent = self
            .recent
            .iter()
            .map(|e| format!("{}: \"{}\"", e.speaker, e.text))
            .collect::<Vec<_>>()
            .join("\n");
        context.push_str("--- IMMEDIATE CONTEXT (respond to this directly) ---\n");
        context.push_str(&recent);

        format!(
            "--- DEBATE CONTEXT ---\n\n\
             History of the debate so far and its latest turns:\n\n'''{context}'''\n\n\
             CURRENT TOPIC:\n\n{topic}\n\n\
             --- CHARACTER IDENTITY ---\n\nYou are {name}.\n{persona}\n\n\
             --- INSTRUCTIONS ---\n\n\
             Speak in English with the accent your persona implies.\n\
             Stay original and never repeat earlier lines. React to what was just said.",
            topic = self.topic,
            name = self.speaker.name,
            persona = self.speaker.persona,
        )
    }
}
