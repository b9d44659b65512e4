//! Speakers, their generation parameters, and the roster the scheduler draws from.

use crate::defaults;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable speaker identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakerId(String);

impl SpeakerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of the human pseudo-speaker.
    pub fn human() -> Self {
        Self(defaults::HUMAN_SPEAKER_ID.to_string())
    }

    pub fn is_human(&self) -> bool {
        self.0 == defaults::HUMAN_SPEAKER_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpeakerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Voice a speaker's session synthesizes with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Voice {
    /// One of the service's built-in voices, by name.
    Prebuilt { name: String },
    /// A cloned voice from a reference sample.
    Cloned { mime_type: String, sample: Vec<u8> },
}

impl Voice {
    pub fn prebuilt(name: &str) -> Self {
        Voice::Prebuilt {
            name: name.to_string(),
        }
    }

    fn signature_part(&self) -> String {
        match self {
            Voice::Prebuilt { name } => name.clone(),
            Voice::Cloned { mime_type, sample } => {
                let digest = Sha256::digest(sample);
                format!("clone:{mime_type}:{}", hex_prefix(&digest))
            }
        }
    }
}

/// Sampling parameters applied to every speaker session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: defaults::TEMPERATURE,
            top_p: defaults::TOP_P,
        }
    }
}

/// Deterministic digest of everything that changes how a speaker's session generates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigSignature(String);

impl ConfigSignature {
    /// Number of persona characters folded into the signature.
    const PERSONA_PREFIX_CHARS: usize = 30;

    pub fn compute(speaker: &Speaker, params: &GenerationParams, topic: &str) -> Self {
        let persona_prefix: String = speaker
            .persona
            .chars()
            .take(Self::PERSONA_PREFIX_CHARS)
            .collect();
        let voice = speaker.voice.signature_part();
        let temperature = params.temperature.to_bits().to_string();
        let top_p = params.top_p.to_bits().to_string();

        let mut hasher = Sha256::new();
        for field in [
            speaker.id.as_str(),
            voice.as_str(),
            temperature.as_str(),
            top_p.as_str(),
            persona_prefix.as_str(),
            topic,
        ] {
            // Length-prefixed so no field can run into the next.
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hex_prefix(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

/// A participant that can take turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub id: SpeakerId,
    pub name: String,
    /// Persona text prefixed to the session's system instruction.
    pub persona: String,
    pub voice: Voice,
}

impl Speaker {
    pub fn new(id: &str, name: &str, persona: &str, voice: Voice) -> Self {
        Self {
            id: SpeakerId::new(id),
            name: name.to_string(),
            persona: persona.to_string(),
            voice,
        }
    }

    /// The transient human participant pseudo-speaker.
    pub fn human(display_name: &str) -> Self {
        Self {
            id: SpeakerId::human(),
            name: display_name.to_string(),
            persona: String::new(),
            voice: Voice::prebuilt("Puck"),
        }
    }

    pub fn is_human(&self) -> bool {
        self.id.is_human()
    }
}

/// Agent speakers currently taking part, in join order.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    agents: Vec<Speaker>,
}

impl Roster {
    pub fn new(agents: Vec<Speaker>) -> Self {
        let mut roster = Self::default();
        for agent in agents {
            roster.upsert(agent);
        }
        roster
    }

    /// Inserts a speaker or replaces the one with the same id in place.
    ///
    /// The human pseudo-speaker is never stored in the roster.
    pub fn upsert(&mut self, speaker: Speaker) -> bool {
        if speaker.is_human() {
            return false;
        }
        match self.agents.iter_mut().find(|a| a.id == speaker.id) {
            Some(existing) => *existing = speaker,
            None => self.agents.push(speaker),
        }
        true
    }

    pub fn remove(&mut self, id: &SpeakerId) -> Option<Speaker> {
        let pos = self.agents.iter().position(|a| &a.id == id)?;
        Some(self.agents.remove(pos))
    }

    pub fn get(&self, id: &SpeakerId) -> Option<&Speaker> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn agents(&self) -> &[Speaker] {
        &self.agents
    }

    /// Number of agent speakers eligible to take part.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Built-in roster used when no speakers are configured.
pub fn default_roster() -> Vec<Speaker> {
    vec![
        Speaker::new(
            "lenin",
            "Vladimir Lenin",
            "You are Vladimir Lenin. Speak with piercing clarity and revolutionary urgency.",
            Voice::prebuilt("Charon"),
        ),
        Speaker::new(
            "rosa",
            "Rosa Luxemburg",
            "You are Rosa Luxemburg. Argue with warmth, wit, and uncompromising democracy.",
            Voice::prebuilt("Kore"),
        ),
        Speaker::new(
            "marx",
            "Karl Marx",
            "You are Karl Marx. Speak as a patient, sardonic analyst of history.",
            Voice::prebuilt("Orus"),
        ),
        Speaker::new(
            "zizek",
            "Slavoj Zizek",
            "You are Slavoj Zizek. Digress constantly, then land a provocative paradox.",
            Voice::prebuilt("Fenrir"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speaker(id: &str) -> Speaker {
        Speaker::new(id, id, "persona text", Voice::prebuilt("Puck"))
    }

    #[test]
    fn human_id_is_recognized() {
        assert!(SpeakerId::human().is_human());
        assert!(Speaker::human("Ada").is_human());
        assert!(!SpeakerId::new("lenin").is_human());
    }

    #[test]
    fn signature_is_deterministic() {
        let s = speaker("a");
        let params = GenerationParams::default();
        assert_eq!(
            ConfigSignature::compute(&s, &params, "topic"),
            ConfigSignature::compute(&s, &params, "topic")
        );
    }

    #[test]
    fn signature_changes_with_topic_voice_and_sampling() {
        let s = speaker("a");
        let params = GenerationParams::default();
        let base = ConfigSignature::compute(&s, &params, "topic");

        assert_ne!(base, ConfigSignature::compute(&s, &params, "other"));

        let mut revoiced = s.clone();
        revoiced.voice = Voice::prebuilt("Kore");
        assert_ne!(base, ConfigSignature::compute(&revoiced, &params, "topic"));

        let hotter = GenerationParams {
            temperature: 0.7,
            ..params
        };
        assert_ne!(base, ConfigSignature::compute(&s, &hotter, "topic"));
    }

    #[test]
    fn signature_only_sees_persona_prefix() {
        let mut a = speaker("a");
        a.persona = format!("{}{}", "x".repeat(30), "tail one");
        let mut b = a.clone();
        b.persona = format!("{}{}", "x".repeat(30), "tail two");
        let params = GenerationParams::default();
        assert_eq!(
            ConfigSignature::compute(&a, &params, "t"),
            ConfigSignature::compute(&b, &params, "t")
        );
    }

    #[test]
    fn separator_in_persona_or_topic_does_not_collide() {
        let mut a = speaker("a");
        a.persona = "Stoic|".to_string();
        let mut b = speaker("a");
        b.persona = "Stoic".to_string();
        let params = GenerationParams::default();
        assert_ne!(
            ConfigSignature::compute(&a, &params, "war"),
            ConfigSignature::compute(&b, &params, "|war")
        );
    }

    #[test]
    fn roster_upsert_replaces_in_place() {
        let mut roster = Roster::new(vec![speaker("a"), speaker("b")]);
        let mut updated = speaker("a");
        updated.name = "Renamed".to_string();
        assert!(roster.upsert(updated));
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.agents()[0].name, "Renamed");
    }

    #[test]
    fn roster_rejects_human() {
        let mut roster = Roster::default();
        assert!(!roster.upsert(Speaker::human("Ada")));
        assert!(roster.is_empty());
    }

    #[test]
    fn roster_remove() {
        let mut roster = Roster::new(vec![speaker("a"), speaker("b")]);
        assert!(roster.remove(&SpeakerId::new("a")).is_some());
        assert!(roster.remove(&SpeakerId::new("a")).is_none());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn default_roster_ids_are_unique() {
        let roster = Roster::new(default_roster());
        assert_eq!(roster.len(), default_roster().len());
    }
}
