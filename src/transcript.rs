//! Append-only transcript of the conversation.

use serde::{Deserialize, Serialize};

/// One utterance. `id` is 1-based and equals the entry's position plus one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: usize,
    pub speaker: String,
    pub text: String,
    pub is_human: bool,
}

/// Ordered log of utterances. Positions are stable until `clear`.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an utterance and returns the stored entry.
    pub fn append(&mut self, speaker: &str, text: &str, is_human: bool) -> &TranscriptEntry {
        let entry = TranscriptEntry {
            id: self.entries.len() + 1,
            speaker: speaker.to_string(),
            text: text.to_string(),
            is_human,
        };
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Entries from `index` (a position) to the end; empty when `index` is past the end.
    pub fn since(&self, index: usize) -> &[TranscriptEntry] {
        self.entries.get(index..).unwrap_or(&[])
    }

    /// The last `n` entries.
    pub fn recent(&self, n: usize) -> &[TranscriptEntry] {
        &self.entries[self.entries.len().saturating_sub(n)..]
    }
}

/// Formats entries as `speaker: text` lines.
pub fn format_lines(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.speaker, e.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_preserves_order() {
        let mut t = Transcript::new();
        let lines = ["one", "two", "three", "four", "five"];
        for (i, line) in lines.iter().enumerate() {
            t.append(&format!("s{i}"), line, i == 2);
        }
        let read: Vec<&str> = t.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(read, lines);
        assert_eq!(t.entries()[2].id, 3);
        assert!(t.entries()[2].is_human);
    }

    #[test]
    fn since_and_recent_windows() {
        let mut t = Transcript::new();
        for i in 0..6 {
            t.append("s", &i.to_string(), false);
        }
        assert_eq!(t.since(4).len(), 2);
        assert!(t.since(6).is_empty());
        assert!(t.since(99).is_empty());
        assert_eq!(t.recent(4)[0].text, "2");
        assert_eq!(t.recent(10).len(), 6);
    }

    #[test]
    fn clear_restarts_ids() {
        let mut t = Transcript::new();
        t.append("a", "x", false);
        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.append("b", "y", false).id, 1);
    }

    #[test]
    fn format_lines_joins_speaker_and_text() {
        let mut t = Transcript::new();
        t.append("Lenin", "Comrades!", false);
        t.append("Ada", "Hello", true);
        assert_eq!(format_lines(t.entries()), "Lenin: Comrades!\nAda: Hello");
    }
}
