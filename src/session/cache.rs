//! Bounded session cache with insertion-order eviction.

use crate::session::client::StreamingClient;
use crate::session::config::LiveConfig;
use crate::speaker::{ConfigSignature, SpeakerId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// One cached speaker connection.
#[derive(Clone)]
pub struct SessionEntry {
    pub speaker_id: SpeakerId,
    pub client: Arc<dyn StreamingClient>,
    /// Turns taken since this connection was created.
    pub turn_count: usize,
    /// Signature captured when the entry was created.
    pub signature: ConfigSignature,
    pub config: LiveConfig,
    pub created_at: Instant,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("speaker_id", &self.speaker_id)
            .field("turn_count", &self.turn_count)
            .field("signature", &self.signature)
            .field("connected", &self.client.is_connected())
            .finish()
    }
}

/// Fixed-capacity map from speaker to session, ordered by insertion.
///
/// Replacing an entry moves it to the back. When full, the oldest entry other than
/// the one just inserted is evicted.
#[derive(Debug)]
pub struct SessionCache {
    entries: VecDeque<SessionEntry>,
    capacity: usize,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, id: &SpeakerId) -> Option<&SessionEntry> {
        self.entries.iter().find(|e| &e.speaker_id == id)
    }

    pub fn get_mut(&mut self, id: &SpeakerId) -> Option<&mut SessionEntry> {
        self.entries.iter_mut().find(|e| &e.speaker_id == id)
    }

    /// Inserts an entry, returning any entries evicted to stay within capacity.
    pub fn insert(&mut self, entry: SessionEntry) -> Vec<SessionEntry> {
        let mut evicted = Vec::new();
        if let Some(previous) = self.remove(&entry.speaker_id) {
            evicted.push(previous);
        }
        let inserted = entry.speaker_id.clone();
        self.entries.push_back(entry);

        while self.entries.len() > self.capacity {
            match self.entries.front() {
                Some(oldest) if oldest.speaker_id != inserted => {
                    if let Some(oldest) = self.entries.pop_front() {
                        evicted.push(oldest);
                    }
                }
                _ => break,
            }
        }
        evicted
    }

    pub fn remove(&mut self, id: &SpeakerId) -> Option<SessionEntry> {
        let pos = self.entries.iter().position(|e| &e.speaker_id == id)?;
        self.entries.remove(pos)
    }

    /// Removes every entry, oldest first.
    pub fn drain(&mut self) -> Vec<SessionEntry> {
        self.entries.drain(..).collect()
    }

    /// Speaker ids in insertion order.
    pub fn ids(&self) -> Vec<SpeakerId> {
        self.entries.iter().map(|e| e.speaker_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
