//! Sliding window of recent turn audio handed to the next speaker as context.

use crate::defaults;
use std::collections::VecDeque;

/// One prior turn's full audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime_type: String,
    pub payload: Vec<u8>,
}

impl AudioClip {
    /// A 16 kHz mono PCM16 context clip.
    pub fn context_pcm(payload: Vec<u8>) -> Self {
        Self {
            mime_type: defaults::CONTEXT_MIME_TYPE.to_string(),
            payload,
        }
    }
}

/// Bounded FIFO of audio clips; pushing past capacity drops the oldest.
#[derive(Debug, Clone)]
pub struct AudioHistory {
    clips: VecDeque<AudioClip>,
    capacity: usize,
}

impl AudioHistory {
    pub fn new() -> Self {
        Self::with_capacity(defaults::AUDIO_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clips: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, clip: AudioClip) {
        if self.clips.len() == self.capacity {
            self.clips.pop_front();
        }
        self.clips.push_back(clip);
    }

    /// Most recent clip.
    pub fn latest(&self) -> Option<&AudioClip> {
        self.clips.back()
    }

    pub fn clear(&mut self) {
        self.clips.clear();
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioClip> {
        self.clips.iter()
    }
}

impl Default for AudioHistory {
    fn default() -> Self {
        Self::new()
    }
}
