//! Session lifecycle: reuse, reset and eviction of per-speaker connections.

use crate::session::cache::{SessionCache, SessionEntry};
use crate::session::client::{ClientFactory, StreamingClient};
use crate::session::config::{LiveConfig, LiveConfigBuilder};
use crate::speaker::{ConfigSignature, GenerationParams, Speaker, SpeakerId};
use crate::transcript::TranscriptEntry;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound (exclusive) for generation seeds.
const SEED_RANGE: u32 = 99_999;

/// Why a cached session was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// The session served as many turns as there are eligible speakers.
    TurnLimit,
    /// The speaker's configuration signature changed.
    ConfigChanged,
    /// The speaker has been idle past the idle timeout.
    IdleTimeout,
    /// Reset requested explicitly.
    Requested,
    /// Evicted to keep the cache within capacity.
    Evicted,
}

impl std::fmt::Display for ResetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResetReason::TurnLimit => "turn limit",
            ResetReason::ConfigChanged => "config changed",
            ResetReason::IdleTimeout => "idle timeout",
            ResetReason::Requested => "requested",
            ResetReason::Evicted => "evicted",
        };
        f.write_str(s)
    }
}

/// Inputs to [`SessionManager::acquire`].
#[derive(Debug, Clone)]
pub struct AcquireRequest<'a> {
    pub speaker: &'a Speaker,
    pub params: GenerationParams,
    pub topic: &'a str,
    /// Number of speakers currently eligible to take turns.
    pub eligible_count: usize,
    /// When the speaker last finished a turn.
    pub last_turn_at: Option<Instant>,
    pub now: Instant,
    pub summaries: &'a [String],
    pub recent: &'a [TranscriptEntry],
}

/// A session handed out for one turn.
#[derive(Clone)]
pub struct SessionLease {
    pub speaker_id: SpeakerId,
    pub client: Arc<dyn StreamingClient>,
    pub config: LiveConfig,
    pub signature: ConfigSignature,
    /// True when the session was created for this turn.
    pub fresh: bool,
    /// Set when a cached session was discarded to make this one.
    pub reset: Option<ResetReason>,
    /// Turns taken on this session, including this one.
    pub turn_count: usize,
}

impl SessionLease {
    fn from_entry(entry: &SessionEntry, fresh: bool, reset: Option<ResetReason>) -> Self {
        Self {
            speaker_id: entry.speaker_id.clone(),
            client: entry.client.clone(),
            config: entry.config.clone(),
            signature: entry.signature.clone(),
            fresh,
            reset,
            turn_count: entry.turn_count,
        }
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("speaker_id", &self.speaker_id)
            .field("fresh", &self.fresh)
            .field("reset", &self.reset)
            .field("turn_count", &self.turn_count)
            .finish()
    }
}

/// Owns every cached speaker session.
pub struct SessionManager {
    cache: SessionCache,
    factory: Arc<dyn ClientFactory>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn ClientFactory>, capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            cache: SessionCache::new(capacity),
            factory,
            idle_timeout,
        }
    }

    /// Returns a session for the speaker, resetting or creating one as needed.
    ///
    /// The returned lease's signature always equals the speaker's current signature.
    pub async fn acquire(&mut self, request: AcquireRequest<'_>) -> SessionLease {
        let speaker_id = request.speaker.id.clone();
        let signature = ConfigSignature::compute(request.speaker, &request.params, request.topic);

        let mut reset = None;
        if let Some(entry) = self.cache.get(&speaker_id) {
            reset = self.reset_reason(entry, &signature, &request);
            if let Some(reason) = reset {
                info!(speaker = %speaker_id, %reason, turns = entry.turn_count, "resetting session");
                if let Some(stale) = self.cache.remove(&speaker_id) {
                    disconnect_quietly(&stale).await;
                }
            }
        }

        if let Some(entry) = self.cache.get_mut(&speaker_id) {
            entry.turn_count += 1;
            return SessionLease::from_entry(entry, false, reset);
        }

        let seed = rand::random::<u32>() % SEED_RANGE;
        let config = LiveConfigBuilder::new(request.speaker, request.params, request.topic)
            .summaries(request.summaries)
            .recent(request.recent)
            .seed(seed)
            .build();
        let entry = SessionEntry {
            speaker_id: speaker_id.clone(),
            client: self.factory.create(request.speaker),
            turn_count: 1,
            signature,
            config,
            created_at: request.now,
        };
        debug!(speaker = %speaker_id, seed, "created session");
        let lease = SessionLease::from_entry(&entry, true, reset);
        for evicted in self.cache.insert(entry) {
            info!(speaker = %evicted.speaker_id, reason = %ResetReason::Evicted, "evicting session");
            disconnect_quietly(&evicted).await;
        }
        lease
    }

    fn reset_reason(
        &self,
        entry: &SessionEntry,
        signature: &ConfigSignature,
        request: &AcquireRequest<'_>,
    ) -> Option<ResetReason> {
        if entry.turn_count >= request.eligible_count.max(1) {
            return Some(ResetReason::TurnLimit);
        }
        if &entry.signature != signature {
            return Some(ResetReason::ConfigChanged);
        }
        if let Some(last) = request.last_turn_at
            && request.now.saturating_duration_since(last) > self.idle_timeout
        {
            return Some(ResetReason::IdleTimeout);
        }
        None
    }

    /// Disconnects and forgets one speaker's session. Returns whether one existed.
    pub async fn reset(&mut self, speaker_id: &SpeakerId) -> bool {
        match self.cache.remove(speaker_id) {
            Some(entry) => {
                info!(speaker = %speaker_id, reason = %ResetReason::Requested, "resetting session");
                disconnect_quietly(&entry).await;
                true
            }
            None => false,
        }
    }

    /// Disconnects and forgets every session.
    pub async fn disconnect_all(&mut self) {
        let entries = self.cache.drain();
        if !entries.is_empty() {
            info!(count = entries.len(), "disconnecting all sessions");
        }
        for entry in entries {
            disconnect_quietly(&entry).await;
        }
    }

    pub fn turn_count(&self, speaker_id: &SpeakerId) -> Option<usize> {
        self.cache.get(speaker_id).map(|e| e.turn_count)
    }

    pub fn signature(&self, speaker_id: &SpeakerId) -> Option<&ConfigSignature> {
        self.cache.get(speaker_id).map(|e| &e.signature)
    }

    /// Cached speaker ids in insertion order.
    pub fn cached_ids(&self) -> Vec<SpeakerId> {
        self.cache.ids()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Disconnect failures never block a replacement.
async fn disconnect_quietly(entry: &SessionEntry) {
    if let Err(e) = entry.client.disconnect().await {
        warn!(speaker = %entry.speaker_id, error = %e, "ignoring disconnect failure");
    }
}
