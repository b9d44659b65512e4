//! Default configuration constants for roundtable.
//!
//! Shared by the configuration types and the orchestrator so the two never drift.

/// Scheduler tick interval in normal mode (milliseconds).
pub const NORMAL_TICK_MS: u64 = 1000;

/// Scheduler tick interval in chaos mode (milliseconds).
pub const CHAOS_TICK_MS: u64 = 400;

/// Minimum time since a speaker's last turn before it is eligible again (normal mode).
pub const NORMAL_COOLDOWN_MS: u64 = 1000;

/// Cooldown in chaos mode.
pub const CHAOS_COOLDOWN_MS: u64 = 500;

/// Fraction of the least-recently-used eligible speakers drawn from at random.
///
/// Rounded up, never fewer than one candidate.
pub const LRU_FRACTION: f64 = 0.5;

/// Maximum number of cached streaming sessions across all speakers.
pub const MAX_CACHED_SESSIONS: usize = 6;

/// A session idle for longer than this since its speaker's last turn is reset (seconds).
pub const SESSION_IDLE_TIMEOUT_SECS: u64 = 120;

/// Number of trailing transcript entries given to a new session as immediate context.
pub const RECENT_TRANSCRIPT_TURNS: usize = 4;

/// Per-turn speech limit once output has started (seconds).
pub const SPEECH_TIME_LIMIT_SECS: u64 = 240;

/// Stage-1 watchdog margin: seconds of timeout per second of queued context audio.
pub const UPLOAD_MARGIN_FACTOR: f64 = 2.0;

/// Stage-1 watchdog fixed buffer (seconds).
pub const UPLOAD_BUFFER_SECS: u64 = 120;

/// How often an in-flight turn checks the force-skip flag (milliseconds).
pub const FORCE_SKIP_POLL_MS: u64 = 100;

/// How long the force-skip flag stays raised before it clears itself (milliseconds).
pub const FORCE_SKIP_GRACE_MS: u64 = 500;

/// Accumulated summaries are consolidated once this many exist.
pub const META_SUMMARY_THRESHOLD: usize = 10;

/// Upper bound on the suggested-speaker queue.
pub const MAX_SUGGESTIONS: usize = 10;

/// The scheduler asks for new suggestions once the queue holds this many or fewer.
pub const SUGGESTION_REFILL_THRESHOLD: usize = 2;

/// Capacity of the audio context window (turns).
pub const AUDIO_HISTORY_CAPACITY: usize = 2;

/// Sample rate of audio sent to the streaming service as context (Hz).
pub const CONTEXT_SAMPLE_RATE: u32 = 16000;

/// Fallback output rate when the stream's MIME type carries none (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// MIME type of context clips.
pub const CONTEXT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Silence appended to uploaded context so the service detects the end of input (seconds).
pub const CONTEXT_SILENCE_SECS: u32 = 2;

/// Number of chunks a context clip is split into for upload.
pub const UPLOAD_CHUNKS: usize = 5;

/// Delay before each uploaded chunk (milliseconds).
pub const UPLOAD_CHUNK_DELAY_MS: u64 = 50;

/// Pause between the end of the context upload and the turn commit (milliseconds).
pub const COMMIT_DELAY_MS: u64 = 1000;

/// Pause between an empty commit and `activityEnd` (milliseconds).
pub const EMPTY_COMMIT_DELAY_MS: u64 = 500;

/// Delay between the stream opening and the turn being triggered (milliseconds).
pub const OPEN_TRIGGER_DELAY_MS: u64 = 200;

/// Default sampling temperature for speaker sessions.
pub const TEMPERATURE: f32 = 1.5;

/// Default nucleus sampling for speaker sessions.
pub const TOP_P: f32 = 0.95;

/// Default conversation topic.
pub const DEFAULT_TOPIC: &str = "The Future of the Revolution";

/// Default display name of the human participant.
pub const DEFAULT_USER_NAME: &str = "User";

/// Default model for summary generation.
pub const SUMMARY_MODEL: &str = "models/gemini-flash-lite-latest";

/// Speaker id of the human pseudo-speaker.
pub const HUMAN_SPEAKER_ID: &str = "USER_PARTICIPANT";

/// Speaker name used for orchestrator-authored transcript entries.
pub const SYSTEM_SPEAKER: &str = "SYSTEM";

/// Capacity of the orchestrator event broadcast channel.
pub const EVENT_BUFFER: usize = 256;

/// Capacity of the orchestrator command channel.
pub const COMMAND_BUFFER: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chaos_mode_is_faster_than_normal_mode() {
        assert!(CHAOS_TICK_MS < NORMAL_TICK_MS);
        assert!(CHAOS_COOLDOWN_MS < NORMAL_COOLDOWN_MS);
    }

    #[test]
    fn force_skip_poll_within_one_tick() {
        assert!(FORCE_SKIP_POLL_MS <= 100);
        assert!(FORCE_SKIP_GRACE_MS > FORCE_SKIP_POLL_MS);
    }

    #[test]
    fn context_mime_matches_context_rate() {
        assert!(CONTEXT_MIME_TYPE.ends_with(&CONTEXT_SAMPLE_RATE.to_string()));
    }
}
