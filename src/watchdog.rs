//! Turn timeouts and the external force-skip flag.
//!
//! A turn arms stage 1 (connect/upload safety net) when it starts. The first
//! output chunk disarms stage 1 and arms stage 2 (speech limit). The turn owns the
//! watchdog; dropping the turn drops every timer with it.

use crate::config::WatchdogConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogExpiry {
    /// No output arrived in time.
    ConnectTimeout,
    /// Output ran past the speech time limit.
    SpeechLimit,
}

/// Timing parameters for one turn's watchdog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogSettings {
    pub speech_limit: Duration,
    pub upload_margin_factor: f64,
    pub upload_buffer: Duration,
    pub force_skip_poll: Duration,
}

impl WatchdogSettings {
    /// Stage 1 duration for a turn uploading `context` worth of audio.
    pub fn connect_timeout(&self, context: Duration) -> Duration {
        context.mul_f64(self.upload_margin_factor.max(0.0)) + self.upload_buffer
    }
}

impl From<&WatchdogConfig> for WatchdogSettings {
    fn from(config: &WatchdogConfig) -> Self {
        Self {
            speech_limit: config.speech_limit(),
            upload_margin_factor: config.upload_margin_factor,
            upload_buffer: Duration::from_secs(config.upload_buffer_secs),
            force_skip_poll: config.force_skip_poll(),
        }
    }
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self::from(&WatchdogConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Connecting,
    Speaking,
}

/// Two-stage deadline for a single turn.
#[derive(Debug, Clone)]
pub struct TurnWatchdog {
    stage: Stage,
    deadline: Instant,
    speech_limit: Duration,
}

impl TurnWatchdog {
    /// Arms stage 1.
    pub fn arm(settings: &WatchdogSettings, context: Duration) -> Self {
        let timeout = settings.connect_timeout(context);
        debug!(timeout_secs = timeout.as_secs_f64(), "watchdog armed");
        Self {
            stage: Stage::Connecting,
            deadline: Instant::now() + timeout,
            speech_limit: settings.speech_limit,
        }
    }

    /// Records an output chunk. The first one switches to stage 2 and returns true.
    pub fn output_started(&mut self) -> bool {
        if self.stage == Stage::Speaking {
            return false;
        }
        self.stage = Stage::Speaking;
        self.deadline = Instant::now() + self.speech_limit;
        true
    }

    pub fn has_output(&self) -> bool {
        self.stage == Stage::Speaking
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// What firing now would mean.
    pub fn expiry(&self) -> WatchdogExpiry {
        match self.stage {
            Stage::Connecting => WatchdogExpiry::ConnectTimeout,
            Stage::Speaking => WatchdogExpiry::SpeechLimit,
        }
    }
}

/// Shared flag that aborts any in-flight turn.
///
/// Raising it schedules an automatic clear after a grace period so it cannot
/// suppress later turns. A newer raise supersedes an older pending clear.
#[derive(Debug, Clone, Default)]
pub struct ForceSkip {
    raised: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

impl ForceSkip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Raises the flag and clears it after `grace`.
    pub fn raise(&self, grace: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.raised.store(true, Ordering::SeqCst);
        debug!("force-skip raised");

        let raised = self.raised.clone();
        let current = self.generation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if current.load(Ordering::SeqCst) == generation {
                raised.store(false, Ordering::SeqCst);
            }
        });
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.raised.store(false, Ordering::SeqCst);
    }
}
