//! Drives one agent turn over a leased streaming session.
//!
//! A turn subscribes to the session, connects it if needed, uploads any context
//! audio, commits the request, then collects output until a terminal event. Every
//! exit path returns a [`TurnOutcome`] carrying whatever text was produced.

use crate::audio::history::AudioClip;
use crate::audio::pcm;
use crate::defaults;
use crate::error::{Result, RoundtableError};
use crate::session::client::{RealtimeInput, SessionEvent, StreamingClient};
use crate::session::manager::SessionLease;
use crate::speaker::SpeakerId;
use crate::watchdog::{ForceSkip, TurnWatchdog, WatchdogExpiry, WatchdogSettings};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnEnd {
    /// The service finished its response.
    Completed,
    /// Output ran past the speech time limit.
    SpeechLimit,
    /// Aborted by force-skip.
    Skipped,
    /// No output before the connect/upload deadline.
    ConnectTimeout,
    /// The client reported an error or a send failed.
    TransportError { reason: String },
    /// The connection closed mid-turn.
    Closed,
    /// The orchestrator reset; the outcome must be discarded.
    Cancelled,
}

impl TurnEnd {
    /// Whether the salvaged text belongs in the transcript.
    pub fn records_text(&self) -> bool {
        !matches!(self, TurnEnd::Cancelled)
    }
}

/// Result of one agent turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub end: TurnEnd,
    /// Trimmed transcription of what was spoken, possibly partial.
    pub text: String,
    /// Full turn audio resampled to 16 kHz, when captured.
    pub audio: Option<AudioClip>,
}

/// Receives progress signals from a running turn.
pub trait TurnObserver: Send + Sync {
    /// The first output chunk arrived.
    fn speaking_started(&self, speaker: &SpeakerId);
    /// Normalized output level for one chunk.
    fn volume(&self, speaker: &SpeakerId, level: f32);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TurnObserver for NoopObserver {
    fn speaking_started(&self, _speaker: &SpeakerId) {}
    fn volume(&self, _speaker: &SpeakerId, _level: f32) {}
}

/// Input paced into the session before the response is requested.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    /// Audio to upload first (an uploaded clip or the latest history clip).
    pub audio: Option<AudioClip>,
    /// Length of an uploaded clip; scales the connect deadline.
    pub upload_duration: Duration,
    /// One-shot human interjection.
    pub interjection: Option<String>,
}

/// Everything one agent turn needs.
pub struct TurnRequest {
    pub lease: SessionLease,
    pub context: TurnContext,
    /// Keep the turn's audio for the context window.
    pub capture_audio: bool,
    pub watchdog: WatchdogSettings,
    pub force_skip: ForceSkip,
    pub cancel: CancellationToken,
    pub observer: Arc<dyn TurnObserver>,
}

type Pending = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    AwaitingOpen,
    Triggering,
    Listening,
}

struct Collected {
    text: String,
    chunks: Vec<Vec<u8>>,
}

/// Runs a turn to its end.
pub async fn run_turn(request: TurnRequest) -> TurnOutcome {
    let TurnRequest {
        lease,
        context,
        capture_audio,
        watchdog: settings,
        force_skip,
        cancel,
        observer,
    } = request;
    let speaker = lease.speaker_id.clone();
    let client = lease.client.clone();

    let mut events = client.subscribe();
    let mut watchdog = TurnWatchdog::arm(&settings, context.upload_duration);
    let mut skip_poll = tokio::time::interval(settings.force_skip_poll);
    skip_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut collected = Collected {
        text: String::new(),
        chunks: Vec::new(),
    };

    let mut trigger = Some(context);
    let mut phase;
    let mut pending: Option<Pending>;
    if client.is_connected() {
        let ctx = trigger.take().unwrap_or_default();
        let send: Pending = Box::pin(send_trigger(client.clone(), ctx, Duration::ZERO));
        phase = Phase::Triggering;
        pending = Some(send);
    } else {
        let connecting = client.clone();
        let config = lease.config.clone();
        debug!(speaker = %speaker, fresh = lease.fresh, "connecting session");
        let connect: Pending = Box::pin(async move { connecting.connect(&config).await });
        phase = Phase::Connecting;
        pending = Some(connect);
    }

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break TurnEnd::Cancelled,
            _ = skip_poll.tick() => {
                if force_skip.is_raised() {
                    info!(speaker = %speaker, "turn force-skipped");
                    break TurnEnd::Skipped;
                }
            }
            _ = tokio::time::sleep_until(watchdog.deadline()) => {
                let expiry = watchdog.expiry();
                warn!(speaker = %speaker, ?expiry, "watchdog fired");
                break match expiry {
                    WatchdogExpiry::ConnectTimeout => TurnEnd::ConnectTimeout,
                    WatchdogExpiry::SpeechLimit => TurnEnd::SpeechLimit,
                };
            }
            result = drive(&mut pending) => {
                pending = None;
                if let Err(e) = result {
                    warn!(speaker = %speaker, error = %e, "turn send failed");
                    break TurnEnd::TransportError { reason: e.to_string() };
                }
                phase = match phase {
                    Phase::Connecting => Phase::AwaitingOpen,
                    _ => Phase::Listening,
                };
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break TurnEnd::Closed;
                };
                match event {
                    SessionEvent::Open => {
                        if phase == Phase::AwaitingOpen || phase == Phase::Connecting {
                            let ctx = trigger.take().unwrap_or_default();
                            let delay = Duration::from_millis(defaults::OPEN_TRIGGER_DELAY_MS);
                            let send: Pending = Box::pin(send_trigger(client.clone(), ctx, delay));
                            pending = Some(send);
                            phase = Phase::Triggering;
                        }
                    }
                    SessionEvent::AudioChunk(bytes) => {
                        if watchdog.output_started() {
                            observer.speaking_started(&speaker);
                        }
                        observer.volume(&speaker, pcm::pcm16_rms(&bytes));
                        collected.chunks.push(bytes);
                    }
                    SessionEvent::TranscriptionDelta(delta) => collected.text.push_str(&delta),
                    SessionEvent::TurnComplete => break TurnEnd::Completed,
                    SessionEvent::Interrupted => debug!(speaker = %speaker, "response interrupted"),
                    SessionEvent::Error(reason) => {
                        warn!(speaker = %speaker, %reason, "session error during turn");
                        break TurnEnd::TransportError { reason };
                    }
                    SessionEvent::Close => break TurnEnd::Closed,
                }
            }
        }
    };

    // A response can complete before the commit's trailing activity marker goes out.
    if end == TurnEnd::Completed
        && let Some(trigger) = pending.take()
    {
        let detached = speaker.clone();
        tokio::spawn(async move {
            if let Err(e) = trigger.await {
                debug!(speaker = %detached, error = %e, "late trigger send failed");
            }
        });
    }

    let audio = if end == TurnEnd::Completed && capture_audio && !collected.chunks.is_empty() {
        let rate = pcm::parse_rate_from_mime(
            client.output_mime_type().as_deref(),
            defaults::OUTPUT_SAMPLE_RATE,
        );
        let joined = pcm::concat(&collected.chunks);
        Some(AudioClip::context_pcm(pcm::resample_pcm16_bytes(
            &joined,
            rate,
            defaults::CONTEXT_SAMPLE_RATE,
        )))
    } else {
        None
    };

    debug!(speaker = %speaker, ?end, chars = collected.text.len(), "turn finished");
    TurnOutcome {
        end,
        text: collected.text.trim().to_string(),
        audio,
    }
}

async fn drive(pending: &mut Option<Pending>) -> Result<()> {
    match pending {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

/// Uploads context audio and commits the request.
///
/// Audio is padded with silence, bracketed by activity markers and paced in
/// chunks. The commit carries the interjection or a single space.
async fn send_trigger(
    client: Arc<dyn StreamingClient>,
    context: TurnContext,
    delay: Duration,
) -> Result<()> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if !client.is_connected() {
        return Err(RoundtableError::NotConnected);
    }

    if let Some(clip) = &context.audio {
        let rate = pcm::parse_rate_from_mime(Some(&clip.mime_type), defaults::CONTEXT_SAMPLE_RATE);
        let padded = pcm::pad_with_silence(&clip.payload, defaults::CONTEXT_SILENCE_SECS, rate);
        client.send_realtime_input(RealtimeInput::ActivityStart).await?;
        for chunk in pcm::split_chunks(&padded, defaults::UPLOAD_CHUNKS) {
            tokio::time::sleep(Duration::from_millis(defaults::UPLOAD_CHUNK_DELAY_MS)).await;
            client
                .send_realtime_input(RealtimeInput::Audio {
                    mime_type: clip.mime_type.clone(),
                    data: chunk.to_vec(),
                })
                .await?;
        }
    }

    tokio::time::sleep(Duration::from_millis(defaults::COMMIT_DELAY_MS)).await;
    match &context.interjection {
        Some(message) => {
            client
                .send(&format!("\n[USER INTERJECTION]: \"{message}\"\n"), true)
                .await?;
        }
        None => {
            client.send(" ", true).await?;
            tokio::time::sleep(Duration::from_millis(defaults::EMPTY_COMMIT_DELAY_MS)).await;
        }
    }
    client.send_realtime_input(RealtimeInput::ActivityEnd).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::config::LiveConfigBuilder;
    use crate::session::mock::{MockBehavior, MockStep, MockStreamingClient, Recorded, SentItem};
    use crate::speaker::{ConfigSignature, GenerationParams, Speaker, Voice};
    use std::sync::Mutex;

    fn lease(client: Arc<MockStreamingClient>) -> SessionLease {
        let speaker = Speaker::new("x", "X", "", Voice::prebuilt("Puck"));
        let params = GenerationParams::default();
        SessionLease {
            speaker_id: speaker.id.clone(),
            client,
            config: LiveConfigBuilder::new(&speaker, params, "t").build(),
            signature: ConfigSignature::compute(&speaker, &params, "t"),
            fresh: true,
            reset: None,
            turn_count: 1,
        }
    }

    fn request(client: Arc<MockStreamingClient>) -> TurnRequest {
        TurnRequest {
            lease: lease(client),
            context: TurnContext::default(),
            capture_audio: true,
            watchdog: WatchdogSettings::default(),
            force_skip: ForceSkip::new(),
            cancel: CancellationToken::new(),
            observer: Arc::new(NoopObserver),
        }
    }

    #[derive(Default)]
    struct Recording {
        started: Mutex<usize>,
        levels: Mutex<Vec<f32>>,
    }

    impl TurnObserver for Recording {
        fn speaking_started(&self, _speaker: &SpeakerId) {
            *self.started.lock().unwrap() += 1;
        }
        fn volume(&self, _speaker: &SpeakerId, level: f32) {
            self.levels.lock().unwrap().push(level);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_turn_collects_text_and_audio() {
        let chunk = pcm::samples_to_pcm16_le_bytes(&[1000i16; 2400]);
        let client = Arc::new(MockStreamingClient::with_behavior(
            MockBehavior::default().with_turn(vec![
                MockStep::Audio(chunk.clone()),
                MockStep::Text(" Dear comrades".into()),
                MockStep::Audio(chunk),
                MockStep::Text(", listen. ".into()),
                MockStep::TurnComplete,
            ]),
        ));
        let observer = Arc::new(Recording::default());
        let mut req = request(client.clone());
        req.observer = observer.clone();

        let outcome = run_turn(req).await;
        assert_eq!(outcome.end, TurnEnd::Completed);
        assert_eq!(outcome.text, "Dear comrades, listen.");
        // 4800 samples at 24 kHz become 3200 at 16 kHz.
        assert_eq!(outcome.audio.unwrap().payload.len(), 6400);
        assert_eq!(*observer.started.lock().unwrap(), 1);
        assert_eq!(observer.levels.lock().unwrap().len(), 2);
        assert_eq!(client.connect_count(), 1);
        assert_eq!(client.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_context_sends_single_space_then_activity_end() {
        let client = Arc::new(MockStreamingClient::new());
        let outcome = run_turn(request(client.clone())).await;
        assert_eq!(outcome.end, TurnEnd::Completed);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            client.sent_items(),
            vec![
                SentItem::Text {
                    text: " ".into(),
                    turn_complete: true
                },
                SentItem::Realtime(RealtimeInput::ActivityEnd),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn context_upload_is_padded_chunked_and_paced() {
        let client = Arc::new(MockStreamingClient::with_behavior(
            MockBehavior::default()
                .with_turn(vec![MockStep::Delay(Duration::from_secs(1)), MockStep::TurnComplete]),
        ));
        let mut req = request(client.clone());
        req.context = TurnContext {
            audio: Some(AudioClip::context_pcm(vec![1u8; 16000])),
            upload_duration: Duration::ZERO,
            interjection: Some("Stop!".into()),
        };
        run_turn(req).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let sent = client.sent();
        assert_eq!(sent[0].item, SentItem::Realtime(RealtimeInput::ActivityStart));
        let audio: Vec<&Recorded> = sent
            .iter()
            .filter(|r| matches!(r.item, SentItem::Realtime(RealtimeInput::Audio { .. })))
            .collect();
        assert_eq!(audio.len(), 5);
        let total: usize = audio
            .iter()
            .map(|r| match &r.item {
                SentItem::Realtime(RealtimeInput::Audio { data, .. }) => data.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(total, 16000 + 64000);
        for pair in audio.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_millis(50));
        }

        let commit = sent
            .iter()
            .position(|r| matches!(r.item, SentItem::Text { .. }))
            .unwrap();
        assert!(sent[commit].at - audio[4].at >= Duration::from_millis(1000));
        assert_eq!(
            sent[commit].item,
            SentItem::Text {
                text: "\n[USER INTERJECTION]: \"Stop!\"\n".into(),
                turn_complete: true
            }
        );
        assert_eq!(
            sent.last().unwrap().item,
            SentItem::Realtime(RealtimeInput::ActivityEnd)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn force_skip_salvages_partial_text() {
        let client = Arc::new(MockStreamingClient::with_behavior(
            MockBehavior::default().with_turn(vec![
                MockStep::Audio(vec![0u8; 480]),
                MockStep::Text("Hello wor".into()),
                MockStep::Delay(Duration::from_secs(60)),
                MockStep::Text("ld".into()),
                MockStep::TurnComplete,
            ]),
        ));
        let req = request(client);
        let skip = req.force_skip.clone();
        let handle = tokio::spawn(run_turn(req));

        tokio::time::sleep(Duration::from_secs(3)).await;
        skip.raise(Duration::from_millis(500));
        let raised_at = tokio::time::Instant::now();
        let outcome = handle.await.unwrap();
        assert!(tokio::time::Instant::now() - raised_at <= Duration::from_millis(100));
        assert_eq!(outcome.end, TurnEnd::Skipped);
        assert_eq!(outcome.text, "Hello wor");
        assert!(outcome.audio.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn speech_limit_salvages_partial_text() {
        let client = Arc::new(MockStreamingClient::with_behavior(
            MockBehavior::default().with_turn(vec![
                MockStep::Audio(vec![0u8; 480]),
                MockStep::Text("On and on".into()),
                MockStep::Delay(Duration::from_secs(600)),
                MockStep::TurnComplete,
            ]),
        ));
        let mut req = request(client);
        req.watchdog.speech_limit = Duration::from_secs(10);
        let outcome = run_turn(req).await;
        assert_eq!(outcome.end, TurnEnd::SpeechLimit);
        assert_eq!(outcome.text, "On and on");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_hits_connect_timeout() {
        let client = Arc::new(MockStreamingClient::with_behavior(
            MockBehavior::default().never_opens(),
        ));
        let start = tokio::time::Instant::now();
        let mut req = request(client);
        req.context.upload_duration = Duration::from_secs(10);
        let outcome = run_turn(req).await;
        assert_eq!(outcome.end, TurnEnd::ConnectTimeout);
        assert_eq!(tokio::time::Instant::now() - start, Duration::from_secs(140));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_and_close_keep_partial_text() {
        let client = Arc::new(MockStreamingClient::with_behavior(
            MockBehavior::default()
                .with_turn(vec![MockStep::Text("Partial".into()), MockStep::Error("boom".into())])
                .with_turn(vec![MockStep::Text("Cut".into()), MockStep::Close]),
        ));
        let outcome = run_turn(request(client.clone())).await;
        assert_eq!(
            outcome.end,
            TurnEnd::TransportError {
                reason: "boom".into()
            }
        );
        assert_eq!(outcome.text, "Partial");

        let outcome = run_turn(request(client.clone())).await;
        assert_eq!(outcome.end, TurnEnd::Closed);
        assert_eq!(outcome.text, "Cut");
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_is_transport_error() {
        let client = Arc::new(MockStreamingClient::with_behavior(
            MockBehavior::default().failing_connect(),
        ));
        let outcome = run_turn(request(client)).await;
        assert!(matches!(outcome.end, TurnEnd::TransportError { .. }));
        assert!(outcome.text.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_discards_turn() {
        let client = Arc::new(MockStreamingClient::with_behavior(
            MockBehavior::default().with_turn(vec![
                MockStep::Text("never".into()),
                MockStep::Delay(Duration::from_secs(60)),
                MockStep::TurnComplete,
            ]),
        ));
        let req = request(client);
        let cancel = req.cancel.clone();
        let handle = tokio::spawn(run_turn(req));
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.end, TurnEnd::Cancelled);
        assert!(!outcome.end.records_text());
    }

    #[tokio::test(start_paused = true)]
    async fn reused_session_skips_connect() {
        let client = Arc::new(MockStreamingClient::new());
        run_turn(request(client.clone())).await;
        run_turn(request(client.clone())).await;
        assert_eq!(client.connect_count(), 1);
    }
}
