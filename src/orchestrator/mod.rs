//! The control loop.
//!
//! One task owns all conversation state. Control commands, tick timer and
//! completion reports from turn and summarizer tasks are handled one at a time,
//! so no table is ever mutated concurrently. Every background task is tagged
//! with the reset epoch it was started in; reports from an older epoch are dropped.

pub mod event;
pub mod handle;

pub use event::{OrchestratorEvent, Snapshot};
pub use handle::OrchestratorHandle;

use crate::audio::{AudioClip, AudioHistory, UploadedContext};
use crate::clock::{Clock, TokioClock};
use crate::config::Config;
use crate::defaults;
use crate::error::Result;
use crate::scheduler::{
    SchedulerState, SelectionPolicy, SelectionSource, max_concurrency, select_next,
};
use crate::session::{AcquireRequest, ClientFactory, SessionManager};
use crate::speaker::{GenerationParams, Roster, Speaker, SpeakerId};
use crate::summarizer::{
    SpeakerActivity, SummaryGenerator, SummaryInput, SummaryUpdate, Summarizer, should_summarize,
};
use crate::transcript::Transcript;
use crate::turn::{TurnContext, TurnObserver, TurnOutcome, TurnRequest, run_turn};
use crate::watchdog::{ForceSkip, WatchdogSettings};
use handle::Command;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reports from background tasks back to the control loop.
#[derive(Debug)]
enum Report {
    TurnFinished {
        epoch: u64,
        speaker: SpeakerId,
        outcome: TurnOutcome,
    },
    SummaryFinished {
        epoch: u64,
        result: Result<SummaryUpdate>,
    },
}

/// Publishes turn progress as orchestrator events.
struct EventObserver {
    events: broadcast::Sender<OrchestratorEvent>,
}

impl TurnObserver for EventObserver {
    fn speaking_started(&self, speaker: &SpeakerId) {
        publish(
            &self.events,
            OrchestratorEvent::SpeakingStarted {
                speaker: speaker.clone(),
            },
        );
    }

    fn volume(&self, speaker: &SpeakerId, level: f32) {
        publish(
            &self.events,
            OrchestratorEvent::Volume {
                speaker: speaker.clone(),
                level,
            },
        );
    }
}

fn publish(events: &broadcast::Sender<OrchestratorEvent>, event: OrchestratorEvent) {
    if events.send(event).is_err() {
        tracing::trace!("orchestrator event dropped without subscribers");
    }
}

/// Turn-taking orchestrator for one live session.
pub struct Orchestrator {
    config: Config,
    roster: Roster,
    params: GenerationParams,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    sessions: SessionManager,
    summarizer: Arc<Summarizer>,
    transcript: Transcript,
    audio_history: AudioHistory,
    summaries: Vec<String>,
    last_summarized: usize,
    summarizing: bool,
    scheduler: SchedulerState,
    running: bool,
    human_participating: bool,
    interjection: Option<String>,
    uploaded: Option<UploadedContext>,
    force_skip: ForceSkip,
    epoch: u64,
    epoch_token: CancellationToken,
    events: broadcast::Sender<OrchestratorEvent>,
    reports_tx: mpsc::UnboundedSender<Report>,
    reports_rx: mpsc::UnboundedReceiver<Report>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        speakers: Vec<Speaker>,
        factory: Arc<dyn ClientFactory>,
        generator: Arc<dyn SummaryGenerator>,
    ) -> Self {
        let (events, _) = broadcast::channel(defaults::EVENT_BUFFER);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let sessions = SessionManager::new(
            factory,
            config.session.max_cached_sessions,
            config.session.idle_timeout(),
        );
        let summarizer = Arc::new(Summarizer::new(
            generator,
            &config.summary.model,
            config.summary.meta_threshold,
        ));
        let params = GenerationParams {
            temperature: config.generation.temperature,
            top_p: config.generation.top_p,
        };

        Self {
            roster: Roster::new(speakers),
            params,
            clock: Arc::new(TokioClock),
            rng: StdRng::from_entropy(),
            sessions,
            summarizer,
            transcript: Transcript::new(),
            audio_history: AudioHistory::new(),
            summaries: Vec::new(),
            last_summarized: 0,
            summarizing: false,
            scheduler: SchedulerState::new(),
            running: false,
            human_participating: false,
            interjection: None,
            uploaded: None,
            force_skip: ForceSkip::new(),
            epoch: 0,
            epoch_token: CancellationToken::new(),
            events,
            reports_tx,
            reports_rx,
            config,
        }
    }

    /// Replaces the clock used for cooldown and idle arithmetic.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seeds speaker selection for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Starts the control loop on the current runtime.
    pub fn spawn(self) -> (OrchestratorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(defaults::COMMAND_BUFFER);
        let handle = OrchestratorHandle::new(commands_tx, self.events.clone());
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = self.ticker();
        info!(speakers = self.roster.len(), "orchestrator started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if matches!(command, Command::Shutdown) {
                        break;
                    }
                    let tick_changed = matches!(command, Command::SetChaosMode(_));
                    self.handle(command).await;
                    if tick_changed {
                        ticker = self.ticker();
                    }
                }
                Some(report) = self.reports_rx.recv() => self.on_report(report),
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.epoch_token.cancel();
        self.sessions.disconnect_all().await;
        info!("orchestrator stopped");
    }

    fn ticker(&self) -> Interval {
        let period = self.config.orchestration.tick_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn emit(&self, event: OrchestratorEvent) {
        publish(&self.events, event);
    }

    /// Ids that may be selected: agents, then the human while taking part.
    fn participants(&self) -> Vec<SpeakerId> {
        let mut ids: Vec<SpeakerId> = self.roster.agents().iter().map(|a| a.id.clone()).collect();
        if self.human_participating {
            ids.push(SpeakerId::human());
        }
        ids
    }

    fn human_name(&self) -> &str {
        &self.config.conversation.user_name
    }

    async fn tick(&mut self) {
        if !self.running || self.scheduler.waiting_for_human || self.roster.is_empty() {
            return;
        }
        let cap = max_concurrency(self.config.orchestration.chaos_mode, self.roster.len());
        if self.scheduler.active.len() >= cap {
            return;
        }

        if self.scheduler.suggestions.len() <= defaults::SUGGESTION_REFILL_THRESHOLD {
            self.maybe_summarize();
        }

        let participants = self.participants();
        let policy = SelectionPolicy {
            allow_self_reply: self.config.orchestration.allow_self_reply,
            cooldown: self.config.orchestration.cooldown(),
            lru_fraction: self.config.orchestration.lru_fraction,
        };
        let now = self.clock.now();
        let Some(selection) =
            select_next(&mut self.scheduler, &participants, &policy, now, &mut self.rng)
        else {
            return;
        };
        debug!(speaker = %selection.speaker, source = ?selection.source, "selected next speaker");

        if selection.speaker.is_human() {
            self.begin_human_turn();
            return;
        }
        match self.roster.get(&selection.speaker).cloned() {
            Some(speaker) => self.start_agent_turn(speaker, selection.source).await,
            None => warn!(speaker = %selection.speaker, "selected speaker left the roster"),
        }
    }

    fn begin_human_turn(&mut self) {
        let human = SpeakerId::human();
        self.scheduler.begin_turn(&human);
        self.scheduler.waiting_for_human = true;
        info!("waiting for human participant");
        self.emit(OrchestratorEvent::WaitingForHuman);
    }

    async fn start_agent_turn(&mut self, speaker: Speaker, source: SelectionSource) {
        self.scheduler.begin_turn(&speaker.id);
        let now = self.clock.now();
        let last_turn_at = self.scheduler.last_turn_at(&speaker.id);
        let recent = self
            .transcript
            .recent(self.config.session.recent_transcript_turns);

        let lease = self
            .sessions
            .acquire(AcquireRequest {
                speaker: &speaker,
                params: self.params,
                topic: &self.config.conversation.topic,
                eligible_count: self.roster.len(),
                last_turn_at,
                now,
                summaries: &self.summaries,
                recent,
            })
            .await;
        if let Some(reason) = lease.reset {
            self.emit(OrchestratorEvent::SessionReset {
                speaker: speaker.id.clone(),
                reason,
            });
        }

        let context = match &self.uploaded {
            Some(upload) => TurnContext {
                audio: Some(upload.clip.clone()),
                upload_duration: upload.duration,
                interjection: self.interjection.take(),
            },
            None => TurnContext {
                audio: if self.config.conversation.audio_accumulation {
                    self.audio_history.latest().cloned()
                } else {
                    None
                },
                upload_duration: Duration::ZERO,
                interjection: self.interjection.take(),
            },
        };

        info!(
            speaker = %speaker.id,
            ?source,
            fresh = lease.fresh,
            turn = lease.turn_count,
            "starting turn"
        );
        self.emit(OrchestratorEvent::TurnStarted {
            speaker: speaker.id.clone(),
            fresh_session: lease.fresh,
        });

        let request = TurnRequest {
            lease,
            context,
            capture_audio: self.config.conversation.audio_accumulation && self.uploaded.is_none(),
            watchdog: WatchdogSettings::from(&self.config.watchdog),
            force_skip: self.force_skip.clone(),
            cancel: self.epoch_token.child_token(),
            observer: Arc::new(EventObserver {
                events: self.events.clone(),
            }),
        };
        let epoch = self.epoch;
        let reports = self.reports_tx.clone();
        let speaker_id = speaker.id;
        tokio::spawn(async move {
            let outcome = run_turn(request).await;
            let report = Report::TurnFinished {
                epoch,
                speaker: speaker_id,
                outcome,
            };
            if reports.send(report).is_err() {
                debug!("turn finished after orchestrator stopped");
            }
        });
    }

    fn maybe_summarize(&mut self) {
        if !should_summarize(
            self.config.summary.enabled,
            self.summarizing,
            self.transcript.len(),
            self.last_summarized,
            self.roster.len(),
        ) {
            return;
        }
        self.summarizing = true;

        let now = self.clock.now();
        let agents = self
            .roster
            .agents()
            .iter()
            .map(|a| SpeakerActivity {
                id: a.id.clone(),
                name: a.name.clone(),
                last_spoke: self
                    .scheduler
                    .last_turn_at(&a.id)
                    .map(|at| now.saturating_duration_since(at)),
            })
            .collect();
        let input = SummaryInput {
            unseen: self.transcript.since(self.last_summarized).to_vec(),
            transcript_len: self.transcript.len(),
            summaries: self.summaries.clone(),
            agents,
            human: self
                .human_participating
                .then(|| (SpeakerId::human(), self.human_name().to_string())),
            priority: self.scheduler.suggestions.front().cloned(),
        };

        debug!(unseen = input.unseen.len(), "starting summarizer");
        let summarizer = self.summarizer.clone();
        let reports = self.reports_tx.clone();
        let epoch = self.epoch;
        let cancel = self.epoch_token.child_token();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("summary abandoned by reset");
                    return;
                }
                result = summarizer.run(input) => result,
            };
            if reports.send(Report::SummaryFinished { epoch, result }).is_err() {
                debug!("summary finished after orchestrator stopped");
            }
        });
    }

    fn on_report(&mut self, report: Report) {
        match report {
            Report::TurnFinished {
                epoch,
                speaker,
                outcome,
            } => {
                if epoch != self.epoch {
                    debug!(speaker = %speaker, "discarding turn from before reset");
                    return;
                }
                self.finish_agent_turn(speaker, outcome);
            }
            Report::SummaryFinished { epoch, result } => {
                if epoch != self.epoch {
                    debug!("discarding summary from before reset");
                    return;
                }
                self.summarizing = false;
                match result {
                    Ok(update) => self.apply_summary(update),
                    Err(e) => warn!(error = %e, "summarization failed"),
                }
            }
        }
    }

    fn finish_agent_turn(&mut self, speaker: SpeakerId, outcome: TurnOutcome) {
        self.scheduler.finish_turn(&speaker, self.clock.now());

        if outcome.end.records_text() && !outcome.text.is_empty() {
            let name = self
                .roster
                .get(&speaker)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| speaker.to_string());
            let entry = self.transcript.append(&name, &outcome.text, false).clone();
            self.emit(OrchestratorEvent::TranscriptAppended { entry });
        }
        if let Some(clip) = outcome.audio
            && self.config.conversation.audio_accumulation
            && self.uploaded.is_none()
        {
            self.audio_history.push(clip);
        }

        info!(speaker = %speaker, end = ?outcome.end, "turn ended");
        self.emit(OrchestratorEvent::Volume {
            speaker: speaker.clone(),
            level: 0.0,
        });
        self.emit(OrchestratorEvent::TurnEnded {
            speaker,
            end: outcome.end,
        });
    }

    fn apply_summary(&mut self, update: SummaryUpdate) {
        if let Some(consolidated) = update.consolidated {
            info!("summaries consolidated");
            self.summaries = vec![consolidated.clone()];
            self.emit(OrchestratorEvent::SummaryUpdated {
                summary: consolidated,
            });
        }
        if let Some(fragment) = update.fragment {
            self.summaries.push(fragment.clone());
            self.last_summarized = update.transcript_len;
            self.emit(OrchestratorEvent::SummaryUpdated { summary: fragment });
        }

        let participants = self.participants();
        let valid: Vec<SpeakerId> = update
            .next_speakers
            .into_iter()
            .filter(|id| participants.contains(id))
            .take(self.config.summary.max_suggestions)
            .collect();
        if !valid.is_empty() {
            debug!(count = valid.len(), "speaking plan updated");
            self.scheduler.replace_suggestions(valid.clone());
            self.emit(OrchestratorEvent::SuggestionsUpdated { speakers: valid });
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start => {
                self.running = true;
                info!("orchestration running");
            }
            Command::Stop => {
                self.running = false;
                info!("orchestration paused");
            }
            Command::SetChaosMode(enabled) => self.config.orchestration.chaos_mode = enabled,
            Command::SetSelfReply(allowed) => self.config.orchestration.allow_self_reply = allowed,
            Command::SetNextSpeaker(speaker) => self.scheduler.override_next = speaker,
            Command::ForceEndTurn => self.force_skip.raise(self.config.watchdog.force_skip_grace()),
            Command::Reset => {
                self.reset().await;
                return;
            }
            Command::JoinAsHuman => self.human_participating = true,
            Command::LeaveAsHuman => {
                self.human_participating = false;
                self.release_human_slot();
            }
            Command::SubmitHumanTurn { text, audio } => self.submit_human_turn(text, audio),
            Command::SetTopic(topic) => {
                self.change_topic(topic).await;
                return;
            }
            Command::SetAudioAccumulation(enabled) => {
                self.config.conversation.audio_accumulation = enabled
            }
            Command::SetSummariesEnabled(enabled) => self.config.summary.enabled = enabled,
            Command::Interject(message) => self.interjection = Some(message),
            Command::SetUploadedContext(context) => self.set_uploaded_context(context),
            Command::UpsertSpeaker(speaker) => {
                if !self.roster.upsert(speaker) {
                    warn!("ignoring attempt to add the human participant as an agent");
                }
            }
            Command::RemoveSpeaker(id) => {
                self.roster.remove(&id);
                self.sessions.reset(&id).await;
            }
            Command::SetGenerationParams(params) => self.params = params,
            Command::SetSpeechTimeLimit(limit) => {
                self.config.watchdog.speech_time_limit_secs = limit.as_secs().max(1)
            }
            Command::Snapshot(reply) => {
                if reply.send(self.snapshot()).is_err() {
                    debug!("snapshot requester went away");
                }
                return;
            }
            // Handled by the loop.
            Command::Shutdown => return,
        }
        self.emit(OrchestratorEvent::StateChanged);
    }

    fn release_human_slot(&mut self) {
        if self.scheduler.waiting_for_human {
            self.scheduler.waiting_for_human = false;
            self.scheduler.active.remove(&SpeakerId::human());
        }
    }

    fn submit_human_turn(&mut self, text: Option<String>, audio: Option<AudioClip>) {
        if !self.scheduler.waiting_for_human {
            warn!("ignoring human turn submitted while none is pending");
            return;
        }
        let spoken = text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let label = match (&self.uploaded, &audio, spoken) {
            (_, _, Some(spoken)) => spoken,
            (Some(upload), _, None) => format!("(Uploaded Audio: {})", upload.name),
            (None, Some(_), None) => "(Audio Message)".to_string(),
            (None, None, None) => "(No Audio)".to_string(),
        };

        let name = self.human_name().to_string();
        let entry = self.transcript.append(&name, &label, true).clone();
        self.emit(OrchestratorEvent::TranscriptAppended { entry });

        if let Some(clip) = audio
            && self.uploaded.is_none()
            && self.config.conversation.audio_accumulation
        {
            self.audio_history.push(clip);
        }

        let human = SpeakerId::human();
        self.scheduler.waiting_for_human = false;
        self.scheduler.finish_turn(&human, self.clock.now());
        self.emit(OrchestratorEvent::TurnEnded {
            speaker: human,
            end: crate::turn::TurnEnd::Completed,
        });
    }

    async fn change_topic(&mut self, topic: String) {
        if topic == self.config.conversation.topic {
            return;
        }
        let previous = std::mem::replace(&mut self.config.conversation.topic, topic);
        info!(from = %previous, to = %self.config.conversation.topic, "topic changed");
        let entry = self
            .transcript
            .append(
                defaults::SYSTEM_SPEAKER,
                &format!("changed topic from: \"{previous}\""),
                false,
            )
            .clone();
        self.emit(OrchestratorEvent::TranscriptAppended { entry });
        self.sessions.disconnect_all().await;
        self.force_skip.raise(self.config.watchdog.force_skip_grace());
        self.emit(OrchestratorEvent::StateChanged);
    }

    fn set_uploaded_context(&mut self, context: Option<UploadedContext>) {
        match context {
            Some(upload) => {
                info!(name = %upload.name, secs = upload.duration.as_secs_f64(), "using uploaded context");
                self.audio_history.clear();
                self.config.conversation.audio_accumulation = false;
                self.uploaded = Some(upload);
            }
            None => {
                self.uploaded = None;
                self.config.conversation.audio_accumulation = true;
            }
        }
    }

    /// Returns to an empty conversation. In-flight turns are cancelled and their
    /// reports discarded.
    async fn reset(&mut self) {
        info!("full conversation reset");
        self.epoch += 1;
        self.epoch_token.cancel();
        self.epoch_token = CancellationToken::new();

        self.running = false;
        self.transcript.clear();
        self.summaries.clear();
        self.last_summarized = 0;
        self.summarizing = false;
        self.audio_history.clear();
        self.scheduler.clear();
        self.human_participating = false;
        self.interjection = None;
        self.config.conversation.audio_accumulation = false;
        self.sessions.disconnect_all().await;
        self.force_skip.raise(self.config.watchdog.force_skip_grace());
        self.emit(OrchestratorEvent::Reset);
    }

    fn snapshot(&self) -> Snapshot {
        let mut active: Vec<SpeakerId> = self.scheduler.active.iter().cloned().collect();
        active.sort();
        Snapshot {
            running: self.running,
            chaos_mode: self.config.orchestration.chaos_mode,
            allow_self_reply: self.config.orchestration.allow_self_reply,
            summaries_enabled: self.config.summary.enabled,
            audio_accumulation: self.config.conversation.audio_accumulation,
            human_participating: self.human_participating,
            waiting_for_human: self.scheduler.waiting_for_human,
            summarizing: self.summarizing,
            topic: self.config.conversation.topic.clone(),
            speakers: self.roster.agents().to_vec(),
            active,
            suggestions: self.scheduler.suggestions.iter().cloned().collect(),
            override_next: self.scheduler.override_next.clone(),
            last_speaker: self.scheduler.last_speaker.clone(),
            cooldowns: self.scheduler.cooldowns.len(),
            transcript: self.transcript.entries().to_vec(),
            summaries: self.summaries.clone(),
            last_summarized: self.last_summarized,
            audio_history: self.audio_history.len(),
            sessions: self.sessions.cached_ids(),
            pending_interjection: self.interjection.clone(),
            uploaded_context: self.uploaded.as_ref().map(|u| u.name.clone()),
        }
    }
}
