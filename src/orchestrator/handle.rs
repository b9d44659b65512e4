//! Control surface: commands sent to the orchestrator task.

use crate::audio::{AudioClip, UploadedContext};
use crate::error::{Result, RoundtableError};
use crate::orchestrator::event::{OrchestratorEvent, Snapshot};
use crate::speaker::{GenerationParams, Speaker, SpeakerId};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Requests handled by the control loop, in arrival order.
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    SetChaosMode(bool),
    SetSelfReply(bool),
    SetNextSpeaker(Option<SpeakerId>),
    ForceEndTurn,
    Reset,
    JoinAsHuman,
    LeaveAsHuman,
    SubmitHumanTurn {
        text: Option<String>,
        audio: Option<AudioClip>,
    },
    SetTopic(String),
    SetAudioAccumulation(bool),
    SetSummariesEnabled(bool),
    Interject(String),
    SetUploadedContext(Option<UploadedContext>),
    UpsertSpeaker(Speaker),
    RemoveSpeaker(SpeakerId),
    SetGenerationParams(GenerationParams),
    SetSpeechTimeLimit(Duration),
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

/// Cloneable handle to a running orchestrator.
///
/// Every method fails with [`RoundtableError::OrchestratorStopped`] once the
/// control loop has exited.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl OrchestratorHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<OrchestratorEvent>,
    ) -> Self {
        Self { commands, events }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RoundtableError::OrchestratorStopped)
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn set_chaos_mode(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetChaosMode(enabled)).await
    }

    pub async fn set_self_reply(&self, allowed: bool) -> Result<()> {
        self.send(Command::SetSelfReply(allowed)).await
    }

    /// Sets or clears the explicit next speaker.
    pub async fn set_next_speaker(&self, speaker: Option<SpeakerId>) -> Result<()> {
        self.send(Command::SetNextSpeaker(speaker)).await
    }

    /// Aborts every in-flight agent turn, keeping what was said so far.
    pub async fn force_end_turn(&self) -> Result<()> {
        self.send(Command::ForceEndTurn).await
    }

    /// Clears the conversation and disconnects every session.
    pub async fn reset(&self) -> Result<()> {
        self.send(Command::Reset).await
    }

    pub async fn join_as_human(&self) -> Result<()> {
        self.send(Command::JoinAsHuman).await
    }

    pub async fn leave_as_human(&self) -> Result<()> {
        self.send(Command::LeaveAsHuman).await
    }

    /// Completes a pending human turn. Audio is 16 kHz mono PCM16.
    pub async fn submit_human_turn(
        &self,
        text: Option<String>,
        audio: Option<AudioClip>,
    ) -> Result<()> {
        self.send(Command::SubmitHumanTurn { text, audio }).await
    }

    pub async fn set_topic(&self, topic: &str) -> Result<()> {
        self.send(Command::SetTopic(topic.to_string())).await
    }

    pub async fn set_audio_accumulation(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAudioAccumulation(enabled)).await
    }

    pub async fn set_summaries_enabled(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetSummariesEnabled(enabled)).await
    }

    /// Queues a one-shot message for the next agent turn.
    pub async fn interject(&self, message: &str) -> Result<()> {
        self.send(Command::Interject(message.to_string())).await
    }

    pub async fn set_uploaded_context(&self, context: Option<UploadedContext>) -> Result<()> {
        self.send(Command::SetUploadedContext(context)).await
    }

    pub async fn upsert_speaker(&self, speaker: Speaker) -> Result<()> {
        self.send(Command::UpsertSpeaker(speaker)).await
    }

    pub async fn remove_speaker(&self, id: SpeakerId) -> Result<()> {
        self.send(Command::RemoveSpeaker(id)).await
    }

    pub async fn set_generation_params(&self, params: GenerationParams) -> Result<()> {
        self.send(Command::SetGenerationParams(params)).await
    }

    pub async fn set_speech_time_limit(&self, limit: Duration) -> Result<()> {
        self.send(Command::SetSpeechTimeLimit(limit)).await
    }

    /// Current state, after every previously sent command was applied.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| RoundtableError::OrchestratorStopped)
    }

    /// Stops the control loop and disconnects every session.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}
