//! Streaming session client contract.
//!
//! A client wraps one long-lived realtime speech connection. The orchestrator only
//! drives it through [`StreamingClient`] and observes it through a per-turn
//! [`EventSubscription`]; wire details belong to the implementation.

use crate::error::Result;
use crate::session::config::LiveConfig;
use crate::speaker::Speaker;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events emitted by a streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake finished; input may be sent.
    Open,
    /// A chunk of synthesized PCM16 audio at the client's output rate.
    AudioChunk(Vec<u8>),
    /// Incremental transcription of the synthesized speech.
    TranscriptionDelta(String),
    /// The model finished its response.
    TurnComplete,
    /// The service cut the response short.
    Interrupted,
    /// Transport failure with a reason.
    Error(String),
    /// The connection closed.
    Close,
}

/// Realtime input accepted by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeInput {
    Audio { mime_type: String, data: Vec<u8> },
    ActivityStart,
    ActivityEnd,
}

/// A realtime speech connection bound to one speaker.
#[async_trait]
pub trait StreamingClient: Send + Sync {
    /// Opens the connection. `SessionEvent::Open` follows on success.
    async fn connect(&self, config: &LiveConfig) -> Result<()>;

    /// Sends client content, optionally marking the user turn complete.
    async fn send(&self, text: &str, turn_complete: bool) -> Result<()>;

    async fn send_realtime_input(&self, input: RealtimeInput) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Subscribes to events emitted from now on.
    fn subscribe(&self) -> EventSubscription;

    /// MIME type of synthesized audio, when the service reported one.
    fn output_mime_type(&self) -> Option<String>;
}

/// Creates a client for a speaker whenever the session manager needs a fresh one.
pub trait ClientFactory: Send + Sync {
    fn create(&self, speaker: &Speaker) -> Arc<dyn StreamingClient>;
}

/// Fan-out point clients use to publish [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Events with no subscriber are dropped.
    pub fn publish(&self, event: SessionEvent) {
        // No receivers is a normal state between turns.
        if self.sender.send(event).is_err() {
            tracing::trace!("session event dropped without subscribers");
        }
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUFFER)
    }
}

/// A turn's view of a client's event stream. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl EventSubscription {
    /// Next event, or `None` once the client is gone.
    ///
    /// Lagging skips the missed events rather than failing the turn.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "turn subscription lagged behind session events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
