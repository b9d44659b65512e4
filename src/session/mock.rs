//! Scripted in-memory streaming client.
//!
//! Used by tests and by `roundtable simulate`. Each completed `send` plays the next
//! scripted response on the client's event bus.

use crate::error::{Result, RoundtableError};
use crate::session::client::{
    ClientFactory, EventBus, EventSubscription, RealtimeInput, SessionEvent, StreamingClient,
};
use crate::session::config::LiveConfig;
use crate::speaker::{Speaker, SpeakerId};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One step of a scripted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockStep {
    Audio(Vec<u8>),
    Text(String),
    Delay(Duration),
    TurnComplete,
    Interrupted,
    Error(String),
    Close,
}

/// How a mock client behaves.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    turns: VecDeque<Vec<MockStep>>,
    fallback: Option<Vec<MockStep>>,
    fail_connect: bool,
    fail_disconnect: bool,
    never_opens: bool,
    output_mime_type: Option<String>,
}

impl MockBehavior {
    /// Queues the response for the next unscripted turn.
    pub fn with_turn(mut self, steps: Vec<MockStep>) -> Self {
        self.turns.push_back(steps);
        self
    }

    /// Response used once queued turns run out.
    pub fn with_fallback(mut self, steps: Vec<MockStep>) -> Self {
        self.fallback = Some(steps);
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_disconnect(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }

    /// Connects without ever emitting `Open`.
    pub fn never_opens(mut self) -> Self {
        self.never_opens = true;
        self
    }

    pub fn with_output_mime_type(mut self, mime_type: &str) -> Self {
        self.output_mime_type = Some(mime_type.to_string());
        self
    }

    fn next_turn(&mut self) -> Vec<MockStep> {
        self.turns
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| {
                vec![
                    MockStep::Text("mock line".to_string()),
                    MockStep::TurnComplete,
                ]
            })
    }
}

/// Something the client was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentItem {
    Text { text: String, turn_complete: bool },
    Realtime(RealtimeInput),
}

/// A sent item with the (tokio) time it was sent.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub at: tokio::time::Instant,
    pub item: SentItem,
}

/// In-memory [`StreamingClient`] that replays scripted responses.
#[derive(Debug)]
pub struct MockStreamingClient {
    behavior: Mutex<MockBehavior>,
    bus: EventBus,
    connected: Arc<AtomicBool>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    sent: Mutex<Vec<Recorded>>,
    last_config: Mutex<Option<LiveConfig>>,
}

impl MockStreamingClient {
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            bus: EventBus::default(),
            connected: Arc::new(AtomicBool::new(false)),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            last_config: Mutex::new(None),
        }
    }

    /// Publishes an event directly, bypassing the script.
    pub fn emit(&self, event: SessionEvent) {
        self.bus.publish(event);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Recorded> {
        lock(&self.sent).clone()
    }

    pub fn sent_items(&self) -> Vec<SentItem> {
        lock(&self.sent).iter().map(|r| r.item.clone()).collect()
    }

    pub fn last_config(&self) -> Option<LiveConfig> {
        lock(&self.last_config).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    fn record(&self, item: SentItem) {
        lock(&self.sent).push(Recorded {
            at: tokio::time::Instant::now(),
            item,
        });
    }

    fn play(&self, steps: Vec<MockStep>) {
        let bus = self.bus.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            for step in steps {
                match step {
                    MockStep::Delay(d) => tokio::time::sleep(d).await,
                    MockStep::Audio(bytes) => bus.publish(SessionEvent::AudioChunk(bytes)),
                    MockStep::Text(text) => bus.publish(SessionEvent::TranscriptionDelta(text)),
                    MockStep::TurnComplete => bus.publish(SessionEvent::TurnComplete),
                    MockStep::Interrupted => bus.publish(SessionEvent::Interrupted),
                    MockStep::Error(reason) => bus.publish(SessionEvent::Error(reason)),
                    MockStep::Close => {
                        connected.store(false, Ordering::SeqCst);
                        bus.publish(SessionEvent::Close);
                    }
                }
            }
        });
    }
}

impl Default for MockStreamingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamingClient for MockStreamingClient {
    async fn connect(&self, config: &LiveConfig) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (fail, never_opens) = {
            let behavior = lock(&self.behavior);
            (behavior.fail_connect, behavior.never_opens)
        };
        if fail {
            return Err(RoundtableError::Connect {
                message: "mock connect failure".to_string(),
            });
        }
        *lock(&self.last_config) = Some(config.clone());
        self.connected.store(true, Ordering::SeqCst);
        if !never_opens {
            self.bus.publish(SessionEvent::Open);
        }
        Ok(())
    }

    async fn send(&self, text: &str, turn_complete: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(RoundtableError::NotConnected);
        }
        self.record(SentItem::Text {
            text: text.to_string(),
            turn_complete,
        });
        if turn_complete {
            let steps = lock(&self.behavior).next_turn();
            self.play(steps);
        }
        Ok(())
    }

    async fn send_realtime_input(&self, input: RealtimeInput) -> Result<()> {
        if !self.is_connected() {
            return Err(RoundtableError::NotConnected);
        }
        self.record(SentItem::Realtime(input));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if lock(&self.behavior).fail_disconnect {
            return Err(RoundtableError::Transport {
                message: "mock disconnect failure".to_string(),
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    fn output_mime_type(&self) -> Option<String> {
        lock(&self.behavior).output_mime_type.clone()
    }
}

/// Factory handing out [`MockStreamingClient`]s, keeping every one it created.
#[derive(Debug, Default)]
pub struct MockClientFactory {
    behaviors: HashMap<SpeakerId, MockBehavior>,
    fallback: MockBehavior,
    created: Mutex<Vec<(SpeakerId, Arc<MockStreamingClient>)>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior for clients created for one speaker.
    pub fn with_behavior(mut self, speaker_id: &str, behavior: MockBehavior) -> Self {
        self.behaviors.insert(SpeakerId::new(speaker_id), behavior);
        self
    }

    /// Behavior for speakers without their own.
    pub fn with_fallback(mut self, behavior: MockBehavior) -> Self {
        self.fallback = behavior;
        self
    }

    /// Clients created for a speaker, oldest first.
    pub fn clients_for(&self, speaker_id: &SpeakerId) -> Vec<Arc<MockStreamingClient>> {
        lock(&self.created)
            .iter()
            .filter(|(id, _)| id == speaker_id)
            .map(|(_, client)| client.clone())
            .collect()
    }

    pub fn created_count(&self, speaker_id: &SpeakerId) -> usize {
        self.clients_for(speaker_id).len()
    }

    pub fn total_created(&self) -> usize {
        lock(&self.created).len()
    }
}

impl ClientFactory for MockClientFactory {
    fn create(&self, speaker: &Speaker) -> Arc<dyn StreamingClient> {
        let behavior = self
            .behaviors
            .get(&speaker.id)
            .unwrap_or(&self.fallback)
            .clone();
        let client = Arc::new(MockStreamingClient::with_behavior(behavior));
        lock(&self.created).push((speaker.id.clone(), client.clone()));
        client
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
