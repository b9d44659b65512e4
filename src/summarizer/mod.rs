//! Background compaction of the transcript into summaries, plus a speaking plan.
//!
//! The orchestrator decides *when* to summarize ([`should_summarize`]) and applies
//! the resulting [`SummaryUpdate`]; this module only talks to the generation backend.

#[cfg(feature = "gemini")]
pub mod gemini;
pub mod prompt;

use crate::error::{Result, RoundtableError};
use crate::speaker::SpeakerId;
use crate::transcript::TranscriptEntry;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use prompt::SpeakerActivity;

/// Temperature for consolidating many summaries into one.
const CONSOLIDATION_TEMPERATURE: f32 = 0.5;

/// Temperature for summarizing new lines.
const FRAGMENT_TEMPERATURE: f32 = 1.0;

/// A structured-output generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    /// Response schema the backend must follow.
    pub schema: Value,
    pub temperature: f32,
}

/// Backend producing structured JSON for a prompt.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Value>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsolidationResponse {
    consolidated_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FragmentResponse {
    new_fragment_summary: Option<String>,
    #[serde(default)]
    next_speaker_ids: Option<Vec<String>>,
}

/// Snapshot of the conversation handed to one summarizer run.
#[derive(Debug, Clone)]
pub struct SummaryInput {
    /// Transcript entries since the last summary.
    pub unseen: Vec<TranscriptEntry>,
    /// Transcript length when the snapshot was taken.
    pub transcript_len: usize,
    pub summaries: Vec<String>,
    pub agents: Vec<SpeakerActivity>,
    /// Human participant id and name, while one is taking part.
    pub human: Option<(SpeakerId, String)>,
    /// Current head of the suggestion queue.
    pub priority: Option<SpeakerId>,
}

/// What a run produced. Unvalidated; the orchestrator filters speaker ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryUpdate {
    /// Replaces every accumulated summary when set.
    pub consolidated: Option<String>,
    /// Appended to the summaries when set.
    pub fragment: Option<String>,
    pub next_speakers: Vec<SpeakerId>,
    /// Transcript length the fragment covers.
    pub transcript_len: usize,
}

/// Whether a summarizer run should start now.
///
/// Requires a non-empty transcript, no run in flight, and at least one full
/// rotation of eligible speakers since the last summary.
pub fn should_summarize(
    enabled: bool,
    in_flight: bool,
    transcript_len: usize,
    last_summarized: usize,
    eligible_count: usize,
) -> bool {
    enabled
        && !in_flight
        && transcript_len > 0
        && transcript_len.saturating_sub(last_summarized) >= eligible_count
}

/// Runs consolidation and fragment summaries against a backend.
pub struct Summarizer {
    generator: Arc<dyn SummaryGenerator>,
    model: String,
    meta_threshold: usize,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn SummaryGenerator>, model: &str, meta_threshold: usize) -> Self {
        Self {
            generator,
            model: model.to_string(),
            meta_threshold: meta_threshold.max(1),
        }
    }

    /// Summarizes the unseen lines, consolidating first once enough summaries piled up.
    ///
    /// A failed consolidation aborts the run. A failed fragment after a successful
    /// consolidation still returns the consolidation.
    pub async fn run(&self, input: SummaryInput) -> Result<SummaryUpdate> {
        let mut update = SummaryUpdate {
            transcript_len: input.transcript_len,
            ..SummaryUpdate::default()
        };

        if input.summaries.len() >= self.meta_threshold {
            info!(count = input.summaries.len(), "consolidating summaries");
            let value = self
                .generator
                .generate(GenerationRequest {
                    model: self.model.clone(),
                    prompt: prompt::consolidation_prompt(&input.summaries),
                    schema: prompt::consolidation_schema(),
                    temperature: CONSOLIDATION_TEMPERATURE,
                })
                .await?;
            let parsed: ConsolidationResponse = parse(value)?;
            update.consolidated = parsed.consolidated_summary.filter(|s| !s.trim().is_empty());
        }

        let human = input
            .human
            .as_ref()
            .map(|(id, name)| (id, name.as_str()));
        let request = GenerationRequest {
            model: self.model.clone(),
            prompt: prompt::fragment_prompt(
                &input.unseen,
                &input.agents,
                human,
                input.priority.as_ref(),
            ),
            schema: prompt::fragment_schema(),
            temperature: FRAGMENT_TEMPERATURE,
        };

        let fragment = match self.generator.generate(request).await {
            Ok(value) => parse::<FragmentResponse>(value),
            Err(e) => Err(e),
        };
        match fragment {
            Ok(parsed) => {
                update.fragment = parsed.new_fragment_summary.filter(|s| !s.trim().is_empty());
                update.next_speakers = parsed
                    .next_speaker_ids
                    .unwrap_or_default()
                    .into_iter()
                    .map(SpeakerId::new)
                    .collect();
                debug!(
                    fragment = update.fragment.is_some(),
                    suggestions = update.next_speakers.len(),
                    "summary generated"
                );
                Ok(update)
            }
            Err(e) if update.consolidated.is_some() => {
                warn!(error = %e, "fragment summary failed after consolidation");
                Ok(update)
            }
            Err(e) => Err(e),
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| RoundtableError::MalformedResponse {
        message: e.to_string(),
    })
}

/// Scripted [`SummaryGenerator`] for tests and simulation.
#[derive(Debug, Default)]
pub struct MockGenerator {
    responses: Mutex<VecDeque<std::result::Result<Value, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Option<Duration>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response.
    pub fn with_response(self, value: Value) -> Self {
        lock(&self.responses).push_back(Ok(value));
        self
    }

    /// Queues a failure.
    pub fn with_failure(self, message: &str) -> Self {
        lock(&self.responses).push_back(Err(message.to_string()));
        self
    }

    /// Makes every call take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl SummaryGenerator for MockGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Value> {
        lock(&self.requests).push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.responses).pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(RoundtableError::Generation { message }),
            None => Ok(serde_json::json!({
                "newFragmentSummary": "mock summary",
                "nextSpeakerIds": []
            })),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(summaries: usize) -> SummaryInput {
        SummaryInput {
            unseen: Vec::new(),
            transcript_len: 7,
            summaries: (0..summaries).map(|i| format!("s{i}")).collect(),
            agents: Vec::new(),
            human: None,
            priority: None,
        }
    }

    #[test]
    fn trigger_needs_full_rotation() {
        // One short of a rotation.
        assert!(!should_summarize(true, false, 5, 3, 3));
        assert!(should_summarize(true, false, 6, 3, 3));
        assert!(!should_summarize(true, true, 6, 3, 3));
        assert!(!should_summarize(false, false, 6, 3, 3));
        assert!(!should_summarize(true, false, 0, 0, 0));
    }

    #[tokio::test]
    async fn fragment_run_returns_summary_and_ids() {
        let generator = Arc::new(MockGenerator::new().with_response(json!({
            "newFragmentSummary": "Lenin argued for peace.",
            "nextSpeakerIds": ["rosa", "marx"]
        })));
        let summarizer = Summarizer::new(generator.clone(), "m", 10);
        let update = summarizer.run(input(0)).await.unwrap();
        assert_eq!(update.fragment.as_deref(), Some("Lenin argued for peace."));
        assert_eq!(
            update.next_speakers,
            vec![SpeakerId::new("rosa"), SpeakerId::new("marx")]
        );
        assert_eq!(update.transcript_len, 7);
        assert_eq!(update.consolidated, None);
        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, 1.0);
        assert_eq!(requests[0].model, "m");
    }

    #[tokio::test]
    async fn ten_summaries_trigger_consolidation_first() {
        let generator = Arc::new(
            MockGenerator::new()
                .with_response(json!({ "consolidatedSummary": "Everything so far." }))
                .with_response(json!({ "newFragmentSummary": "New bit", "nextSpeakerIds": [] })),
        );
        let summarizer = Summarizer::new(generator.clone(), "m", 10);
        let update = summarizer.run(input(10)).await.unwrap();
        assert_eq!(update.consolidated.as_deref(), Some("Everything so far."));
        assert_eq!(update.fragment.as_deref(), Some("New bit"));
        let requests = generator.requests();
        assert_eq!(requests[0].temperature, 0.5);
        assert!(requests[0].prompt.contains("s9"));
    }

    #[tokio::test]
    async fn nine_summaries_skip_consolidation() {
        let generator = Arc::new(MockGenerator::new());
        let summarizer = Summarizer::new(generator.clone(), "m", 10);
        summarizer.run(input(9)).await.unwrap();
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn failure_propagates() {
        let generator = Arc::new(MockGenerator::new().with_failure("quota"));
        let summarizer = Summarizer::new(generator, "m", 10);
        assert!(matches!(
            summarizer.run(input(0)).await,
            Err(RoundtableError::Generation { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_response_is_an_error() {
        let generator = Arc::new(
            MockGenerator::new().with_response(json!({ "nextSpeakerIds": "not-an-array" })),
        );
        let summarizer = Summarizer::new(generator, "m", 10);
        assert!(matches!(
            summarizer.run(input(0)).await,
            Err(RoundtableError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn consolidation_survives_fragment_failure() {
        let generator = Arc::new(
            MockGenerator::new()
                .with_response(json!({ "consolidatedSummary": "All of it." }))
                .with_failure("timeout"),
        );
        let summarizer = Summarizer::new(generator, "m", 10);
        let update = summarizer.run(input(12)).await.unwrap();
        assert_eq!(update.consolidated.as_deref(), Some("All of it."));
        assert_eq!(update.fragment, None);
    }
}
