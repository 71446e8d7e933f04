use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use lyra_client::{CallError, ChatPrompt, ModelBackend};
use lyra_config::AppConfig;
use lyra_embed::{EmbeddingIndex, IndexError};
use lyra_persona::{EmotionAxis, FragmentId, PARTICLE_SYSTEM_PROMPT, score};
use lyra_queue::Request;
use lyra_store::{NewMemory, ProfileStore};

use crate::prompts;
use crate::synthesis::{
    clean_particle_text, personalization_score, render_memory_context, synthesize,
};
use crate::wave::{WaveAnalysis, fallback_wave, parse_wave_response};

/// Canned particle substitute when the generative call fails.
const PARTICLE_FALLBACK_TEXT: &str = "I understand your request and I'm here to help.";

/// Confidence attached to a successful generative completion.
const PARTICLE_CONFIDENCE: f64 = 0.85;

/// Confidence attached to the canned fallback.
const PARTICLE_FALLBACK_CONFIDENCE: f64 = 0.5;

/// Particle chars contributing to the embedding search key.
const SEARCH_KEY_PARTICLE_CHARS: usize = 200;

/// Terminal failure of one dispatch.  Sub-call failures are normally
/// recovered by substitution; only these two kinds reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Both primary positions failed and the request deadline is spent.
    #[error("request deadline exceeded")]
    Timeout,
    /// The request was cancelled; no reply is produced.
    #[error("request cancelled")]
    Cancelled,
}

/// Lifecycle of one dispatch.  `Done`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Queued,
    Active,
    Fanout,
    AwaitAb,
    Embedding,
    Synthesise,
    Appending,
    Done,
    Failed,
    Cancelled,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchState::Done | DispatchState::Failed | DispatchState::Cancelled
        )
    }
}

/// Operational diagnostics accompanying a reply.  Never shown to the user.
#[derive(Debug, Clone)]
pub struct DispatchMetadata {
    pub queue_id: Uuid,
    /// One or more sub-calls fell back; the reply is still valid.
    pub degraded: bool,
    /// The embedding stage used the hash/keyword fallback.
    pub embedding_fallback: bool,
    /// The post-reply memory append failed; the reply was still delivered.
    pub store_failed: bool,
    pub personalization: f64,
    pub particle_time: Duration,
    pub wave_time: Duration,
    pub embedding_time: Duration,
    pub total_time: Duration,
    pub active_fragments: Vec<FragmentId>,
    pub dominant_emotion: String,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub reply: String,
    pub metadata: DispatchMetadata,
}

/// Rolling collapse statistics for status reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct ObserverMetrics {
    pub total_collapses: u64,
    pub successful_collapses: u64,
    pub average_collapse_secs: f64,
}

/// Per-dispatch tunables, extracted from the app config at startup.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub particle_timeout: Duration,
    pub wave_timeout: Duration,
    pub embed_timeout: Duration,
    pub grace_period: Duration,
    pub memory_top_k: usize,
    pub recent_context_lines: usize,
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            particle_timeout: Duration::from_secs(config.dispatch.particle_timeout_secs),
            wave_timeout: Duration::from_secs(config.dispatch.wave_timeout_secs),
            embed_timeout: Duration::from_secs(config.dispatch.embed_timeout_secs),
            grace_period: Duration::from_secs(config.dispatch.grace_period_secs),
            memory_top_k: config.synth.memory_top_k,
            recent_context_lines: config.profile.recent_context_lines,
        }
    }
}

struct ParticleOutcome {
    text: String,
    confidence: f64,
    elapsed: Duration,
    degraded: bool,
}

struct WaveOutcome {
    analysis: WaveAnalysis,
    elapsed: Duration,
    degraded: bool,
}

/// The observer: orchestrates the three positions for one request and
/// collapses them into a reply.  All collaborators are injected; the
/// dispatcher holds no global state.
pub struct Dispatcher {
    backend: Arc<dyn ModelBackend>,
    store: Arc<ProfileStore>,
    index: Arc<EmbeddingIndex>,
    settings: DispatchSettings,
    metrics: Mutex<ObserverMetrics>,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        store: Arc<ProfileStore>,
        index: Arc<EmbeddingIndex>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            backend,
            store,
            index,
            settings,
            metrics: Mutex::new(ObserverMetrics::default()),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub async fn metrics(&self) -> ObserverMetrics {
        *self.metrics.lock().await
    }

    /// Run one full dispatch.  Cancellation is observed at every stage
    /// boundary and inside every sub-call; a cancelled dispatch appends no
    /// memory and produces no reply.
    #[instrument(skip(self, request, cancel), fields(queue_id = %request.queue_id, user = %request.user_id))]
    pub async fn dispatch(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let started = Instant::now();
        let mut state = DispatchState::Active;

        let result = self.run(request, cancel, started, &mut state).await;
        match &result {
            Ok(_) => self.transition(&mut state, DispatchState::Done, request.queue_id),
            Err(DispatchError::Timeout) => {
                self.transition(&mut state, DispatchState::Failed, request.queue_id)
            }
            Err(DispatchError::Cancelled) => {
                self.transition(&mut state, DispatchState::Cancelled, request.queue_id)
            }
        }

        self.record_collapse(started.elapsed(), result.is_ok()).await;
        result
    }

    async fn run(
        &self,
        request: &Request,
        cancel: &CancellationToken,
        started: Instant,
        state: &mut DispatchState,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut degraded = false;

        // Emotion scoring and fragment selection are pure and fast.
        let score_outcome = score(&request.text);
        debug!(
            fragments = ?score_outcome.fragments.iter().map(|f| f.id).collect::<Vec<_>>(),
            "emotional state scored"
        );

        let profile = match self.store.get_profile(&request.user_id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(%err, "profile unreadable; dispatching against template");
                degraded = true;
                lyra_store::Profile::template(&request.user_id)
            }
        };

        let particle_user_prompt = prompts::particle_prompt(
            &request.user_id,
            &request.text,
            &profile,
            self.settings.recent_context_lines,
            &score_outcome,
        );
        let wave_prompt = prompts::wave_prompt(&request.user_id, &request.text);

        self.transition(state, DispatchState::Fanout, request.queue_id);
        let now = Instant::now();
        let particle_deadline = request.deadline.min(now + self.settings.particle_timeout);
        let wave_deadline = request.deadline.min(now + self.settings.wave_timeout);

        self.transition(state, DispatchState::AwaitAb, request.queue_id);
        let particle_fut = self.observe_particle(&particle_user_prompt, particle_deadline, cancel);
        let wave_fut = self.observe_wave(&request.user_id, &wave_prompt, wave_deadline, cancel);
        let (particle, wave) = tokio::join!(particle_fut, wave_fut);
        let (particle, wave) = (particle?, wave?);
        degraded |= particle.degraded || wave.degraded;

        if particle.degraded && wave.degraded && Instant::now() >= request.deadline {
            return Err(DispatchError::Timeout);
        }
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        // The embedding search key depends on both prior outputs, so this
        // stage is serialised after the fan-out.
        self.transition(state, DispatchState::Embedding, request.queue_id);
        let particle_head: String = particle.text.chars().take(SEARCH_KEY_PARTICLE_CHARS).collect();
        let search_key = format!("{particle_head} {}", wave.analysis.context_summary);
        let embed_deadline = request.deadline.min(Instant::now() + self.settings.embed_timeout);

        let embed_started = Instant::now();
        let embedding = match self
            .index
            .embed(self.backend.as_ref(), &search_key, embed_deadline, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(IndexError::Cancelled) => return Err(DispatchError::Cancelled),
            Err(err) => {
                // Persistence-layer failure; fall back deterministically.
                warn!(%err, "embedding stage failed; using hash fallback");
                lyra_embed::EmbeddingOutcome {
                    vector: lyra_embed::fallback_embedding(&search_key),
                    fallback: true,
                    latency: embed_started.elapsed(),
                }
            }
        };
        degraded |= embedding.fallback;

        let hits = if embedding.fallback {
            self.index
                .top_k_fallback(&search_key, self.settings.memory_top_k)
                .await
        } else {
            self.index
                .top_k(&embedding.vector, self.settings.memory_top_k)
                .await
        };
        let memory_context = render_memory_context(&hits);

        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        self.transition(state, DispatchState::Synthesise, request.queue_id);
        let reply = if Instant::now() >= request.deadline {
            // No time left to embellish; the cleaned particle text stands
            // alone.
            degraded = true;
            clean_particle_text(&particle.text)
        } else {
            synthesize(&particle.text, &wave.analysis, &memory_context)
        };

        let personalization = personalization_score(
            particle.confidence,
            wave.analysis.emotion_profile.len(),
            particle.elapsed,
            wave.elapsed,
        );

        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        self.transition(state, DispatchState::Appending, request.queue_id);
        let store_failed = self
            .append_exchange(request, &reply, &score_outcome, &embedding.vector)
            .await;
        degraded |= store_failed;

        let metadata = DispatchMetadata {
            queue_id: request.queue_id,
            degraded,
            embedding_fallback: embedding.fallback,
            store_failed,
            personalization,
            particle_time: particle.elapsed,
            wave_time: wave.elapsed,
            embedding_time: embedding.latency,
            total_time: started.elapsed(),
            active_fragments: score_outcome.fragments.iter().map(|f| f.id).collect(),
            dominant_emotion: wave.analysis.dominant_emotion().to_string(),
        };

        info!(
            degraded = metadata.degraded,
            fallback = metadata.embedding_fallback,
            reply_chars = reply.len(),
            "superposition collapsed"
        );
        Ok(DispatchOutcome { reply, metadata })
    }

    async fn observe_particle(
        &self,
        user_prompt: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ParticleOutcome, DispatchError> {
        let started = Instant::now();
        let prompt = ChatPrompt {
            system: PARTICLE_SYSTEM_PROMPT.to_string(),
            user: user_prompt.to_string(),
        };

        match self.backend.generate(&prompt, deadline, cancel).await {
            Ok(completion) => Ok(ParticleOutcome {
                text: completion.text,
                confidence: PARTICLE_CONFIDENCE,
                elapsed: completion.latency,
                degraded: false,
            }),
            Err(CallError::Cancelled) => Err(DispatchError::Cancelled),
            Err(err) => {
                warn!(%err, "particle position failed; substituting canned text");
                Ok(ParticleOutcome {
                    text: PARTICLE_FALLBACK_TEXT.to_string(),
                    confidence: PARTICLE_FALLBACK_CONFIDENCE,
                    elapsed: started.elapsed(),
                    degraded: true,
                })
            }
        }
    }

    async fn observe_wave(
        &self,
        user_id: &str,
        prompt: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<WaveOutcome, DispatchError> {
        let started = Instant::now();
        match self.backend.contextualize(prompt, deadline, cancel).await {
            Ok(completion) => Ok(WaveOutcome {
                analysis: parse_wave_response(&completion.text),
                elapsed: completion.latency,
                degraded: false,
            }),
            Err(CallError::Cancelled) => Err(DispatchError::Cancelled),
            Err(err) => {
                warn!(%err, "wave position failed; substituting neutral context");
                Ok(WaveOutcome {
                    analysis: fallback_wave(user_id),
                    elapsed: started.elapsed(),
                    degraded: true,
                })
            }
        }
    }

    /// Persist the exchange and refresh the embedding index.  Returns `true`
    /// when the store append failed; the reply is delivered regardless.
    async fn append_exchange(
        &self,
        request: &Request,
        reply: &str,
        score_outcome: &lyra_persona::ScoreOutcome,
        vector: &[f32],
    ) -> bool {
        let content = format!("User: {}\nLyra: {}", request.text, reply);

        let mut emotional_weight = HashMap::new();
        for axis in EmotionAxis::ALL {
            let weight = score_outcome.emotions.weight(axis);
            if weight > 0.0 {
                emotional_weight.insert(axis.name().to_string(), weight);
            }
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("channel".to_string(), request.channel.clone().into());
        metadata.insert(
            "fragments".to_string(),
            serde_json::json!(
                score_outcome
                    .fragments
                    .iter()
                    .map(|f| f.id.name())
                    .collect::<Vec<_>>()
            ),
        );

        let memory = NewMemory {
            content: content.clone(),
            memory_type: "conversation".to_string(),
            emotional_weight,
            metadata,
        };

        match self.store.append_memory(&request.user_id, memory).await {
            Ok(mem_id) => {
                let timestamp = Utc::now().to_rfc3339();
                if let Err(err) = self
                    .index
                    .index(&mem_id, vector.to_vec(), &content, &timestamp)
                    .await
                {
                    warn!(%err, "embedding index update failed");
                }
                false
            }
            Err(err) => {
                warn!(%err, "memory append failed; reply still delivered");
                true
            }
        }
    }

    fn transition(&self, state: &mut DispatchState, next: DispatchState, queue_id: Uuid) {
        debug!(%queue_id, from = ?state, to = ?next, "dispatch state");
        *state = next;
    }

    async fn record_collapse(&self, elapsed: Duration, success: bool) {
        let mut metrics = self.metrics.lock().await;
        metrics.total_collapses += 1;
        if success {
            metrics.successful_collapses += 1;
        }
        let n = metrics.total_collapses as f64;
        metrics.average_collapse_secs =
            (metrics.average_collapse_secs * (n - 1.0) + elapsed.as_secs_f64()) / n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_client::{Completion, EmbeddingCompletion};

    #[derive(Clone)]
    enum Script {
        Reply(String),
        Fail(CallError),
        /// Never completes; returns `Cancelled` when the token fires.
        Hang,
    }

    struct FakeBackend {
        particle: Script,
        wave: Script,
        embed_vector: Result<Vec<f32>, CallError>,
    }

    impl FakeBackend {
        async fn resolve(script: &Script, cancel: &CancellationToken) -> Result<String, CallError> {
            match script {
                Script::Reply(text) => Ok(text.clone()),
                Script::Fail(err) => Err(err.clone()),
                Script::Hang => {
                    cancel.cancelled().await;
                    Err(CallError::Cancelled)
                }
            }
        }
    }

    #[async_trait::async_trait]
    impl ModelBackend for FakeBackend {
        async fn generate(
            &self,
            _prompt: &ChatPrompt,
            _deadline: Instant,
            cancel: &CancellationToken,
        ) -> Result<Completion, CallError> {
            let text = Self::resolve(&self.particle, cancel).await?;
            Ok(Completion {
                text,
                latency: Duration::from_millis(10),
            })
        }

        async fn contextualize(
            &self,
            _prompt: &str,
            _deadline: Instant,
            cancel: &CancellationToken,
        ) -> Result<Completion, CallError> {
            let text = Self::resolve(&self.wave, cancel).await?;
            Ok(Completion {
                text,
                latency: Duration::from_millis(10),
            })
        }

        async fn embed(
            &self,
            _input: &str,
            _deadline: Instant,
            _cancel: &CancellationToken,
        ) -> Result<EmbeddingCompletion, CallError> {
            match &self.embed_vector {
                Ok(vector) => Ok(EmbeddingCompletion {
                    vector: vector.clone(),
                    latency: Duration::from_millis(5),
                }),
                Err(err) => Err(err.clone()),
            }
        }
    }

    async fn harness(backend: FakeBackend) -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProfileStore::new(dir.path()));
        let index = Arc::new(EmbeddingIndex::open(dir.path(), 0.7).await.unwrap());
        let settings = DispatchSettings::from_config(&AppConfig::default());
        let dispatcher = Dispatcher::new(Arc::new(backend), store, index, settings);
        (dir, dispatcher)
    }

    fn request(user: &str, text: &str) -> Request {
        Request::new(
            user,
            text,
            "chan",
            None,
            Instant::now() + Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn full_collapse_produces_reference_reply() {
        let backend = FakeBackend {
            particle: Script::Reply("<think>x</think>Hi!".to_string()),
            wave: Script::Reply("summary: a returning customer with interest in things".to_string()),
            // Inner product with the seeded unit vector [1, 0] is 0.82.
            embed_vector: Ok(vec![0.82, 0.572_364_3]),
        };
        let (_dir, dispatcher) = harness(backend).await;
        dispatcher
            .index
            .index(
                "mem_seed",
                vec![1.0, 0.0],
                "User likes quantum AI and superposition concepts",
                "2025-07-22T00:00:00Z",
            )
            .await
            .unwrap();

        let request = request("u1", "hello");
        let cancel = CancellationToken::new();
        let outcome = dispatcher.dispatch(&request, &cancel).await.unwrap();

        assert_eq!(
            outcome.reply,
            "Based on our previous interactions, Welcome back! Hi! \
             Drawing from our shared memories: Relevant memories:\n\
             1. User likes quantum AI and superposition concepts (relevance: 0.82)"
        );
        assert!(!outcome.metadata.degraded);
        assert!(!outcome.metadata.embedding_fallback);

        // The exchange was appended and indexed.
        let profile = dispatcher.store.get_profile("u1").await.unwrap();
        assert_eq!(profile.memory_context_index.total_memories, 1);
        assert_eq!(dispatcher.index.len().await, 2);
    }

    #[tokio::test]
    async fn particle_failure_substitutes_canned_text() {
        let backend = FakeBackend {
            particle: Script::Fail(CallError::Protocol("status 500".to_string())),
            wave: Script::Reply("calm analysis".to_string()),
            embed_vector: Ok(vec![0.5, 0.5]),
        };
        let (_dir, dispatcher) = harness(backend).await;

        let request = request("u4", "anything");
        let cancel = CancellationToken::new();
        let outcome = dispatcher.dispatch(&request, &cancel).await.unwrap();

        assert!(outcome.reply.contains("I understand your request and I'm here to help."));
        // Wave succeeded, so the continuity prefix applies.
        assert!(outcome.reply.starts_with("Based on our previous interactions, "));
        assert!(outcome.metadata.degraded);
    }

    #[tokio::test]
    async fn both_positions_failing_with_time_left_degrades() {
        let backend = FakeBackend {
            particle: Script::Fail(CallError::Timeout),
            wave: Script::Fail(CallError::Timeout),
            embed_vector: Err(CallError::Unavailable),
        };
        let (_dir, dispatcher) = harness(backend).await;

        let request = request("u2", "hello");
        let cancel = CancellationToken::new();
        let outcome = dispatcher.dispatch(&request, &cancel).await.unwrap();

        // Fallback wave has no memories and neutral emotion: the canned text
        // stands alone.
        assert_eq!(outcome.reply, "I understand your request and I'm here to help.");
        assert!(outcome.metadata.degraded);
        assert!(outcome.metadata.embedding_fallback);
    }

    #[tokio::test]
    async fn both_positions_failing_past_deadline_times_out() {
        let backend = FakeBackend {
            particle: Script::Fail(CallError::Unavailable),
            wave: Script::Fail(CallError::Unavailable),
            embed_vector: Err(CallError::Unavailable),
        };
        let (_dir, dispatcher) = harness(backend).await;

        let request = Request::new("u3", "hello", "chan", None, Instant::now());
        let cancel = CancellationToken::new();
        let result = dispatcher.dispatch(&request, &cancel).await;

        assert_eq!(result.unwrap_err(), DispatchError::Timeout);
        // Nothing was appended for the failed request.
        let profile = dispatcher.store.get_profile("u3").await.unwrap();
        assert_eq!(profile.memory_context_index.total_memories, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_subcalls_and_appends_nothing() {
        let backend = FakeBackend {
            particle: Script::Hang,
            wave: Script::Hang,
            embed_vector: Ok(vec![1.0]),
        };
        let (_dir, dispatcher) = harness(backend).await;
        let dispatcher = Arc::new(dispatcher);

        let request = request("u5", "hello");
        let cancel = CancellationToken::new();
        let task = {
            let dispatcher = dispatcher.clone();
            let cancel = cancel.clone();
            let request = request.clone();
            tokio::spawn(async move { dispatcher.dispatch(&request, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("sub-calls must cease within the grace period")
            .unwrap();
        assert_eq!(result.unwrap_err(), DispatchError::Cancelled);

        let profile = dispatcher.store.get_profile("u5").await.unwrap();
        assert_eq!(profile.memory_context_index.total_memories, 0);
    }

    #[tokio::test]
    async fn empty_message_with_dead_backends_still_replies() {
        let backend = FakeBackend {
            particle: Script::Fail(CallError::Unavailable),
            wave: Script::Fail(CallError::Unavailable),
            embed_vector: Err(CallError::Unavailable),
        };
        let (_dir, dispatcher) = harness(backend).await;

        let request = request("u6", "");
        let cancel = CancellationToken::new();
        let outcome = dispatcher.dispatch(&request, &cancel).await.unwrap();

        assert!(!outcome.reply.is_empty());
        assert!(outcome.metadata.degraded);
    }

    #[tokio::test]
    async fn store_failure_flags_degraded_but_delivers_reply() {
        let backend = FakeBackend {
            particle: Script::Reply("Hello there.".to_string()),
            wave: Script::Reply("plain".to_string()),
            embed_vector: Ok(vec![0.3, 0.4]),
        };
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(EmbeddingIndex::open(dir.path(), 0.7).await.unwrap());
        // A store rooted under a file cannot create user directories.
        let store = Arc::new(ProfileStore::new("/dev/null/store"));
        let dispatcher = Dispatcher::new(
            Arc::new(backend),
            store,
            index,
            DispatchSettings::from_config(&AppConfig::default()),
        );

        let request = request("u7", "hi");
        let cancel = CancellationToken::new();
        let outcome = dispatcher.dispatch(&request, &cancel).await.unwrap();

        assert!(outcome.reply.contains("Hello there."));
        assert!(outcome.metadata.store_failed);
        assert!(outcome.metadata.degraded);
    }

    #[tokio::test]
    async fn metrics_track_collapses() {
        let backend = FakeBackend {
            particle: Script::Reply("Reply.".to_string()),
            wave: Script::Reply("plain".to_string()),
            embed_vector: Ok(vec![0.1, 0.9]),
        };
        let (_dir, dispatcher) = harness(backend).await;

        let cancel = CancellationToken::new();
        dispatcher.dispatch(&request("u8", "one"), &cancel).await.unwrap();
        dispatcher.dispatch(&request("u8", "two"), &cancel).await.unwrap();

        let metrics = dispatcher.metrics().await;
        assert_eq!(metrics.total_collapses, 2);
        assert_eq!(metrics.successful_collapses, 2);
        assert!(metrics.average_collapse_secs >= 0.0);
    }
}
