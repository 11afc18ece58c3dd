//! The serving pipeline: one conversational turn from sanitized query to
//! answer.
//!
//! Retry, caching, and metrics are composed explicitly around the
//! retrieval and inference calls in [`ServingPipeline::answer_turn`].

use std::sync::Arc;
use std::time::Duration;

use ragchat_config::{AppConfig, PromptProfile};
use ragchat_core::error::{Classify, ErrorKind, ProviderError, RetrievalError, ValidationError};
use ragchat_core::message::ConversationHistory;
use ragchat_core::provider::{CompletionRequest, InferenceEngine};
use ragchat_core::retriever::Retriever;
use ragchat_telemetry::MetricsCollector;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionController, AdmissionError};
use crate::cache::{CacheKey, ConversationCache};
use crate::classifier::{QueryTraits, classify};
use crate::context::{ContextBudget, optimize};
use crate::prompt::build_prompt;
use crate::retry::{self, RetryError, RetryPolicy};
use crate::validation::InputValidator;

const SLOW_TURN: Duration = Duration::from_secs(10);
const FAST_TURN: Duration = Duration::from_secs(2);

/// Why a turn produced no answer.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("Retrieval failed: {0}")]
    Retrieval(RetryError<RetrievalError>),

    #[error("Inference failed: {0}")]
    Inference(RetryError<ProviderError>),

    #[error("Answer stream interrupted: {0}")]
    Stream(ProviderError),
}

impl Classify for ServeError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(e) => e.kind(),
            Self::Admission(e) => e.kind(),
            Self::Retrieval(e) => e.kind(),
            Self::Inference(e) => e.kind(),
            Self::Stream(e) => e.kind(),
        }
    }
}

impl ServeError {
    /// What the end user is told. Internal causes stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Admission(AdmissionError::Timeout(_)) => {
                "The assistant is busy right now. Please try again in a moment.".to_string()
            }
            _ => "Sorry, something went wrong while answering. Please try again.".to_string(),
        }
    }
}

/// The outcome of one successful turn.
#[derive(Debug, Clone)]
pub struct TurnAnswer {
    /// The sanitized query that was answered.
    pub query: String,
    pub answer: String,
    pub cached: bool,
    /// Distinct passage sources in relevance order. Empty on a cache hit.
    pub sources: Vec<String>,
    pub response_time: Duration,
    pub traits: QueryTraits,
}

/// Result of [`ServingPipeline::warm_up`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmUpReport {
    pub retriever_ok: bool,
    pub engine_ok: bool,
}

impl WarmUpReport {
    pub fn all_ok(&self) -> bool {
        self.retriever_ok && self.engine_ok
    }
}

/// Process-wide serving state shared by every session.
///
/// Holds the cache and metrics aggregate; create one at startup and share it
/// behind an `Arc`.
pub struct ServingPipeline {
    retriever: Arc<dyn Retriever>,
    engine: Arc<dyn InferenceEngine>,
    cache: Arc<ConversationCache>,
    metrics: Arc<MetricsCollector>,
    admission: AdmissionController,
    validator: InputValidator,
    inference_policy: RetryPolicy,
    storage_policy: RetryPolicy,
    profile: PromptProfile,
    search_k: usize,
    caching: bool,
    streaming: bool,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ServingPipeline {
    pub fn new(retriever: Arc<dyn Retriever>, engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            retriever,
            engine,
            cache: Arc::new(ConversationCache::default()),
            metrics: Arc::new(MetricsCollector::new()),
            admission: AdmissionController::new(4, Some(Duration::from_secs(30))),
            validator: InputValidator::default(),
            inference_policy: RetryPolicy::inference(),
            storage_policy: RetryPolicy::storage(),
            profile: PromptProfile::default(),
            search_k: 3,
            caching: true,
            streaming: true,
            temperature: 0.2,
            max_tokens: None,
        }
    }

    /// Build a pipeline with every knob taken from `config`.
    pub fn from_config(
        config: &AppConfig,
        retriever: Arc<dyn Retriever>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        let perf = &config.performance;
        let admission_timeout = (perf.admission_timeout_secs > 0)
            .then(|| Duration::from_secs(perf.admission_timeout_secs));

        Self::new(retriever, engine)
            .with_cache(Arc::new(ConversationCache::new(Duration::from_secs(
                perf.cache_ttl_secs,
            ))))
            .with_metrics(Arc::new(MetricsCollector::with_window(
                config.monitoring.response_window,
            )))
            .with_admission(AdmissionController::new(
                perf.max_concurrent_requests,
                admission_timeout,
            ))
            .with_validator(InputValidator::from_config(&config.security))
            .with_inference_policy(
                RetryPolicy::inference().with_max_attempts(config.inference.max_retries),
            )
            .with_profile(perf.prompt_profile)
            .with_search_k(config.knowledge.search_k)
            .with_caching(perf.enable_caching)
            .with_streaming(config.inference.streaming)
            .with_generation(config.inference.temperature, Some(config.inference.max_tokens))
    }

    // ── Builders ──────────────────────────────────────────────────────

    pub fn with_cache(mut self, cache: Arc<ConversationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_admission(mut self, admission: AdmissionController) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_validator(mut self, validator: InputValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_inference_policy(mut self, policy: RetryPolicy) -> Self {
        self.inference_policy = policy;
        self
    }

    pub fn with_storage_policy(mut self, policy: RetryPolicy) -> Self {
        self.storage_policy = policy;
        self
    }

    pub fn with_profile(mut self, profile: PromptProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_search_k(mut self, k: usize) -> Self {
        self.search_k = k;
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching = enabled;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn cache(&self) -> &Arc<ConversationCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    pub fn profile(&self) -> PromptProfile {
        self.profile
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    // ── Serving ───────────────────────────────────────────────────────

    pub fn validate(&self, raw: &str) -> Result<String, ValidationError> {
        self.validator.validate(raw)
    }

    /// Whether `query` asked after `history` would be answered from cache.
    /// Records no metrics.
    pub fn is_cached(&self, history: &ConversationHistory, query: &str) -> bool {
        self.caching && self.cache.get(&CacheKey::derive(history, query)).is_some()
    }

    /// Validate `raw`, then answer it. Rejected queries are not counted as
    /// requests.
    pub async fn ask(
        &self,
        history: &ConversationHistory,
        raw: &str,
        fragments: Option<mpsc::Sender<String>>,
    ) -> Result<TurnAnswer, ServeError> {
        let query = self.validate(raw)?;
        self.answer_turn(history, &query, fragments).await
    }

    /// Answer an already-sanitized `query` asked after `history`.
    ///
    /// When `fragments` is given and streaming is enabled, each answer
    /// fragment is forwarded as it arrives. Cache hits are never streamed.
    pub async fn answer_turn(
        &self,
        history: &ConversationHistory,
        query: &str,
        fragments: Option<mpsc::Sender<String>>,
    ) -> Result<TurnAnswer, ServeError> {
        let started = Instant::now();
        let traits = classify(query);
        let key = CacheKey::derive(history, query);

        if self.caching {
            if let Some(answer) = self.cache.get(&key) {
                let response_time = started.elapsed();
                self.metrics.record_cache_event(true);
                self.metrics.record_request(true, response_time.as_secs_f64(), None);
                info!(turns = history.len(), "Answered from cache");
                return Ok(TurnAnswer {
                    query: query.to_string(),
                    answer,
                    cached: true,
                    sources: Vec::new(),
                    response_time,
                    traits,
                });
            }
            self.metrics.record_cache_event(false);
        }

        let result = self.generate(history, query, traits, fragments).await;
        let response_time = started.elapsed();

        match result {
            Ok((answer, sources)) => {
                if self.caching && !answer.trim().is_empty() {
                    self.cache.set(key, answer.clone(), None);
                }
                self.metrics.record_request(true, response_time.as_secs_f64(), None);
                log_latency(response_time);
                Ok(TurnAnswer {
                    query: query.to_string(),
                    answer,
                    cached: false,
                    sources,
                    response_time,
                    traits,
                })
            }
            Err(e) => {
                let kind = e.kind();
                self.metrics
                    .record_request(false, response_time.as_secs_f64(), Some(kind.as_str()));
                error!(
                    kind = %kind,
                    elapsed_ms = response_time.as_millis() as u64,
                    "Turn failed: {e}"
                );
                Err(e)
            }
        }
    }

    /// Cache-miss path. The admission permit is held until this returns or
    /// is dropped.
    async fn generate(
        &self,
        history: &ConversationHistory,
        query: &str,
        traits: QueryTraits,
        fragments: Option<mpsc::Sender<String>>,
    ) -> Result<(String, Vec<String>), ServeError> {
        let _permit = self.admission.acquire().await?;

        let passages = retry::execute(&self.storage_policy, || {
            self.retriever.search(query, self.search_k)
        })
        .await
        .map_err(ServeError::Retrieval)?;
        debug!(count = passages.len(), "Retrieved passages");

        let mut sources: Vec<String> = Vec::new();
        for source in passages.iter().filter_map(|p| p.source.as_ref()) {
            if !sources.contains(source) {
                sources.push(source.clone());
            }
        }

        let context = optimize(&passages, &ContextBudget::for_profile(self.profile));
        let prompt = build_prompt(self.profile, history, &context, query, traits);
        let request = self.request(prompt);

        let answer = match fragments {
            Some(tx) if self.streaming => self.stream_answer(&request, tx).await?,
            _ => retry::execute(&self.inference_policy, || {
                self.engine.complete(request.clone())
            })
            .await
            .map_err(ServeError::Inference)?,
        };

        Ok((answer, sources))
    }

    /// Open a stream under the inference retry policy and forward each
    /// fragment. A failure after the stream opened is not retried: fragments
    /// may already have reached the caller.
    async fn stream_answer(
        &self,
        request: &CompletionRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, ServeError> {
        let mut stream = retry::execute(&self.inference_policy, || {
            self.engine.stream(request.clone())
        })
        .await
        .map_err(ServeError::Inference)?;

        let mut answer = String::new();
        while let Some(item) = stream.recv().await {
            let fragment = item.map_err(ServeError::Stream)?;
            if fragment.is_empty() {
                continue;
            }
            answer.push_str(&fragment);
            // A departed listener does not stop accumulation.
            let _ = tx.send(fragment).await;
        }
        Ok(answer)
    }

    fn request(&self, prompt: String) -> CompletionRequest {
        let request = CompletionRequest::new(prompt).with_temperature(self.temperature);
        match self.max_tokens {
            Some(max) => request.with_max_tokens(max),
            None => request,
        }
    }

    /// Exercise the retriever and the engine once before serving.
    ///
    /// Failures are logged and reported, never raised.
    pub async fn warm_up(&self) -> WarmUpReport {
        info!("Starting warm-up");

        let retriever_ok = match self.retriever.search("warm up", 1).await {
            Ok(_) => {
                info!("Retriever warmed up");
                true
            }
            Err(e) => {
                warn!("Retriever warm-up failed: {e}");
                false
            }
        };

        let engine_ok = match self.engine.health_check().await {
            Ok(true) => {
                info!(engine = self.engine.name(), "Inference engine reachable");
                true
            }
            Ok(false) => {
                warn!(engine = self.engine.name(), "Inference engine reported unhealthy");
                false
            }
            Err(e) => {
                warn!(engine = self.engine.name(), "Inference engine warm-up failed: {e}");
                false
            }
        };

        let report = WarmUpReport {
            retriever_ok,
            engine_ok,
        };
        if report.all_ok() {
            info!("Warm-up completed");
        } else {
            warn!("Warm-up completed with failures");
        }
        report
    }
}

fn log_latency(elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    if elapsed > SLOW_TURN {
        warn!(elapsed_ms, "Slow turn");
    } else if elapsed < FAST_TURN {
        debug!(elapsed_ms, "Fast turn");
    } else {
        info!(elapsed_ms, "Turn answered");
    }
}
