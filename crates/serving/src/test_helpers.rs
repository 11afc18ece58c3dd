//! Scripted collaborators for pipeline and session tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ragchat_core::error::{ProviderError, RetrievalError};
use ragchat_core::provider::{CompletionRequest, FragmentStream, InferenceEngine};
use ragchat_core::retriever::{RetrievedPassage, Retriever};

/// Engine that replays queued outcomes, then a fixed fallback answer.
pub(crate) struct ScriptedEngine {
    outcomes: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: String,
    fragments: Option<Vec<String>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn answering(answer: &str) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: answer.to_string(),
            fragments: None,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue an outcome consumed before the fallback.
    pub fn then(self, outcome: Result<String, ProviderError>) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    /// Stream these fragments instead of a single one.
    pub fn streaming(mut self, fragments: &[&str]) -> Self {
        self.fragments = Some(fragments.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    async fn next(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.outcomes.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        self.next(&request).await
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        let text = self.next(&request).await?;
        let fragments = self.fragments.clone().unwrap_or_else(|| vec![text]);
        let (tx, rx) = tokio::sync::mpsc::channel(fragments.len().max(1));
        for fragment in fragments {
            let _ = tx.try_send(Ok(fragment));
        }
        Ok(rx)
    }
}

/// Retriever returning fixed passages, after any queued failures.
pub(crate) struct CountingRetriever {
    passages: Vec<RetrievedPassage>,
    failures: Mutex<VecDeque<RetrievalError>>,
    calls: AtomicUsize,
}

impl CountingRetriever {
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self {
            passages,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_policy_passage() -> Self {
        Self::new(vec![
            RetrievedPassage::new("Full-time employees receive 15 days of paid vacation per year.", 0)
                .with_source("handbook.md#0"),
        ])
    }

    pub fn failing(self, error: RetrievalError) -> Self {
        self.failures.lock().unwrap().push_back(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for CountingRetriever {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.passages.iter().take(k).cloned().collect())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.passages.len())
    }
}
