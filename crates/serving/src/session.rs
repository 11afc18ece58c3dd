//! Per-connection chat session.
//!
//! A session owns one conversation history and answers its messages
//! strictly in arrival order. Transports feed it an inbound channel of raw
//! utterances and drain an outbound channel of [`SessionEvent`]s; dropping
//! the outbound receiver is how a transport signals disconnect.

use std::sync::Arc;

use ragchat_core::message::ConversationHistory;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tracing::{debug, info, trace};

use crate::pipeline::{ServingPipeline, TurnAnswer};
use crate::stream_event::SessionEvent;

/// Buffered fragments between the pipeline and the outbound forwarder.
const FRAGMENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingInput,
    Processing,
    Delivering,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingInput => "awaiting_input",
            Self::Processing => "processing",
            Self::Delivering => "delivering",
            Self::Closed => "closed",
        }
    }
}

pub struct ChatSession {
    pipeline: Arc<ServingPipeline>,
    history: ConversationHistory,
    state: SessionState,
    #[cfg(test)]
    visited: Vec<SessionState>,
}

impl ChatSession {
    pub fn new(pipeline: Arc<ServingPipeline>) -> Self {
        Self {
            pipeline,
            history: ConversationHistory::new(),
            state: SessionState::Idle,
            #[cfg(test)]
            visited: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Drive the session until the inbound channel ends or the outbound
    /// receiver is dropped.
    ///
    /// A disconnect during a turn cancels that turn: in-flight retrieval and
    /// inference are dropped and the admission permit is released.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<String>,
        outbound: mpsc::Sender<SessionEvent>,
    ) {
        info!("Session opened");
        if outbound.send(SessionEvent::ready()).await.is_err() {
            self.close();
            return;
        }
        self.enter(SessionState::AwaitingInput);

        loop {
            let message = tokio::select! {
                message = inbound.recv() => message,
                _ = outbound.closed() => None,
            };
            let Some(message) = message else { break };

            let delivered = tokio::select! {
                result = self.handle_message(&message, &outbound) => result.is_ok(),
                _ = outbound.closed() => false,
            };
            if !delivered {
                debug!("Transport closed during turn");
                break;
            }
        }

        self.close();
    }

    /// Process one raw utterance and emit its events.
    ///
    /// Fails only when the outbound channel is gone; rejected or failed
    /// turns are reported to the caller and leave the session usable.
    pub async fn handle_message(
        &mut self,
        raw: &str,
        outbound: &mpsc::Sender<SessionEvent>,
    ) -> Result<(), SendError<SessionEvent>> {
        let query = match self.pipeline.validate(raw) {
            Ok(query) => query,
            Err(reason) => {
                debug!(%reason, "Query rejected");
                self.enter(SessionState::AwaitingInput);
                return outbound
                    .send(SessionEvent::Rejected {
                        reason: reason.to_string(),
                    })
                    .await;
            }
        };

        if self.pipeline.is_cached(&self.history, &query) {
            self.enter(SessionState::Delivering);
        } else {
            self.enter(SessionState::Processing);
        }

        let (tx, mut rx) = mpsc::channel::<String>(FRAGMENT_BUFFER);
        let turn = self.pipeline.answer_turn(&self.history, &query, Some(tx));
        let forward = async {
            let mut streamed = false;
            while let Some(content) = rx.recv().await {
                streamed = true;
                if outbound.send(SessionEvent::Chunk { content }).await.is_err() {
                    break;
                }
            }
            streamed
        };
        let (result, streamed) = tokio::join!(turn, forward);

        let delivered = match result {
            Ok(turn) => {
                self.enter(SessionState::Delivering);
                self.deliver(turn, streamed, outbound).await
            }
            Err(e) => {
                outbound
                    .send(SessionEvent::Error {
                        message: e.user_message(),
                    })
                    .await
            }
        };

        self.enter(SessionState::AwaitingInput);
        delivered
    }

    /// Emit a finished answer and record the exchange.
    async fn deliver(
        &mut self,
        turn: TurnAnswer,
        streamed: bool,
        outbound: &mpsc::Sender<SessionEvent>,
    ) -> Result<(), SendError<SessionEvent>> {
        if !streamed {
            outbound
                .send(SessionEvent::Answer {
                    content: turn.answer.clone(),
                    cached: turn.cached,
                })
                .await?;
        }
        outbound
            .send(SessionEvent::Done {
                cached: turn.cached,
                response_time_ms: turn.response_time.as_millis() as u64,
                sources: turn.sources,
            })
            .await?;
        self.history.push_exchange(turn.query, turn.answer);
        Ok(())
    }

    fn enter(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        trace!(from = self.state.as_str(), to = next.as_str(), "Session state");
        self.state = next;
        #[cfg(test)]
        self.visited.push(next);
    }

    fn close(&mut self) {
        info!(turns = self.history.len() / 2, "Session closed");
        self.history = ConversationHistory::new();
        self.enter(SessionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::test_helpers::{CountingRetriever, ScriptedEngine};
    use ragchat_core::error::ProviderError;
    use std::time::Duration;

    fn pipeline(engine: ScriptedEngine) -> (Arc<ServingPipeline>, Arc<ScriptedEngine>) {
        let engine = Arc::new(engine);
        let pipeline = ServingPipeline::new(
            Arc::new(CountingRetriever::with_policy_passage()),
            engine.clone(),
        )
        .with_inference_policy(RetryPolicy::inference().with_max_attempts(1));
        (Arc::new(pipeline), engine)
    }

    async fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn answer_is_sent_whole_when_not_streamed() {
        let (pipeline, _) = pipeline(ScriptedEngine::answering("15 days."));
        let mut session = ChatSession::new(pipeline);
        let (tx, mut rx) = mpsc::channel(16);

        session.handle_message("What is the vacation policy?", &tx).await.unwrap();
        drop(tx);
        let events = drain(&mut rx).await;

        // The default stream yields the whole completion as one fragment.
        assert_eq!(
            events[0],
            SessionEvent::Chunk {
                content: "15 days.".into()
            }
        );
        assert!(matches!(events[1], SessionEvent::Done { cached: false, .. }));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.state(), SessionState::AwaitingInput);
    }

    #[tokio::test]
    async fn cache_hit_is_delivered_as_single_answer() {
        let (pipeline, engine) = pipeline(ScriptedEngine::answering("15 days.").streaming(&["15 ", "days."]));
        let (tx, mut rx) = mpsc::channel(16);

        let mut first = ChatSession::new(pipeline.clone());
        first.handle_message("What is the vacation policy?", &tx).await.unwrap();
        let mut second = ChatSession::new(pipeline);
        second.handle_message("What is the vacation policy?", &tx).await.unwrap();
        drop(tx);

        let events = drain(&mut rx).await;
        let kinds: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["chunk", "chunk", "done", "answer", "done"]);
        assert_eq!(
            events[3],
            SessionEvent::Answer {
                content: "15 days.".into(),
                cached: true
            }
        );
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn rejected_query_keeps_session_open() {
        let (pipeline, engine) = pipeline(ScriptedEngine::answering("ok"));
        let mut session = ChatSession::new(pipeline);
        let (tx, mut rx) = mpsc::channel(16);

        session.handle_message("   ", &tx).await.unwrap();
        drop(tx);

        assert_eq!(
            drain(&mut rx).await,
            vec![SessionEvent::Rejected {
                reason: "Query cannot be empty".into()
            }]
        );
        assert!(session.history().is_empty());
        assert_eq!(session.state(), SessionState::AwaitingInput);
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn run_survives_a_failed_turn() {
        let engine = ScriptedEngine::answering("Second try works.")
            .then(Err(ProviderError::ApiError {
                status_code: 400,
                message: "bad request".into(),
            }));
        let (pipeline, _) = pipeline(engine);

        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let handle = tokio::spawn(ChatSession::new(pipeline.clone()).run(in_rx, out_tx));

        in_tx.send("What is the policy?".to_string()).await.unwrap();
        in_tx.send("What is the policy?".to_string()).await.unwrap();
        drop(in_tx);
        handle.await.unwrap();

        let kinds: Vec<_> = drain(&mut out_rx).await.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["ready", "error", "chunk", "done"]);

        let m = pipeline.metrics().snapshot();
        assert_eq!(m.failed_requests, 1);
        assert_eq!(m.error_counts["ApiError"], 1);
        assert_eq!(m.successful_requests, 1);
    }

    #[tokio::test]
    async fn ready_is_sent_first() {
        let (pipeline, _) = pipeline(ScriptedEngine::answering("ok"));
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        drop(in_tx);

        ChatSession::new(pipeline).run(in_rx, out_tx).await;
        assert_eq!(out_rx.recv().await, Some(SessionEvent::ready()));
        assert_eq!(out_rx.recv().await, None);
    }

    #[tokio::test]
    async fn disconnect_cancels_in_flight_turn() {
        let (pipeline, engine) =
            pipeline(ScriptedEngine::answering("late").with_delay(Duration::from_secs(3600)));
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let handle = tokio::spawn(ChatSession::new(pipeline.clone()).run(in_rx, out_tx));

        assert_eq!(out_rx.recv().await, Some(SessionEvent::ready()));
        in_tx.send("What is the policy?".to_string()).await.unwrap();
        while engine.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pipeline.admission().in_flight(), 1);

        drop(out_rx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("session ends after disconnect")
            .unwrap();

        assert_eq!(pipeline.admission().in_flight(), 0);
        assert_eq!(pipeline.cache().size(), 0);
    }

    #[tokio::test]
    async fn state_follows_turn_outcome() {
        use SessionState::*;

        let (pipeline, _) = pipeline(ScriptedEngine::answering("15 days."));
        let (tx, _rx) = mpsc::channel(16);

        let mut session = ChatSession::new(pipeline.clone());
        session.enter(AwaitingInput);
        session.handle_message("<script>x</script>", &tx).await.unwrap();
        assert_eq!(session.visited, vec![AwaitingInput]);

        session.handle_message("What is the vacation policy?", &tx).await.unwrap();
        assert_eq!(
            session.visited,
            vec![AwaitingInput, Processing, Delivering, AwaitingInput]
        );

        // Fresh history, same question: answered straight from cache.
        let mut repeat = ChatSession::new(pipeline);
        repeat.handle_message("What is the vacation policy?", &tx).await.unwrap();
        assert_eq!(repeat.visited, vec![Delivering, AwaitingInput]);
    }

    #[tokio::test]
    async fn failed_turn_never_reaches_delivering() {
        let engine = ScriptedEngine::answering("unused").then(Err(ProviderError::ApiError {
            status_code: 400,
            message: "bad request".into(),
        }));
        let (pipeline, _) = pipeline(engine);
        let (tx, _rx) = mpsc::channel(16);

        let mut session = ChatSession::new(pipeline);
        session.handle_message("What is the policy?", &tx).await.unwrap();
        assert_eq!(session.visited, vec![SessionState::Processing, SessionState::AwaitingInput]);
    }

    #[test]
    fn state_names() {
        assert_eq!(SessionState::AwaitingInput.as_str(), "awaiting_input");
        assert_eq!(SessionState::Closed.as_str(), "closed");
    }
}
