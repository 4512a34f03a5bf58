//! Generation invoker
//!
//! Wraps one model generation with cancellation plumbing, retry, and the
//! streaming-with-fallback policy. The loop controller calls this once per
//! step and never touches tokens or sockets directly.
//!
//! Cancellation runs as a race: the generation future and a listener task
//! share a `CancellationToken`. The listener acknowledges readiness over a
//! oneshot before generation starts, so a cancel press cannot slip between
//! spawn and listen; if the ack takes longer than a beat we proceed anyway
//! rather than stall the call. The listener itself is hard-bounded so an
//! abandoned one cannot outlive the turn by more than its bound.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{
    assistant_message, GenerateError, GenerateResponse, ModelClient, ModelMessage, ToolDef,
};

use super::loop_events::LoopEvent;
use super::retry::{with_backoff, RetryPolicy};
use super::stream::{consume, DetectionStrategy};

/// How long to wait for the cancel listener to confirm it is watching.
const LISTENER_READY_TIMEOUT: Duration = Duration::from_millis(100);
/// Upper bound on a listener task's lifetime.
const LISTENER_MAX_LIFETIME: Duration = Duration::from_secs(30);

/// Source of user cancellation requests (Esc in the interactive CLI).
#[async_trait]
pub trait CancelListener: Send + Sync {
    /// Resolves when the user requests cancellation. Dropped without
    /// resolving when generation finishes first.
    async fn wait_for_cancel(&self);
}

/// Outcome of one invocation.
#[derive(Debug)]
pub enum InvokeResult {
    Response(GenerateResponse),
    /// The user cancelled; the caller must leave the transcript untouched.
    Cancelled,
}

/// Runs model generations for the agent loop.
pub struct Invoker {
    client: Arc<dyn ModelClient>,
    listener: Option<Arc<dyn CancelListener>>,
    retry: RetryPolicy,
    streaming: bool,
    strategy: DetectionStrategy,
}

impl Invoker {
    pub fn new(client: Arc<dyn ModelClient>, streaming: bool) -> Self {
        let strategy = DetectionStrategy::for_provider(client.provider_id());
        Self {
            client,
            listener: None,
            retry: RetryPolicy::default(),
            streaming,
            strategy,
        }
    }

    pub fn with_cancel_listener(mut self, listener: Arc<dyn CancelListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one generation step. Streaming deltas go out over `event_tx`;
    /// only fatal errors surface as `Err`.
    pub async fn invoke(
        &self,
        messages: &[ModelMessage],
        system_prompt: &str,
        tools: &[ToolDef],
        event_tx: &mpsc::UnboundedSender<LoopEvent>,
    ) -> Result<InvokeResult, GenerateError> {
        let cancel = CancellationToken::new();
        self.arm_listener(&cancel).await;

        let result = if self.streaming {
            self.invoke_streaming(messages, system_prompt, tools, event_tx, &cancel)
                .await
        } else {
            self.invoke_once(messages, system_prompt, tools, &cancel)
                .await
        };

        // Release the listener task whether or not it ever fired.
        cancel.cancel();
        result
    }

    /// Spawn the cancel listener race and wait for its ready ack.
    async fn arm_listener(&self, cancel: &CancellationToken) {
        let Some(listener) = self.listener.clone() else {
            return;
        };

        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let token = cancel.clone();
        tokio::spawn(async move {
            let _ = ready_tx.send(());
            tokio::select! {
                _ = listener.wait_for_cancel() => {
                    debug!("Cancellation requested");
                    token.cancel();
                }
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(LISTENER_MAX_LIFETIME) => {
                    warn!("Cancel listener hit lifetime bound, detaching");
                }
            }
        });

        if tokio::time::timeout(LISTENER_READY_TIMEOUT, ready_rx)
            .await
            .is_err()
        {
            warn!("Cancel listener slow to arm, proceeding without ack");
        }
    }

    async fn invoke_once(
        &self,
        messages: &[ModelMessage],
        system_prompt: &str,
        tools: &[ToolDef],
        cancel: &CancellationToken,
    ) -> Result<InvokeResult, GenerateError> {
        let result = with_backoff(self.retry, || {
            self.client
                .generate(messages, system_prompt, tools, cancel.clone())
        })
        .await;

        match result {
            Ok(response) => Ok(InvokeResult::Response(response)),
            Err(GenerateError::Cancelled) => Ok(InvokeResult::Cancelled),
            Err(e) => Err(e),
        }
    }

    async fn invoke_streaming(
        &self,
        messages: &[ModelMessage],
        system_prompt: &str,
        tools: &[ToolDef],
        event_tx: &mpsc::UnboundedSender<LoopEvent>,
        cancel: &CancellationToken,
    ) -> Result<InvokeResult, GenerateError> {
        let rx = match self.client.stream(messages, system_prompt, tools).await {
            Ok(rx) => rx,
            Err(GenerateError::Cancelled) => return Ok(InvokeResult::Cancelled),
            Err(e) => {
                // Stream setup failed; the non-streaming path still works.
                warn!("Stream setup failed, falling back to non-streaming: {e}");
                return self.invoke_once(messages, system_prompt, tools, cancel).await;
            }
        };

        let outcome = consume(rx, self.strategy, event_tx, cancel).await;

        if outcome.cancelled {
            return Ok(InvokeResult::Cancelled);
        }

        if let Some(error) = &outcome.error {
            warn!("Stream failed mid-flight, falling back to non-streaming: {error}");
            if outcome.forwarded {
                let _ = event_tx.send(LoopEvent::StreamReset);
            }
            return self.invoke_once(messages, system_prompt, tools, cancel).await;
        }

        // The strategy saw tool-call intent but the stream never produced a
        // structured call. Re-generate without streaming to get one.
        if outcome.detected_tool_intent && outcome.tool_calls.is_empty() {
            debug!("Tool-call intent without structured call, re-generating non-streaming");
            if outcome.forwarded {
                let _ = event_tx.send(LoopEvent::StreamReset);
            }
            return self.invoke_once(messages, system_prompt, tools, cancel).await;
        }

        Ok(InvokeResult::Response(GenerateResponse {
            message: assistant_message(&outcome.text, &outcome.tool_calls),
            usage: outcome.usage.unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StreamPart, ToolCall, Usage};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockClient {
        provider: &'static str,
        stream_result: Mutex<Option<Result<Vec<StreamPart>, GenerateError>>>,
        generate_result: Mutex<Option<Result<GenerateResponse, GenerateError>>>,
        generate_calls: AtomicU32,
    }

    impl MockClient {
        fn new(provider: &'static str) -> Self {
            Self {
                provider,
                stream_result: Mutex::new(None),
                generate_result: Mutex::new(None),
                generate_calls: AtomicU32::new(0),
            }
        }

        fn with_stream(self, parts: Vec<StreamPart>) -> Self {
            *self.stream_result.lock().unwrap() = Some(Ok(parts));
            self
        }

        fn with_stream_error(self, error: GenerateError) -> Self {
            *self.stream_result.lock().unwrap() = Some(Err(error));
            self
        }

        fn with_response(self, text: &str) -> Self {
            *self.generate_result.lock().unwrap() = Some(Ok(GenerateResponse {
                message: ModelMessage::assistant(text),
                usage: Usage::default(),
            }));
            self
        }
    }

    #[async_trait]
    impl ModelClient for MockClient {
        fn provider_id(&self) -> &str {
            self.provider
        }

        async fn generate(
            &self,
            _messages: &[ModelMessage],
            _system_prompt: &str,
            _tools: &[ToolDef],
            cancel: CancellationToken,
        ) -> Result<GenerateResponse, GenerateError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            // The guard must not live across the await below.
            let next = self.generate_result.lock().unwrap().take();
            match next {
                Some(result) => result,
                // No canned response: block until cancelled.
                None => {
                    cancel.cancelled().await;
                    Err(GenerateError::Cancelled)
                }
            }
        }

        async fn stream(
            &self,
            _messages: &[ModelMessage],
            _system_prompt: &str,
            _tools: &[ToolDef],
        ) -> Result<mpsc::UnboundedReceiver<StreamPart>, GenerateError> {
            match self.stream_result.lock().unwrap().take() {
                Some(Ok(parts)) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    for part in parts {
                        let _ = tx.send(part);
                    }
                    Ok(rx)
                }
                Some(Err(e)) => Err(e),
                None => Err(GenerateError::Fatal("no stream configured".into())),
            }
        }
    }

    struct ImmediateCancel;

    #[async_trait]
    impl CancelListener for ImmediateCancel {
        async fn wait_for_cancel(&self) {}
    }

    struct NeverCancel;

    #[async_trait]
    impl CancelListener for NeverCancel {
        async fn wait_for_cancel(&self) {
            std::future::pending::<()>().await;
        }
    }

    fn events() -> (
        mpsc::UnboundedSender<LoopEvent>,
        mpsc::UnboundedReceiver<LoopEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn non_streaming_returns_response() {
        let client = Arc::new(MockClient::new("anthropic").with_response("hello"));
        let invoker = Invoker::new(client, false);
        let (tx, _rx) = events();

        let result = invoker.invoke(&[], "", &[], &tx).await.unwrap();
        match result {
            InvokeResult::Response(response) => assert_eq!(response.message.text(), "hello"),
            InvokeResult::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[tokio::test]
    async fn immediate_cancel_wins_the_race() {
        let client = Arc::new(MockClient::new("anthropic"));
        let invoker =
            Invoker::new(client, false).with_cancel_listener(Arc::new(ImmediateCancel));
        let (tx, _rx) = events();

        let result = invoker.invoke(&[], "", &[], &tx).await.unwrap();
        assert!(matches!(result, InvokeResult::Cancelled));
    }

    #[tokio::test]
    async fn idle_listener_does_not_block_generation() {
        let client = Arc::new(MockClient::new("anthropic").with_response("done"));
        let invoker = Invoker::new(client, false).with_cancel_listener(Arc::new(NeverCancel));
        let (tx, _rx) = events();

        let result = invoker.invoke(&[], "", &[], &tx).await.unwrap();
        assert!(matches!(result, InvokeResult::Response(_)));
    }

    #[tokio::test]
    async fn streaming_collects_structured_tool_calls() {
        let call = ToolCall {
            id: "c1".into(),
            name: "bash".into(),
            arguments: serde_json::json!({"command": "ls"}),
        };
        let client = Arc::new(MockClient::new("openai").with_stream(vec![
            StreamPart::ToolCallComplete {
                tool_call: call.clone(),
            },
            StreamPart::Done,
        ]));
        let invoker = Invoker::new(client, true);
        let (tx, _rx) = events();

        let result = invoker.invoke(&[], "", &[], &tx).await.unwrap();
        match result {
            InvokeResult::Response(response) => {
                assert_eq!(response.message.tool_calls(), vec![call]);
            }
            InvokeResult::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[tokio::test]
    async fn stream_setup_failure_falls_back() {
        let client = Arc::new(
            MockClient::new("anthropic")
                .with_stream_error(GenerateError::Fatal("no stream".into()))
                .with_response("fallback answer"),
        );
        let calls = Arc::clone(&client);
        let invoker = Invoker::new(client, true);
        let (tx, _rx) = events();

        let result = invoker.invoke(&[], "", &[], &tx).await.unwrap();
        match result {
            InvokeResult::Response(response) => {
                assert_eq!(response.message.text(), "fallback answer");
            }
            InvokeResult::Cancelled => panic!("unexpected cancellation"),
        }
        assert_eq!(calls.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn narrative_intent_without_structured_call_falls_back() {
        let client = Arc::new(
            MockClient::new("anthropic")
                .with_stream(vec![
                    StreamPart::TextDelta {
                        delta: "I'll use the bash tool.".into(),
                    },
                    StreamPart::Done,
                ])
                .with_response("structured follow-up"),
        );
        let calls = Arc::clone(&client);
        let invoker = Invoker::new(client, true);
        let (tx, _rx) = events();

        let result = invoker.invoke(&[], "", &[], &tx).await.unwrap();
        match result {
            InvokeResult::Response(response) => {
                assert_eq!(response.message.text(), "structured follow-up");
            }
            InvokeResult::Cancelled => panic!("unexpected cancellation"),
        }
        assert_eq!(calls.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_generate_error_surfaces() {
        let client = Arc::new(MockClient::new("anthropic"));
        *client.generate_result.lock().unwrap() =
            Some(Err(GenerateError::Fatal("bad request".into())));
        let invoker = Invoker::new(client, false);
        let (tx, _rx) = events();

        let err = invoker.invoke(&[], "", &[], &tx).await.unwrap_err();
        assert!(matches!(err, GenerateError::Fatal(_)));
    }
}
