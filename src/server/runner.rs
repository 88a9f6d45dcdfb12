//! Per-generation agent loop.
//!
//! Each accepted start spawns one task that alternates engine steps and tool
//! batches, emitting events as it goes, and ends with exactly one terminal
//! event followed by a [`FinalizedGeneration`] for the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::writer::EventWriter;
use super::ServerShared;
use crate::engine::{
    EngineChunk, EngineMessage, EngineRequest, EngineToolCall, Segment, ThinkTagSplitter,
};
use crate::error::MuxError;
use crate::generation::{GenerationState, GenerationTrigger};
use crate::protocol::{
    ContextInfo, EventKind, StreamEvent, THINKING_DONE_TITLE, THINKING_START_TITLE,
};
use crate::store::{FinalizedGeneration, GenerationStore};
use crate::timeline::GenerationTimeline;
use crate::tools::{ToolCallRequest, ToolExecutionContext};
use crate::types::{new_block_id, GenerationId, SessionId, Usage};
use crate::util::with_step_timeout;

/// What a client asked for.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub session_id: SessionId,
    pub content: String,
    pub model_id: Option<String>,
}

/// Control handle for a running generation.
#[derive(Debug)]
pub struct GenerationHandle {
    pub generation_id: GenerationId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl GenerationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Completed,
    Failed(String),
    TimedOut(u64),
    Cancelled,
}

impl Outcome {
    fn state(&self) -> GenerationState {
        match self {
            Self::Completed => GenerationState::Completed,
            Self::Failed(_) => GenerationState::Errored,
            Self::TimedOut(_) => GenerationState::TimedOut,
            Self::Cancelled => GenerationState::Cancelled,
        }
    }

    fn trigger(&self) -> GenerationTrigger {
        match self {
            Self::Completed => GenerationTrigger::Done,
            Self::Failed(_) => GenerationTrigger::Error,
            Self::TimedOut(_) => GenerationTrigger::WatchdogExpired,
            Self::Cancelled => GenerationTrigger::Stop,
        }
    }

    fn error_message(&self) -> Option<String> {
        match self {
            Self::Completed => None,
            Self::Failed(message) => Some(message.clone()),
            Self::TimedOut(ms) => Some(MuxError::GenerationTimeout(*ms).to_string()),
            Self::Cancelled => Some(MuxError::Cancelled.to_string()),
        }
    }
}

/// Assigns `message_index`, mirrors events into the local timeline and
/// writes them while the connection lasts.
struct Emitter {
    session_id: SessionId,
    generation_id: GenerationId,
    next_index: u64,
    writer: EventWriter,
    connected: bool,
    timeline: GenerationTimeline,
    matching: crate::timeline::ResultMatching,
    store: Arc<dyn GenerationStore>,
    started: Instant,
}

impl Emitter {
    async fn emit(&mut self, kind: EventKind) {
        let event = self.stage(kind);
        self.deliver(&event).await;
    }

    /// Number the event and fold it into the local timeline.
    fn stage(&mut self, kind: EventKind) -> StreamEvent {
        let event = StreamEvent::generation(
            self.session_id.clone(),
            self.generation_id.clone(),
            self.next_index,
            kind,
        );
        self.next_index += 1;
        if let Err(violation) = self.timeline.apply(&event.kind, self.matching) {
            tracing::warn!(
                session_id = %self.session_id,
                generation_id = %self.generation_id,
                %violation,
                "emitted event does not fit the timeline"
            );
        }
        event
    }

    async fn deliver(&mut self, event: &StreamEvent) {
        if !self.connected {
            return;
        }
        if let Err(err) = self.writer.send(event).await {
            self.connected = false;
            tracing::info!(
                session_id = %self.session_id,
                generation_id = %self.generation_id,
                error = %err,
                "connection gone; generation continues without a listener"
            );
            // A reattaching client can only catch up through the store.
            if !self.timeline.is_closed() {
                self.persist(self.record(None)).await;
            }
        }
    }

    /// Everything emitted so far, in the timeline's current state.
    fn record(&self, error: Option<String>) -> FinalizedGeneration {
        FinalizedGeneration {
            session_id: self.session_id.clone(),
            generation_id: self.generation_id.clone(),
            state: self.timeline.state,
            timeline: self.timeline.blocks.clone(),
            content: self.timeline.content.clone(),
            usage: self.timeline.usage,
            generation_time_ms: self.started.elapsed().as_millis() as u64,
            error,
            finished_at: Utc::now(),
        }
    }

    async fn persist(&self, record: FinalizedGeneration) {
        let state = record.state;
        if let Err(err) = self.store.persist(record).await {
            tracing::error!(
                session_id = %self.session_id,
                generation_id = %self.generation_id,
                %state,
                error = %err,
                "failed to persist generation"
            );
        }
    }
}

#[derive(Debug, Default)]
struct StepOutput {
    text: String,
    tool_calls: Vec<EngineToolCall>,
}

struct GenerationRunner {
    shared: Arc<ServerShared>,
    request: StartRequest,
    cancel: CancellationToken,
    emitter: Emitter,
    splitter: ThinkTagSplitter,
    thinking: Option<String>,
    content_block: String,
    usage: Usage,
    context: Option<ContextInfo>,
}

/// Spawn the task for an accepted start. The caller has already claimed the
/// session in the generation table under `generation_id`.
pub(crate) fn spawn(
    shared: Arc<ServerShared>,
    writer: EventWriter,
    request: StartRequest,
    generation_id: GenerationId,
) -> GenerationHandle {
    let cancel = CancellationToken::new();
    let emitter = Emitter {
        session_id: request.session_id.clone(),
        generation_id: generation_id.clone(),
        next_index: 0,
        writer,
        connected: true,
        timeline: GenerationTimeline::new(generation_id.clone()),
        matching: shared.config.result_matching,
        store: Arc::clone(&shared.store),
        started: Instant::now(),
    };
    let runner = GenerationRunner {
        shared,
        request,
        cancel: cancel.clone(),
        emitter,
        splitter: ThinkTagSplitter::new(),
        thinking: None,
        content_block: new_block_id(),
        usage: Usage::default(),
        context: None,
    };
    let task = tokio::spawn(runner.run());
    GenerationHandle {
        generation_id,
        cancel,
        task,
    }
}

impl GenerationRunner {
    async fn run(mut self) {
        tracing::info!(
            session_id = %self.request.session_id,
            generation_id = %self.emitter.generation_id,
            engine = self.shared.engine.name(),
            "generation started"
        );
        self.emitter.emit(EventKind::GenerationStart).await;
        self.shared.table.apply(
            &self.request.session_id,
            Some(&self.emitter.generation_id),
            GenerationTrigger::Progress,
        );
        self.emitter.persist(self.emitter.record(None)).await;

        let outcome = self.drive().await;
        let elapsed = self.emitter.started.elapsed();
        self.finish(outcome, elapsed).await;
    }

    async fn drive(&mut self) -> Outcome {
        let mut messages = vec![EngineMessage::user(self.request.content.clone())];
        let tools = self.shared.registry.list();
        let max_rounds = self.shared.config.max_tool_iterations;
        let mut rounds = 0usize;

        loop {
            let request = EngineRequest::builder()
                .session_id(self.request.session_id.clone())
                .generation_id(self.emitter.generation_id.clone())
                .messages(messages.clone())
                .tools(tools.clone())
                .maybe_model_id(self.request.model_id.clone())
                .build();
            let step = match self.step(&request).await {
                Ok(step) => step,
                Err(outcome) => return outcome,
            };
            if step.tool_calls.is_empty() {
                return Outcome::Completed;
            }

            rounds += 1;
            if rounds > max_rounds {
                return Outcome::Failed(format!(
                    "tool loop exceeded {max_rounds} iterations"
                ));
            }
            tracing::debug!(
                session_id = %self.request.session_id,
                generation_id = %self.emitter.generation_id,
                round = rounds,
                calls = step.tool_calls.len(),
                "running tool batch"
            );
            messages.push(EngineMessage::Assistant {
                content: step.text,
                tool_calls: step.tool_calls.clone(),
            });
            match self.run_tools(&step.tool_calls).await {
                Some(results) => messages.extend(results),
                None => return Outcome::Cancelled,
            }
        }
    }

    /// One engine step, bounded by the step timeout between chunks.
    async fn step(&mut self, request: &EngineRequest) -> Result<StepOutput, Outcome> {
        let step_timeout = self.shared.config.step_timeout;
        let timeout_ms = step_timeout.as_millis() as u64;
        let cancel = self.cancel.clone();
        let engine = Arc::clone(&self.shared.engine);
        self.splitter = ThinkTagSplitter::new();

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Outcome::Cancelled),
            opened = with_step_timeout(step_timeout, engine.stream(request)) => match opened {
                Ok(stream) => stream,
                Err(MuxError::GenerationTimeout(ms)) => return Err(Outcome::TimedOut(ms)),
                Err(err) => return Err(Outcome::Failed(err.to_string())),
            },
        };

        let mut out = StepOutput::default();
        let idle = time::sleep(step_timeout);
        tokio::pin!(idle);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Outcome::Cancelled),
                _ = &mut idle => return Err(Outcome::TimedOut(timeout_ms)),
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break; };
                    idle.as_mut().reset(Instant::now() + step_timeout);
                    match chunk {
                        Ok(EngineChunk::Done) => break,
                        Ok(chunk) => self.on_chunk(chunk, &mut out).await,
                        Err(err) => return Err(Outcome::Failed(err.to_string())),
                    }
                }
            }
        }

        for segment in self.splitter.finish() {
            self.on_segment(segment, &mut out).await;
        }
        self.close_thinking().await;
        Ok(out)
    }

    async fn on_chunk(&mut self, chunk: EngineChunk, out: &mut StepOutput) {
        match chunk {
            EngineChunk::Text(text) => {
                for segment in self.splitter.push(&text) {
                    self.on_segment(segment, out).await;
                }
            }
            EngineChunk::Reasoning(text) => self.on_segment(Segment::Reasoning(text), out).await,
            EngineChunk::ToolCalls(calls) => {
                self.close_thinking().await;
                out.tool_calls.extend(calls);
            }
            EngineChunk::Usage(usage) => {
                self.usage.merge(&usage);
                let usage = self.usage;
                self.emitter.emit(EventKind::UsageReport { usage }).await;
            }
            EngineChunk::Context(info) => self.context = Some(info),
            EngineChunk::Done => {}
        }
    }

    async fn on_segment(&mut self, segment: Segment, out: &mut StepOutput) {
        match segment {
            Segment::Reasoning(text) => {
                let block_id = match &self.thinking {
                    Some(id) => id.clone(),
                    None => {
                        let id = new_block_id();
                        self.emitter
                            .emit(EventKind::ThinkingStart {
                                block_id: id.clone(),
                                title: THINKING_START_TITLE.to_string(),
                            })
                            .await;
                        self.thinking = Some(id.clone());
                        id
                    }
                };
                self.emitter
                    .emit(EventKind::ThinkingDelta { block_id, text })
                    .await;
            }
            Segment::Text(text) => {
                self.close_thinking().await;
                out.text.push_str(&text);
                self.emitter
                    .emit(EventKind::ContentDelta {
                        block_id: self.content_block.clone(),
                        text,
                    })
                    .await;
            }
        }
    }

    async fn close_thinking(&mut self) {
        if let Some(block_id) = self.thinking.take() {
            self.emitter
                .emit(EventKind::ThinkingDone {
                    block_id,
                    title: THINKING_DONE_TITLE.to_string(),
                })
                .await;
        }
    }

    /// Emit the calls, run them as a batch and emit their results. `None`
    /// when cancelled; in-flight handlers get the grace period to unwind.
    async fn run_tools(&mut self, calls: &[EngineToolCall]) -> Option<Vec<EngineMessage>> {
        for call in calls {
            self.emitter
                .emit(EventKind::ToolCall {
                    block_id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                })
                .await;
        }

        let batch = calls
            .iter()
            .map(|call| {
                (
                    ToolCallRequest::new(call.name.clone(), call.arguments.clone()),
                    ToolExecutionContext::for_call(
                        self.request.session_id.clone(),
                        self.emitter.generation_id.clone(),
                        call.id.clone(),
                    )
                    .with_cancel(self.cancel.child_token()),
                )
            })
            .collect();
        let registry = Arc::clone(&self.shared.registry);
        let cancel = self.cancel.clone();
        let grace = self.shared.config.cancel_grace;
        let pending = registry.call_batch(batch, self.shared.config.tool_execution);
        tokio::pin!(pending);

        let results = tokio::select! {
            results = &mut pending => results,
            _ = cancel.cancelled() => {
                if time::timeout(grace, &mut pending).await.is_err() {
                    tracing::warn!(
                        session_id = %self.request.session_id,
                        grace_ms = grace.as_millis() as u64,
                        "tool calls did not unwind within the grace period"
                    );
                }
                return None;
            }
        };

        let mut messages = Vec::with_capacity(calls.len());
        for (call, result) in calls.iter().zip(results) {
            let (text, is_error) = match result {
                Ok(result) => (result.text(), result.is_error),
                Err(err) => (err.to_string(), true),
            };
            let value = serde_json::from_str(&text)
                .unwrap_or_else(|_| serde_json::Value::String(text.clone()));
            self.emitter
                .emit(EventKind::ToolResult {
                    block_id: Some(call.id.clone()),
                    name: call.name.clone(),
                    result: value,
                    is_error,
                })
                .await;
            messages.push(EngineMessage::Tool {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: text,
                is_error,
            });
        }
        Some(messages)
    }

    async fn finish(mut self, outcome: Outcome, elapsed: Duration) {
        let session_id = self.request.session_id.clone();
        let generation_id = self.emitter.generation_id.clone();

        let terminal = match &outcome {
            Outcome::Completed => EventKind::GenerationDone {
                generation_time: Some(elapsed.as_secs_f64()),
                context_info: self.context,
                usage: Some(self.usage),
            },
            other => EventKind::Error {
                block_id: Some(new_block_id()),
                message: other.error_message().unwrap_or_default(),
                terminal: true,
            },
        };
        // The record lands before the session is freed or the client hears
        // the outcome, so any pull after the terminal event sees it.
        let event = self.emitter.stage(terminal);
        self.emitter.timeline.state = outcome.state();
        let mut record = self.emitter.record(outcome.error_message());
        record.usage = self.usage;
        record.generation_time_ms = elapsed.as_millis() as u64;
        self.emitter.persist(record).await;
        self.shared
            .table
            .apply(&session_id, Some(&generation_id), outcome.trigger());
        self.emitter.deliver(&event).await;

        match &outcome {
            Outcome::Completed => tracing::info!(
                session_id = %session_id,
                generation_id = %generation_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "generation completed"
            ),
            other => tracing::warn!(
                session_id = %session_id,
                generation_id = %generation_id,
                state = %other.state(),
                error = other.error_message().unwrap_or_default(),
                "generation ended without completing"
            ),
        }
        self.shared
            .handles
            .remove_if(&session_id, |_, handle| handle.generation_id == generation_id);
    }
}
