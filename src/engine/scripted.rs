//! Deterministic engines for demos and tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::json;

use super::{EngineChunk, EngineMessage, EngineRequest, EngineToolCall, ReasoningEngine};
use crate::error::{MuxError, Result};
use crate::protocol::ContextInfo;
use crate::tools::builtin;
use crate::types::Usage;

/// One scripted engine step.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Chunks(Vec<EngineChunk>),
    /// The stream yields this error after any preceding chunks.
    Fail(String),
    /// The stream never yields.
    Stall,
}

/// Replays queued turns, one per `stream` call. Once exhausted every step is
/// an empty `Done`.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<EngineRequest>>,
    chunk_delay: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turn(self, chunks: Vec<EngineChunk>) -> Self {
        self.push(ScriptedTurn::Chunks(chunks));
        self
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(ScriptedTurn::Fail(message.into()));
        self
    }

    pub fn with_stall(self) -> Self {
        self.push(ScriptedTurn::Stall);
        self
    }

    /// Sleep between chunks.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn push(&self, turn: ScriptedTurn) {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(turn);
        }
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: &EngineRequest,
    ) -> Result<BoxStream<'static, Result<EngineChunk>>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let turn = self
            .turns
            .lock()
            .map_err(|_| MuxError::Engine("script lock poisoned".into()))?
            .pop_front()
            .unwrap_or(ScriptedTurn::Chunks(vec![EngineChunk::Done]));
        let delay = self.chunk_delay;

        Ok(Box::pin(stream! {
            match turn {
                ScriptedTurn::Chunks(chunks) => {
                    for chunk in chunks {
                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        }
                        yield Ok(chunk);
                    }
                }
                ScriptedTurn::Fail(message) => {
                    yield Err(MuxError::Engine(message));
                }
                ScriptedTurn::Stall => {
                    futures::future::pending::<()>().await;
                }
            }
        }))
    }
}

/// Demo engine for the CLI server.
///
/// Arithmetic input is routed through the `calculate` tool; anything else is
/// echoed back. Both paths stream a short `<think>` span first.
#[derive(Debug, Clone)]
pub struct DemoEngine {
    chunk_delay: Duration,
    max_context_tokens: u64,
}

impl Default for DemoEngine {
    fn default() -> Self {
        Self {
            chunk_delay: Duration::from_millis(40),
            max_context_tokens: 32_768,
        }
    }
}

impl DemoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    fn plan(&self, request: &EngineRequest) -> Vec<EngineChunk> {
        let input = request.last_user_text().unwrap_or_default().trim().to_string();
        let prompt_tokens = approx_tokens(&input);
        let mut chunks = Vec::new();

        let results = request.pending_tool_results();
        if let Some(EngineMessage::Tool { content, is_error, .. }) = results.first() {
            let answer = if *is_error {
                format!("The calculator failed: {content}")
            } else {
                let formatted = serde_json::from_str::<serde_json::Value>(content)
                    .ok()
                    .and_then(|v| v["formatted_result"].as_str().map(str::to_string))
                    .unwrap_or_else(|| content.clone());
                format!("{input} = {formatted}")
            };
            chunks.extend(words(&answer).map(EngineChunk::Text));
            chunks.push(EngineChunk::Usage(Usage::new(prompt_tokens, approx_tokens(&answer))));
        } else if builtin::evaluate(&input).is_ok() {
            chunks.push(EngineChunk::Text("<think>".into()));
            chunks.extend(
                words("This is arithmetic, so I will use the calculator.").map(EngineChunk::Text),
            );
            chunks.push(EngineChunk::Text("</think>".into()));
            chunks.push(EngineChunk::ToolCalls(vec![EngineToolCall {
                id: format!("call_{}", &request.generation_id.chars().take(8).collect::<String>()),
                name: "calculate".into(),
                arguments: json!({ "expression": input }),
            }]));
            chunks.push(EngineChunk::Usage(Usage::new(prompt_tokens, 12)));
        } else {
            chunks.push(EngineChunk::Text("<think>".into()));
            chunks.extend(words("Nothing to compute; echoing the message.").map(EngineChunk::Text));
            chunks.push(EngineChunk::Text("</think>".into()));
            let answer = format!("You said: {input}");
            chunks.extend(words(&answer).map(EngineChunk::Text));
            chunks.push(EngineChunk::Usage(Usage::new(prompt_tokens, approx_tokens(&answer))));
        }
        chunks.push(EngineChunk::Context(ContextInfo {
            current_context_tokens: prompt_tokens,
            max_context_tokens: self.max_context_tokens,
        }));
        chunks.push(EngineChunk::Done);
        chunks
    }
}

#[async_trait]
impl ReasoningEngine for DemoEngine {
    fn name(&self) -> &str {
        "demo"
    }

    async fn stream(
        &self,
        request: &EngineRequest,
    ) -> Result<BoxStream<'static, Result<EngineChunk>>> {
        let chunks = self.plan(request);
        let delay = self.chunk_delay;
        Ok(Box::pin(stream! {
            for chunk in chunks {
                tokio::time::sleep(delay).await;
                yield Ok(chunk);
            }
        }))
    }
}

/// Split into words, keeping the trailing space on all but the last.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_inclusive(' ').map(str::to_string)
}

fn approx_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4).max(1)
}
