//! Receiving side of the shared connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use super::multiplexer::SessionMultiplexer;
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::generation::{GenerationState, GenerationTable, GenerationTrigger, Watchdog};
use crate::protocol::{decode_frame, ClientCommand, Decoded, EventKind, StreamEvent};
use crate::store::SessionStateSource;
use crate::transport::{FrameSink, FrameTransport};
use crate::types::{GenerationId, SessionId};

/// Things the client surfaces to its user.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotice {
    Connected {
        connection_id: Option<String>,
    },
    Disconnected,
    /// A start was refused before any generation began.
    Rejected {
        session_id: SessionId,
        message: String,
    },
    /// A generation reached a terminal state (remote or local).
    GenerationFinished {
        session_id: SessionId,
        generation_id: Option<GenerationId>,
        state: GenerationState,
        error: Option<String>,
    },
}

struct ArmedWatchdog {
    seq: u64,
    watchdog: Watchdog,
    /// Armed on a connection that has since been replaced; the rest of the
    /// generation can only be learned from the store.
    detached: bool,
}

struct ClientInner {
    config: MuxConfig,
    mux: SessionMultiplexer,
    source: Arc<dyn SessionStateSource>,
    table: GenerationTable,
    watchdogs: DashMap<SessionId, ArmedWatchdog>,
    watchdog_seq: AtomicU64,
    outbound: Mutex<Option<FrameSink>>,
    attached_before: AtomicBool,
    notices: broadcast::Sender<ClientNotice>,
}

/// Client end of a multiplexed connection.
///
/// Starts are checked against the local generation table first, so a
/// duplicate start fails synchronously without reaching the wire. Each
/// started generation gets a watchdog that forces a local TimedOut if the
/// terminal event never arrives.
#[derive(Clone)]
pub struct ClientConnection {
    inner: Arc<ClientInner>,
}

impl ClientConnection {
    pub fn new(config: MuxConfig, source: Arc<dyn SessionStateSource>) -> Self {
        let (notices, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(ClientInner {
                mux: SessionMultiplexer::new(Arc::clone(&source), config.result_matching),
                source,
                config,
                table: GenerationTable::new(),
                watchdogs: DashMap::new(),
                watchdog_seq: AtomicU64::new(0),
                outbound: Mutex::new(None),
                attached_before: AtomicBool::new(false),
                notices,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientNotice> {
        self.inner.notices.subscribe()
    }

    pub fn multiplexer(&self) -> &SessionMultiplexer {
        &self.inner.mux
    }

    pub fn is_generating(&self, session_id: &str) -> bool {
        self.inner.table.is_active(session_id)
    }

    /// Attach a (new) transport and start reading from it.
    ///
    /// Events are never replayed across connections. On every attach after
    /// the first, generations still active locally are settled from the
    /// store, all sessions are marked for refresh and the focused one is
    /// pulled before this returns.
    pub async fn attach<T: FrameTransport>(&self, transport: T) -> Result<JoinHandle<()>> {
        let (sink, mut stream) = transport.split();
        *self.inner.outbound.lock().await = Some(sink);

        if self.inner.attached_before.swap(true, Ordering::AcqRel) {
            tracing::info!("reattached; refreshing sessions");
            for mut armed in self.inner.watchdogs.iter_mut() {
                armed.detached = true;
            }
            for session_id in self.inner.table.active_sessions() {
                self.inner.settle_from_store(&session_id, false).await;
            }
            self.inner.mux.mark_all_needs_refresh();
            if let Some(focused) = self.inner.mux.focused() {
                if let Err(err) = self.inner.mux.refresh(&focused).await {
                    tracing::warn!(
                        session_id = %focused,
                        error = %err,
                        "refresh after reconnect failed"
                    );
                }
            }
        }

        let client = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::info!(error = %err, "connection read failed");
                        break;
                    }
                };
                match decode_frame(&frame) {
                    Ok(Decoded::Event { event, .. }) => client.handle_event(event).await,
                    Ok(Decoded::Unknown { .. }) => {}
                    Err(err) => tracing::warn!(error = %err, "dropping malformed frame"),
                }
            }
            client.detach().await;
        }))
    }

    async fn detach(&self) {
        *self.inner.outbound.lock().await = None;
        self.inner.mux.mark_all_needs_refresh();
        let _ = self.inner.notices.send(ClientNotice::Disconnected);
        tracing::info!("connection lost");
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.outbound.lock().await.is_some()
    }

    async fn send(&self, command: &ClientCommand) -> Result<()> {
        let frame = command.to_frame()?;
        let mut outbound = self.inner.outbound.lock().await;
        let sink = outbound
            .as_mut()
            .ok_or_else(|| MuxError::ConnectionLost("not connected".into()))?;
        if let Err(err) = sink.send(frame).await {
            *outbound = None;
            return Err(err);
        }
        Ok(())
    }

    /// Ask the server to start a generation for `session_id`.
    ///
    /// Fails with [`MuxError::GenerationAlreadyActive`] while the session
    /// already has one in flight.
    pub async fn start_generation(&self, session_id: &str, content: &str) -> Result<()> {
        self.start_generation_with(ClientCommand::send_message(session_id, content))
            .await
    }

    /// Like [`start_generation`](Self::start_generation) with a model override.
    pub async fn start_generation_with_model(
        &self,
        session_id: &str,
        content: &str,
        model_id: &str,
    ) -> Result<()> {
        self.start_generation_with(ClientCommand::SendMessage {
            session_id: session_id.to_string(),
            content: content.to_string(),
            model_id: Some(model_id.to_string()),
        })
        .await
    }

    async fn start_generation_with(&self, command: ClientCommand) -> Result<()> {
        let session_id = command.session_id().unwrap_or_default().to_string();
        self.inner.table.start_with_id(&session_id, None)?;
        if let Err(err) = self.send(&command).await {
            self.inner
                .table
                .apply(&session_id, None, GenerationTrigger::Error);
            return Err(err);
        }
        self.arm_watchdog(&session_id);
        Ok(())
    }

    /// Cancel the session's generation. The local state becomes Cancelled
    /// at once; a late terminal event from the server is absorbed.
    pub async fn stop_generation(&self, session_id: &str) -> Result<bool> {
        let Some(ctx) = self.inner.table.active(session_id) else {
            return Ok(false);
        };
        let transition =
            self.inner
                .table
                .apply(session_id, ctx.generation_id.as_deref(), GenerationTrigger::Stop);
        if transition.entered_terminal() {
            self.inner.watchdogs.remove(session_id);
            self.inner.finish_locally(
                session_id,
                ctx.generation_id,
                GenerationTrigger::Stop,
                GenerationState::Cancelled,
                None,
            );
        }
        self.send(&ClientCommand::stop(session_id)).await?;
        Ok(true)
    }

    pub async fn focus(&self, session_id: &str) -> Result<()> {
        self.inner.mux.focus(session_id).await
    }

    pub fn blur(&self, session_id: &str) {
        self.inner.mux.blur(session_id);
    }

    fn arm_watchdog(&self, session_id: &str) {
        let seq = self.inner.watchdog_seq.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let session = session_id.to_string();
        let watchdog = Watchdog::spawn(self.inner.config.watchdog_timeout, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_watchdog_expired(&session, seq);
            }
        });
        self.inner.watchdogs.insert(
            session_id.to_string(),
            ArmedWatchdog {
                seq,
                watchdog,
                detached: false,
            },
        );
    }

    async fn handle_event(&self, event: StreamEvent) {
        match &event.kind {
            EventKind::Ping => {
                if let Err(err) = self.send(&ClientCommand::Pong).await {
                    tracing::debug!(error = %err, "pong not sent");
                }
                return;
            }
            EventKind::Pong => return,
            EventKind::Connected { connection_id } => {
                let _ = self.inner.notices.send(ClientNotice::Connected {
                    connection_id: connection_id.clone(),
                });
                return;
            }
            EventKind::Disconnected => return,
            _ => {}
        }
        let Some(session_id) = event.session_id.clone() else {
            return;
        };

        if let EventKind::Error {
            terminal: false,
            message,
            ..
        } = &event.kind
        {
            self.on_notice(&session_id, message);
            self.inner.mux.route(&event);
            return;
        }

        let finished = match self.inner.table.apply_event(&event) {
            Some(transition) if transition.entered_terminal() => {
                self.inner.watchdogs.remove(&session_id);
                let error = match &event.kind {
                    EventKind::Error { message, .. } => Some(message.clone()),
                    _ => None,
                };
                Some(ClientNotice::GenerationFinished {
                    session_id: session_id.clone(),
                    generation_id: event.generation_id.clone(),
                    state: transition.state(),
                    error,
                })
            }
            Some(transition) if transition.is_applied() => {
                if let Some(armed) = self.inner.watchdogs.get(&session_id) {
                    armed.watchdog.touch();
                }
                None
            }
            _ => None,
        };
        // The timeline sees the terminal event before anyone hears about it.
        self.inner.mux.route(&event);
        if let Some(notice) = finished {
            let _ = self.inner.notices.send(notice);
        }
    }

    /// A refused start. Frees the local slot if it never bound to a
    /// generation on the server.
    fn on_notice(&self, session_id: &str, message: &str) {
        let unbound = self
            .inner
            .table
            .active(session_id)
            .is_some_and(|ctx| ctx.generation_id.is_none());
        if unbound {
            self.inner
                .table
                .apply(session_id, None, GenerationTrigger::Error);
            self.inner.watchdogs.remove(session_id);
        }
        tracing::warn!(session_id, message, "server rejected request");
        let _ = self.inner.notices.send(ClientNotice::Rejected {
            session_id: session_id.to_string(),
            message: message.to_string(),
        });
    }
}

impl ClientInner {
    fn on_watchdog_expired(self: &Arc<Self>, session_id: &str, seq: u64) {
        let Some((_, armed)) = self
            .watchdogs
            .remove_if(session_id, |_, armed| armed.seq == seq)
        else {
            return;
        };
        if armed.detached {
            // One more pull before giving up on a generation whose events
            // went to a connection that is gone.
            let inner = Arc::clone(self);
            let session_id = session_id.to_string();
            tokio::spawn(async move { inner.settle_from_store(&session_id, true).await });
            return;
        }
        self.time_out(session_id);
    }

    /// Adopt the stored outcome of the session's active generation.
    ///
    /// With `or_time_out`, a generation the store does not show as finished
    /// is timed out locally; otherwise it stays active.
    async fn settle_from_store(&self, session_id: &str, or_time_out: bool) {
        let Some(ctx) = self.table.active(session_id) else {
            return;
        };
        let records = match self.source.load_session(session_id).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(session_id, error = %err, "could not settle generation from store");
                Vec::new()
            }
        };
        let finished = ctx.generation_id.as_deref().and_then(|id| {
            records
                .iter()
                .find(|r| r.generation_id == id && r.state.is_terminal())
        });
        let trigger = finished.and_then(|record| GenerationTrigger::ending_in(record.state));
        match (finished, trigger) {
            (Some(record), Some(trigger)) => {
                let transition = self.table.apply(session_id, Some(&record.generation_id), trigger);
                if !transition.entered_terminal() {
                    return;
                }
                self.watchdogs.remove(session_id);
                tracing::info!(
                    session_id,
                    generation_id = %record.generation_id,
                    state = %record.state,
                    "generation settled from store"
                );
                if self.mux.focused().as_deref() == Some(session_id) {
                    if let Err(err) = self.mux.refresh(session_id).await {
                        tracing::warn!(
                            session_id,
                            error = %err,
                            "refresh of settled session failed"
                        );
                    }
                }
                self.finish_locally(
                    session_id,
                    Some(record.generation_id.clone()),
                    trigger,
                    record.state,
                    record.error.clone(),
                );
            }
            _ if or_time_out => self.time_out(session_id),
            _ => {}
        }
    }

    fn time_out(&self, session_id: &str) {
        let Some(ctx) = self.table.active(session_id) else {
            return;
        };
        let transition = self.table.apply(
            session_id,
            ctx.generation_id.as_deref(),
            GenerationTrigger::WatchdogExpired,
        );
        if !transition.entered_terminal() {
            return;
        }
        let timeout_ms = self.config.watchdog_timeout.as_millis() as u64;
        let message = MuxError::GenerationTimeout(timeout_ms).to_string();
        tracing::warn!(session_id, "generation timed out waiting for the server");
        self.finish_locally(
            session_id,
            ctx.generation_id,
            GenerationTrigger::WatchdogExpired,
            GenerationState::TimedOut,
            Some(message),
        );
    }

    fn finish_locally(
        &self,
        session_id: &str,
        generation_id: Option<GenerationId>,
        trigger: GenerationTrigger,
        state: GenerationState,
        error: Option<String>,
    ) {
        self.mux
            .close_generation(session_id, generation_id.as_deref(), trigger, error.clone());
        let _ = self.notices.send(ClientNotice::GenerationFinished {
            session_id: session_id.to_string(),
            generation_id,
            state,
            error,
        });
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("multiplexer", &self.inner.mux)
            .field("active", &self.inner.table.active_sessions())
            .finish()
    }
}
