//! Serving side of one shared connection.

use std::sync::Arc;

use futures::StreamExt;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::runner::{self, StartRequest};
use super::writer::EventWriter;
use super::ServerShared;
use crate::error::Result;
use crate::protocol::{ClientCommand, EventKind, StreamEvent};
use crate::transport::{FrameStream, FrameTransport};

/// Reads client commands and fans generation events back over one
/// connection.
///
/// Generations started here keep running if the connection drops; their
/// writes are discarded and their final records still reach the store.
pub struct ServerConnection {
    shared: Arc<ServerShared>,
    writer: EventWriter,
    connection_id: String,
}

impl ServerConnection {
    pub(crate) async fn run<T: FrameTransport>(
        shared: Arc<ServerShared>,
        transport: T,
    ) -> Result<()> {
        let (sink, stream) = transport.split();
        let writer = EventWriter::new(sink, shared.config.counter_mode);
        let connection = Self {
            shared,
            writer,
            connection_id: uuid::Uuid::new_v4().to_string(),
        };
        connection.serve(stream).await
    }

    async fn serve(self, mut stream: FrameStream) -> Result<()> {
        tracing::info!(connection_id = %self.connection_id, "connection opened");
        self.writer
            .send(&StreamEvent::connection(EventKind::Connected {
                connection_id: Some(self.connection_id.clone()),
            }))
            .await?;

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat(
            self.writer.clone(),
            self.shared.config.heartbeat_interval,
            heartbeat_stop.clone(),
        ));

        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::info!(
                        connection_id = %self.connection_id,
                        error = %err,
                        "read failed"
                    );
                    break;
                }
            };
            match ClientCommand::from_frame(&frame) {
                Ok(command) => self.dispatch(command).await,
                Err(err) => tracing::warn!(
                    connection_id = %self.connection_id,
                    error = %err,
                    "dropping unparseable client frame"
                ),
            }
        }

        heartbeat_stop.cancel();
        let _ = heartbeat.await;
        self.writer.close().await;
        tracing::info!(
            connection_id = %self.connection_id,
            active = self.shared.table.active_sessions().len(),
            "connection closed"
        );
        Ok(())
    }

    async fn dispatch(&self, command: ClientCommand) {
        match command {
            ClientCommand::SendMessage {
                session_id,
                content,
                model_id,
            } => {
                self.start(StartRequest {
                    session_id,
                    content,
                    model_id,
                })
                .await
            }
            ClientCommand::StopGeneration { session_id } => {
                if !self.shared.stop(&session_id) {
                    tracing::debug!(session_id = %session_id, "stop for idle session ignored");
                }
            }
            ClientCommand::Ping => {
                let _ = self.writer.send(&StreamEvent::connection(EventKind::Pong)).await;
            }
            ClientCommand::Pong => {
                tracing::trace!(connection_id = %self.connection_id, "pong");
            }
        }
    }

    async fn start(&self, request: StartRequest) {
        let generation_id = match self.shared.table.start(&request.session_id) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(session_id = %request.session_id, error = %err, "start rejected");
                let notice = StreamEvent::session_notice(request.session_id, err.to_string());
                let _ = self.writer.send(&notice).await;
                return;
            }
        };
        let session_id = request.session_id.clone();
        let handle = runner::spawn(
            Arc::clone(&self.shared),
            self.writer.clone(),
            request,
            generation_id,
        );
        self.shared.handles.insert(session_id, handle);
    }
}

async fn heartbeat(writer: EventWriter, interval: std::time::Duration, stop: CancellationToken) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {
                if writer.send(&StreamEvent::connection(EventKind::Ping)).await.is_err() {
                    return;
                }
            }
        }
    }
}
