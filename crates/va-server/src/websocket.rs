//! WebSocket transport (spec §4.5 registration/teardown, §6 wire format):
//! upgrades one HTTP connection into a [`Session`], and bridges the
//! session's outbound frame queue to the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::orchestrator::Orchestrator;
use crate::rate_limit::RateLimiter;
use crate::transport::{ClientMessage, OutboundFrame, ServerMessage};

/// Upgrades the connection, registers a [`Session`] for it, and hands off
/// to [`run_socket`].
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(episode_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, orchestrator, episode_id))
}

async fn handle_socket(socket: WebSocket, orchestrator: Arc<Orchestrator>, episode_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let session = orchestrator.register(episode_id, out_tx).await;

    let rate_limit_config = orchestrator.settings().read().server.rate_limit.clone();
    let mut rate_limiter = RateLimiter::new(&rate_limit_config);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let message = match frame {
                OutboundFrame::Json(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text),
                    Err(err) => {
                        tracing::error!(%err, "failed to serialize outbound message");
                        continue;
                    }
                },
                OutboundFrame::Audio { speaker, pcm16 } => {
                    Message::Binary(crate::transport::encode_audio_frame(speaker, &pcm16))
                }
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => {
                if rate_limiter.check_message().is_err() {
                    session.push(ServerMessage::ack("rate limit exceeded, message dropped"));
                    continue;
                }
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => session.handle_client_message(client_msg).await,
                    Err(err) => {
                        tracing::warn!(%err, "malformed client message, dropping");
                        session.push(ServerMessage::ack("malformed message ignored"));
                    }
                }
            }
            Message::Binary(data) => {
                if rate_limiter.check_audio(data.len()).is_err() {
                    continue;
                }
                if let Err(err) = session.handle_human_audio(&data).await {
                    tracing::warn!(%err, "error processing inbound audio");
                }
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }

    writer.abort();
    orchestrator.teardown(&session.id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use va_config::Settings;
    use va_core::{NullStt, NullTts};

    #[test]
    fn rate_limiter_is_built_from_orchestrator_settings() {
        let orchestrator = Orchestrator::new(
            Arc::new(RwLock::new(Settings::default())),
            Arc::new(NullStt),
            Arc::new(NullTts),
            Arc::new(NullTts),
        );
        let config = orchestrator.settings().read().server.rate_limit.clone();
        let mut limiter = RateLimiter::new(&config);
        assert!(limiter.check_message().is_ok());
    }
}
