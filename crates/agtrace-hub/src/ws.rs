//! Per-connection Subscription Endpoint handler (spec.md §4.J).

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::envelope::{self, Envelope};
use crate::server::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(54);
const READ_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "subscribe")]
    Subscribe,
}

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut writer, mut reader) = socket.split();
    let mut rx = state.broadcast_tx.subscribe();

    if let Err(err) = send_initial_snapshot(&mut writer, &state).await {
        warn!(error = %err, "failed to send initial snapshot to subscriber");
    }

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    let mut read_deadline = Instant::now() + READ_DEADLINE;

    loop {
        tokio::select! {
            broadcast_msg = rx.recv() => {
                match broadcast_msg {
                    Ok(envelope) => {
                        if send_envelope(&mut writer, &envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "subscriber fell behind, disconnecting");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = reader.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        read_deadline = Instant::now() + READ_DEADLINE;
                        if let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) {
                            let reply = match frame {
                                ClientFrame::Ping => envelope::pong(),
                                ClientFrame::Subscribe => envelope::subscribed(),
                            };
                            if send_envelope(&mut writer, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        read_deadline = Instant::now() + READ_DEADLINE;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        read_deadline = Instant::now() + READ_DEADLINE;
                    }
                    Some(Err(err)) => {
                        debug!(error = %err, "subscriber read error, disconnecting");
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                if writer.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(read_deadline) => {
                debug!("subscriber read deadline elapsed, disconnecting");
                break;
            }
        }
    }
}

async fn send_envelope(writer: &mut futures::stream::SplitSink<WebSocket, Message>, envelope: &Envelope) -> Result<(), axum::Error> {
    let text = serde_json::to_string(envelope).unwrap_or_else(|_| "{\"type\":\"error\"}".to_string());
    writer.send(Message::Text(text.into())).await
}

async fn send_initial_snapshot(writer: &mut futures::stream::SplitSink<WebSocket, Message>, state: &AppState) -> Result<(), axum::Error> {
    match agtrace_engine::summary_metrics(&state.store) {
        Ok(_metrics) => send_envelope(writer, &envelope::subscribed()).await,
        Err(err) => {
            warn!(error = %err, "initial snapshot query failed");
            send_envelope(writer, &envelope::error(err.to_string())).await
        }
    }
}
