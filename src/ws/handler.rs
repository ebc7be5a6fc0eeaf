//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{
    EndpointId, FeedEvent, ReplicationBatch, ReplicationFeed, SessionError, SessionHandle,
};
use crate::util::rate_limit::EndpointRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

type WsSink = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let endpoint = EndpointId::new();
    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before joining so no batch after the snapshot is missed
    let batch_rx = state.session.subscribe();

    let joined = match state.session.connect(endpoint).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!(endpoint = %endpoint, error = %e, "Session refused connection");
            let _ = send_msg(&mut ws_sink, &ServerMsg::error(error_code(&e), e.to_string())).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    info!(
        endpoint = %endpoint,
        controller = %joined.controller_id,
        "New WebSocket connection"
    );

    let welcome = ServerMsg::Welcome {
        endpoint_id: endpoint,
        controller_id: joined.controller_id,
        server_time: unix_millis(),
        tick_rate: state.config.tick_rate,
    };

    let mut synced = send_msg(&mut ws_sink, &welcome).await;
    for event in joined.snapshot {
        if synced.is_err() {
            break;
        }
        synced = send_msg(&mut ws_sink, &ServerMsg::from(event)).await;
    }

    match synced {
        Ok(()) => {
            run_connection(
                endpoint,
                joined.as_of,
                ws_sink,
                ws_stream,
                batch_rx,
                state.session.clone(),
            )
            .await;
        }
        Err(e) => {
            error!(endpoint = %endpoint, error = %e, "Failed to send initial sync");
        }
    }

    // Cleanup on disconnect
    state.session.disconnect(endpoint).await;

    info!(endpoint = %endpoint, "WebSocket connection closed");
}

/// Run the connection with read/write split
async fn run_connection(
    endpoint: EndpointId,
    as_of: u64,
    mut ws_sink: WsSink,
    mut ws_stream: SplitStream<WebSocket>,
    batch_rx: broadcast::Receiver<Arc<ReplicationBatch>>,
    session: SessionHandle,
) {
    let rate_limiter = EndpointRateLimiter::new();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(32);

    let mut feed = ReplicationFeed::new(endpoint, session.clone(), batch_rx, as_of);

    // Spawn writer task: replication batches and direct replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = feed.next() => {
                    let sent = match event {
                        Some(FeedEvent::Batch(batch)) => send_batch(&mut ws_sink, &batch).await,
                        Some(FeedEvent::Resync(resynced)) => {
                            send_msg(&mut ws_sink, &ServerMsg::from(resynced)).await
                        }
                        None => {
                            debug!(endpoint = %endpoint, "Replication feed ended");
                            let _ = ws_sink.close().await;
                            break;
                        }
                    };
                    if let Err(e) = sent {
                        debug!(endpoint = %endpoint, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                reply = reply_rx.recv() => match reply {
                    Some(msg) => {
                        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                            debug!(endpoint = %endpoint, error = %e, "WebSocket send failed");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    // Reader loop: WebSocket -> session
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(endpoint = %endpoint, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Command { entity_id, command }) => {
                        if session
                            .send_command(endpoint, entity_id, command)
                            .await
                            .is_err()
                        {
                            debug!(endpoint = %endpoint, "Session input channel closed");
                            break;
                        }
                    }
                    Ok(ClientMsg::Ping { t }) => {
                        let _ = reply_tx
                            .send(ServerMsg::Pong {
                                t,
                                server_time: unix_millis(),
                            })
                            .await;
                    }
                    Err(e) => {
                        warn!(endpoint = %endpoint, error = %e, "Failed to parse client message");
                        let _ = reply_tx
                            .send(ServerMsg::error("invalid_message", e.to_string()))
                            .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(endpoint = %endpoint, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(endpoint = %endpoint, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(endpoint = %endpoint, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(endpoint = %endpoint, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(endpoint = %endpoint, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Abort writer task
    writer_handle.abort();
}

fn error_code(error: &SessionError) -> &'static str {
    match error {
        SessionError::Full => "session_full",
        SessionError::NotActive => "session_not_active",
        SessionError::AlreadyConnected(_) => "already_connected",
        SessionError::NotConnected(_) => "not_connected",
        SessionError::Closed | SessionError::InvalidTransition { .. } => "session_closed",
    }
}

/// Send every event of a batch, in order
async fn send_batch(sink: &mut WsSink, batch: &ReplicationBatch) -> Result<(), String> {
    for event in &batch.events {
        send_msg(sink, &ServerMsg::from(event.clone())).await?;
    }
    Ok(())
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
