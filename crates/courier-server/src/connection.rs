//! Per-connection event dispatch.
//!
//! Each accepted WebSocket runs one task: authenticate on the first
//! `connect` event, register a live handle and bind the durable session,
//! then loop over inbound client events and the connection's outbound queue
//! until either side goes away. This single dispatch entry point is the only
//! place transport frames meet the routing core.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::BytesMut;
use courier_core::registry::ConnectionHandle;
use courier_core::types::{ConnectionId, UserId};
use courier_protocol::{codec, Event, PROTOCOL_VERSION};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};

/// Drive one WebSocket connection from handshake to disconnect.
pub async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mut sender, mut receiver) = socket.split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Handshake: the first event must be `connect` with a valid token.
    let handshake_timeout = Duration::from_millis(state.config.heartbeat.handshake_timeout_ms);
    let first = match timeout(handshake_timeout, next_event(&mut receiver, &mut read_buffer)).await
    {
        Ok(Some(event)) => event,
        Ok(None) => return,
        Err(_) => {
            debug!("Handshake timed out");
            return;
        }
    };

    let Event::Connect { token } = first else {
        let _ = send_event(&mut sender, &Event::error("authentication required")).await;
        return;
    };

    let session = match state.sessions.authenticate(&token).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            let _ = send_event(&mut sender, &Event::error("Session expired")).await;
            return;
        }
        Err(e) => {
            warn!(error = %e, "Authentication lookup failed");
            let _ = send_event(&mut sender, &Event::error("authentication unavailable")).await;
            return;
        }
    };

    let user_id = session.user_id;
    let display_name = session.display_name;

    // Register the live handle first so fanout sees it, then bind the
    // durable session to it.
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let handle = ConnectionHandle::new(user_id, display_name.clone(), tx.clone());
    let connection_id = state.registry.register(handle);

    match state
        .sessions
        .bind_connection(user_id, &token, &connection_id)
        .await
    {
        Ok(true) => {}
        // No durable session to bind: force-disconnect, nothing surfaced.
        Ok(false) | Err(_) => {
            state.registry.unregister(&connection_id);
            return;
        }
    }

    info!(user = %user_id, connection = %connection_id, "Connection established");

    let connected = Event::connected(
        connection_id.as_str(),
        PROTOCOL_VERSION,
        state.config.heartbeat.interval_ms as u32,
    );

    if send_event(&mut sender, &connected).await.is_ok() {
        'conn: loop {
            tokio::select! {
                biased;

                // Events queued for this connection: fanout deliveries,
                // acks, errors.
                outbound = rx.recv() => {
                    match outbound {
                        Some(event) => {
                            if send_event(&mut sender, &event).await.is_err() {
                                break 'conn;
                            }
                        }
                        None => break 'conn,
                    }
                }

                // Inbound client traffic.
                inbound = receiver.next() => {
                    match inbound {
                        Some(Ok(Message::Binary(data))) => {
                            read_buffer.extend_from_slice(&data);
                            loop {
                                match codec::decode_from(&mut read_buffer) {
                                    Ok(Some(event)) => {
                                        dispatch(
                                            event,
                                            &state,
                                            &tx,
                                            user_id,
                                            &display_name,
                                            &token,
                                            &connection_id,
                                        )
                                        .await;
                                    }
                                    Ok(None) => break,
                                    Err(e) => {
                                        warn!(
                                            connection = %connection_id,
                                            error = %e,
                                            "Protocol error"
                                        );
                                        metrics::record_error("protocol");
                                        break 'conn;
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Text(text))) => {
                            // Treat text as binary
                            read_buffer.extend_from_slice(text.as_bytes());
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break 'conn;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            // Ignore pongs
                        }
                        Some(Ok(Message::Close(_))) => {
                            debug!(connection = %connection_id, "Received close frame");
                            break 'conn;
                        }
                        Some(Err(e)) => {
                            warn!(connection = %connection_id, error = %e, "WebSocket error");
                            metrics::record_error("websocket");
                            break 'conn;
                        }
                        None => {
                            debug!(connection = %connection_id, "WebSocket stream ended");
                            break 'conn;
                        }
                    }
                }
            }
        }
    }

    // Cleanup: drop the live handle, then null the durable binding so a
    // later message cannot mistake this session for live.
    state.registry.unregister(&connection_id);
    if let Err(e) = state.sessions.clear_connection(user_id, &token).await {
        warn!(user = %user_id, error = %e, "Failed to clear session on disconnect");
    }

    info!(user = %user_id, connection = %connection_id, "Connection closed");
}

/// Handle one decoded client event.
async fn dispatch(
    event: Event,
    state: &Arc<AppState>,
    tx: &mpsc::UnboundedSender<Event>,
    user_id: UserId,
    display_name: &str,
    token: &str,
    connection_id: &ConnectionId,
) {
    match event {
        Event::ChatFocus { chat_id } => {
            if chat_id.is_empty() {
                if let Err(e) = state.sessions.clear_focus(user_id, token).await {
                    warn!(user = %user_id, error = %e, "Failed to clear focus");
                }
                return;
            }
            match chat_id.parse() {
                Ok(chat) => match state.sessions.set_focus(user_id, token, chat).await {
                    Ok(true) => {}
                    Ok(false) => debug!(user = %user_id, chat = %chat, "Focus refused"),
                    Err(e) => warn!(user = %user_id, error = %e, "Focus update failed"),
                },
                Err(_) => debug!(user = %user_id, "Ignoring focus on malformed chat id"),
            }
        }

        Event::SendMessage { chat_id, content } => {
            // Fanout must run to completion even if this connection goes
            // away mid-pass, so the send is detached from the reader task.
            // The outcome flows back through the outbound queue if the
            // connection is still open.
            let router = state.router.clone();
            let tx = tx.clone();
            let sender_name = display_name.to_string();
            let origin = connection_id.clone();

            tokio::spawn(async move {
                let start = Instant::now();
                match router
                    .send_message(user_id, &sender_name, &origin, &chat_id, &content)
                    .await
                {
                    Ok(outcome) => {
                        metrics::record_send(outcome.live_deliveries, outcome.queued);
                        metrics::record_send_latency(start.elapsed().as_secs_f64());
                        if outcome.degraded {
                            metrics::record_error("notification_batch");
                        }
                        let _ = tx.send(Event::SendAck {
                            message_id: outcome.message.id.to_string(),
                            delivered_live: outcome.live_deliveries as u32,
                            queued: outcome.queued as u32,
                            degraded: outcome.degraded,
                        });
                    }
                    Err(e) => {
                        metrics::record_error(if e.is_retryable() {
                            "send_transient"
                        } else {
                            "send_rejected"
                        });
                        let _ = tx.send(Event::error(e.to_string()));
                    }
                }
            });
        }

        Event::Ping { timestamp } => {
            let _ = tx.send(Event::pong(timestamp));
        }

        Event::Connect { .. } => {
            debug!(user = %user_id, "Connect event on established connection");
        }

        other => {
            warn!(
                user = %user_id,
                event = other.name(),
                "Unexpected event from client"
            );
        }
    }
}

/// Read messages until one complete event decodes, the stream ends, or the
/// peer sends garbage.
async fn next_event(receiver: &mut SplitStream<WebSocket>, buf: &mut BytesMut) -> Option<Event> {
    loop {
        match codec::decode_from(buf) {
            Ok(Some(event)) => return Some(event),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Protocol error during handshake");
                return None;
            }
        }

        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => buf.extend_from_slice(&data),
            Some(Ok(Message::Text(text))) => buf.extend_from_slice(text.as_bytes()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Err(e)) => {
                debug!(error = %e, "WebSocket error during handshake");
                return None;
            }
        }
    }
}

/// Encode and send one event on the socket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &Event,
) -> anyhow::Result<()> {
    let data = codec::encode(event)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
