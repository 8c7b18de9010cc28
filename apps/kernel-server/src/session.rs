// apps/kernel-server/src/session.rs
// Purpose: The duplex pump binding one WebSocket connection to the hub
// — registration, the INIT_SESSION handshake, then the reader and
// writer control flows running concurrently until either terminates.
// Architecture: Domain Service
// Dependencies: axum (ws), tokio, futures, the wire codec

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::action::CommittedTaskAction;
use crate::hub::{HubHandle, RegisterMsg, SessionHandle};
use crate::models::{SessionData, UserData};
use crate::wire::{self, AnyAction};

const PING_PERIOD: Duration = Duration::from_secs(25);
const PONG_PERIOD: Duration = Duration::from_secs(30);
const WRITE_PERIOD: Duration = Duration::from_secs(10);
const OUTBOUND_CHANNEL_CAPACITY: usize = 8;

/// Entry point for one upgraded connection. Registers with the hub,
/// performs the session handshake, then runs the reader inline while
/// the writer runs as its own task — the two terminate independently
/// but both always end in exactly one `unregisterSession`.
pub async fn run_session(socket: WebSocket, hub: HubHandle, project_name: String, task_id: String) {
    let session_id = Uuid::new_v4();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

    let (ack_tx, ack_rx) = oneshot::channel();
    let handle = SessionHandle {
        session_id,
        task_id: task_id.clone(),
        project_name: project_name.clone(),
        outbound: outbound_tx,
    };
    if hub.register_tx.send(RegisterMsg { handle, ack: ack_tx }).await.is_err() {
        tracing::error!(%project_name, %task_id, "hub is gone; cannot register session");
        return;
    }
    match ack_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(%project_name, %task_id, error = %e, "session registration rejected");
            return;
        }
        Err(_) => {
            tracing::error!(%project_name, %task_id, "hub dropped the registration ack; cannot proceed");
            return;
        }
    }

    let (mut sink, mut stream) = socket.split();

    let handshake = serde_json::json!({
        "type": wire::INIT_SESSION,
        "sessionId": session_id.to_string(),
    });
    if sink.send(Message::Text(handshake.to_string())).await.is_err() {
        tracing::debug!(%session_id, "client disconnected before the handshake could be sent");
        let _ = hub.unregister_tx.send(session_id).await;
        return;
    }

    let writer = tokio::spawn(run_writer(sink, outbound_rx));

    run_reader(&mut stream, &hub, session_id).await;

    let _ = hub.unregister_tx.send(session_id).await;
    writer.abort();
    tracing::debug!(%session_id, "session terminated");
}

/// Blocks on read-message with a deadline that renews on every
/// successful read (a pong counts as one). Decodes the batch envelope;
/// a failure there is fatal to the session. Each action inside decodes
/// and routes independently — one bad action never takes down the
/// batch.
async fn run_reader(stream: &mut SplitStream<WebSocket>, hub: &HubHandle, session_id: Uuid) {
    let mut user_data = UserData::default();
    let mut session_data = SessionData::default();

    loop {
        let next = match tokio::time::timeout(PONG_PERIOD, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                tracing::info!(%session_id, "no message within the read deadline; closing session");
                return;
            }
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::info!(%session_id, error = %e, "read error; closing session");
                return;
            }
            None => {
                tracing::debug!(%session_id, "client closed the connection");
                return;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return,
            Message::Pong(_) | Message::Ping(_) | Message::Binary(_) => continue,
        };

        let batch = match wire::decode_batch(&text) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::info!(%session_id, error = %e, "batch envelope decode failed; closing session");
                return;
            }
        };

        for value in batch {
            match wire::decode_one(value) {
                Ok(AnyAction::Task(action)) => {
                    if hub.exec_tx.send(action).await.is_err() {
                        tracing::error!(%session_id, "hub exec channel closed; closing session");
                        return;
                    }
                }
                Ok(AnyAction::User(_, payload)) => {
                    user_data = payload.apply(&user_data);
                }
                Ok(AnyAction::Session(_, payload)) => {
                    session_data = payload.apply(&session_data);
                }
                Err(e) => {
                    tracing::info!(%session_id, error = %e, "action decode failed; skipping this action only");
                }
            }
        }
    }
}

/// Drains the outbound channel and multiplexes it against a ping
/// ticker. Every write — action or ping — is bounded by the write
/// deadline; any write failure or channel closure ends the writer,
/// leaving the reader path to notice and unregister.
async fn run_writer(mut sink: SplitSink<WebSocket, Message>, mut outbound_rx: mpsc::Receiver<CommittedTaskAction>) {
    let mut ping_ticker = tokio::time::interval(PING_PERIOD);
    ping_ticker.tick().await; // first tick fires immediately; the connection is already fresh

    loop {
        tokio::select! {
            action = outbound_rx.recv() => {
                let Some(action) = action else {
                    tracing::debug!("outbound channel closed; writer terminating");
                    break;
                };
                let text = action.to_wire_value().to_string();
                match tokio::time::timeout(WRITE_PERIOD, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::info!(error = %e, "write error; writer terminating");
                        break;
                    }
                    Err(_) => {
                        tracing::info!("write deadline exceeded; writer terminating");
                        break;
                    }
                }
            }
            _ = ping_ticker.tick() => {
                match tokio::time::timeout(WRITE_PERIOD, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        tracing::info!("ping write failed or deadline exceeded; writer terminating");
                        break;
                    }
                }
            }
        }
    }
}
