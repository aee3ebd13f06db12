//! Push gateway
//!
//! One task per WebSocket connection:
//!
//! 1. Wait (bounded by the handshake timeout) for `{trackingNumber, zipCode}`.
//! 2. Authorize and attach to the order's channel, then send the snapshot.
//!    Events already covered by the snapshot are skipped from the queue.
//! 3. Stream queued events, ping on the heartbeat interval and drop the
//!    connection once too many pings go unanswered.
//!
//! Refused credentials get an `unauthorized` error frame and close code
//! 1008. Subscription attempts draw from the same per-order rate limit as
//! the snapshot API; once it is spent the client gets `rate_limited` and
//! 1013. A connection the registry dropped (queue overflow or idle expiry)
//! is closed with 1013 so the client reconnects and resynchronizes.

use crate::rate_limit::credential_key;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures::{
    SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracking_hub::ReadError;
use tracking_hub::heartbeat::{Liveness, Verdict};
use tracking_types::ids::OrderCredential;
use tracking_types::message::{PushErrorCode, PushMessage};

type Sink = SplitSink<WebSocket, Message>;
type Stream = SplitStream<WebSocket>;

/// Subscription request as received; validated into an [`OrderCredential`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubscribe {
    tracking_number: String,
    zip_code: String,
}

enum Handshake {
    Credential(OrderCredential),
    Rejected,
    Gone,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let credential = match read_subscribe_request(&mut sink, &mut stream, &state).await {
        Handshake::Credential(credential) => credential,
        Handshake::Rejected | Handshake::Gone => return,
    };

    let (mut subscription, snapshot) = match state.hub.open_subscription(&credential) {
        Ok(opened) => opened,
        Err(ReadError::Unauthorized(_)) => {
            let _ = send_message(&mut sink, &PushMessage::unauthorized()).await;
            close(&mut sink, close_code::POLICY, "unauthorized").await;
            return;
        }
        Err(ReadError::Store(err)) => {
            warn!(tracking_number = %credential.tracking_number, error = %err, "Subscription failed");
            close(&mut sink, close_code::AGAIN, "store unavailable").await;
            return;
        }
    };

    let tracking_number = credential.tracking_number;
    let connection_id = subscription.id();
    let snapshot_event_id = snapshot.last_event_id;
    info!(
        tracking_number = %tracking_number,
        connection_id,
        last_event_id = snapshot_event_id,
        "Push subscriber attached"
    );

    let initial = PushMessage::Snapshot {
        tracking_number: tracking_number.clone(),
        data: snapshot,
    };
    if send_message(&mut sink, &initial).await.is_err() {
        return;
    }

    let period = state.config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut liveness = Liveness::new(state.config.max_missed_pings);

    loop {
        tokio::select! {
            outbound = subscription.recv() => match outbound {
                Some(message) => {
                    // Already reflected in the snapshot
                    if message.event_id <= snapshot_event_id {
                        continue;
                    }
                    let frame = Message::Text(Utf8Bytes::from(&*message.payload));
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                    debug!(tracking_number = %tracking_number, connection_id, event_id = message.event_id, "Event pushed");
                }
                None => {
                    info!(tracking_number = %tracking_number, connection_id, "Dropped by registry; asking client to reconnect");
                    close(&mut sink, close_code::AGAIN, "resubscribe").await;
                    break;
                }
            },

            _ = heartbeat.tick() => match liveness.on_ping_due() {
                Verdict::SendPing => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                Verdict::Dead => {
                    state.hub.metrics().record_heartbeat_timeout();
                    warn!(
                        tracking_number = %tracking_number,
                        connection_id,
                        missed = liveness.outstanding(),
                        "Heartbeat timeout: disconnecting client"
                    );
                    break;
                }
            },

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => liveness.on_pong(),
            },
        }
    }

    // Dropping the subscription detaches it from the channel
    drop(subscription);
    info!(tracking_number = %tracking_number, connection_id, "Push subscriber detached");
}

async fn read_subscribe_request(sink: &mut Sink, stream: &mut Stream, state: &AppState) -> Handshake {
    let deadline = Instant::now() + state.config.handshake_timeout;

    loop {
        let next = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                debug!("Subscription handshake timed out");
                reject(sink, PushErrorCode::HandshakeTimeout, "No subscription request received").await;
                return Handshake::Rejected;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                let raw = match serde_json::from_str::<RawSubscribe>(text.as_str()) {
                    Ok(raw) => raw,
                    Err(e) => {
                        reject(sink, PushErrorCode::BadRequest, &format!("Invalid subscription request: {e}")).await;
                        return Handshake::Rejected;
                    }
                };
                // Same bucket as the snapshot API
                if state
                    .rate_limiter
                    .check_rate_limit(&credential_key(&raw.tracking_number))
                    .is_err()
                {
                    debug!("Subscription attempt rate limited");
                    let frame = PushMessage::Error {
                        code: PushErrorCode::RateLimited,
                        message: "Too many subscription attempts".to_string(),
                    };
                    let _ = send_message(sink, &frame).await;
                    close(sink, close_code::AGAIN, "rate limited").await;
                    return Handshake::Rejected;
                }
                return match OrderCredential::parse(&raw.tracking_number, &raw.zip_code) {
                    Ok(credential) => Handshake::Credential(credential),
                    // Malformed credentials are refused like wrong ones
                    Err(_) => {
                        state.hub.metrics().record_authorization_failure();
                        let _ = send_message(sink, &PushMessage::unauthorized()).await;
                        close(sink, close_code::POLICY, "unauthorized").await;
                        Handshake::Rejected
                    }
                };
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Handshake::Gone,
            Some(Ok(_)) => continue,
        }
    }
}

async fn reject(sink: &mut Sink, code: PushErrorCode, message: &str) {
    let frame = PushMessage::Error {
        code,
        message: message.to_string(),
    };
    let _ = send_message(sink, &frame).await;
    close(sink, close_code::PROTOCOL, "bad handshake").await;
}

async fn send_message(sink: &mut Sink, message: &PushMessage) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|e| {
        tracing::error!(error = %e, "Failed to encode push message");
    })?;
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}

async fn close(sink: &mut Sink, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}
