//! HTTP request handlers: snapshot endpoints, health/status, and WebSocket streams.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use hostmon_core::model::{CpuSample, MemorySample};

use crate::hub::{HubStats, Subscription, Topic};
use crate::state::{AppState, SamplerStatus};

// ============================================================
// Health
// ============================================================

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is alive", body = String)
    )
)]
pub(crate) async fn handle_health() -> &'static str {
    "Ok"
}

// ============================================================
// Snapshots
// ============================================================

#[utoipa::path(
    get,
    path = "/api/cpus",
    responses(
        (status = 200, description = "Aggregate CPU sample; zeroed before the first tick", body = CpuSample)
    )
)]
pub(crate) async fn handle_cpus(State(state): State<AppState>) -> Json<CpuSample> {
    let snap = state.store.get();
    Json(snap.cpu.clone().unwrap_or_default())
}

#[utoipa::path(
    get,
    path = "/api/cpus/cores",
    responses(
        (status = 200, description = "One CPU sample per core; empty before the first tick", body = Vec<CpuSample>)
    )
)]
pub(crate) async fn handle_cpu_cores(State(state): State<AppState>) -> Json<Vec<CpuSample>> {
    let snap = state.store.get();
    Json(snap.cores.clone())
}

#[utoipa::path(
    get,
    path = "/api/memory",
    responses(
        (status = 200, description = "Memory sample; \"0 B\" everywhere before the first tick", body = MemorySample)
    )
)]
pub(crate) async fn handle_memory(State(state): State<AppState>) -> Json<MemorySample> {
    let snap = state.store.get();
    Json(snap.memory.clone().unwrap_or_else(MemorySample::placeholder))
}

// ============================================================
// Status
// ============================================================

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct StatusResponse {
    pub(crate) version: String,
    pub(crate) interval_ms: u64,
    /// Tick of the snapshot currently served. Zero until the first sample.
    pub(crate) snapshot_tick: u64,
    /// Unix timestamp (ms) of the snapshot currently served.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) snapshot_taken_at: Option<i64>,
    pub(crate) sampler: SamplerStatus,
    pub(crate) streams: HubStats,
}

#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Sampler and stream statistics", body = StatusResponse)
    )
)]
pub(crate) async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.store.get();
    Json(StatusResponse {
        version: hostmon_core::VERSION.to_string(),
        interval_ms: state.interval.as_millis() as u64,
        snapshot_tick: snap.tick,
        snapshot_taken_at: (!snap.is_empty()).then_some(snap.taken_at),
        sampler: state.stats.status(),
        streams: state.hub.stats(),
    })
}

// ============================================================
// WebSocket streams
// ============================================================

pub(crate) async fn handle_realtime_cpus(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, state, Topic::Cpus)
}

pub(crate) async fn handle_realtime_memory(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, state, Topic::Memory)
}

/// Registers the subscriber before switching protocols so a closed hub turns
/// into a plain 503. If the upgrade never completes the callback is dropped
/// along with the subscription, which unregisters it.
fn upgrade(ws: WebSocketUpgrade, state: AppState, topic: Topic) -> Response {
    let Some(subscription) = state.hub.subscribe(topic) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    };
    let timing = StreamTiming {
        ping_interval: state.ping_interval,
        write_timeout: state.write_timeout,
    };

    ws.on_failed_upgrade(move |e| warn!(%topic, error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| stream_topic(socket, subscription, timing))
}

#[derive(Debug, Clone, Copy)]
struct StreamTiming {
    ping_interval: Duration,
    /// Longest a single socket write may block before the client is dropped.
    write_timeout: Duration,
}

type StreamSink = SplitSink<WebSocket, Message>;

/// Sends one message, giving up after `limit`.
async fn write(
    sender: &mut StreamSink,
    msg: Message,
    limit: Duration,
) -> Result<(), &'static str> {
    match tokio::time::timeout(limit, sender.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err("write failed"),
        Err(_) => Err("write timed out"),
    }
}

/// Forwards queued frames to the client until the connection ends.
///
/// Ends on client close, read or write error, a write stalled past
/// `write_timeout`, or when the hub drops the subscriber (eviction, shutdown).
/// The subscription is released when this function returns, on every path.
async fn stream_topic(
    socket: WebSocket,
    mut subscription: Subscription,
    timing: StreamTiming,
) {
    let topic = subscription.topic();
    let id = subscription.id();
    let limit = timing.write_timeout;
    let (mut sender, mut receiver) = socket.split();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + timing.ping_interval,
        timing.ping_interval,
    );
    let mut sent: u64 = 0;

    info!(%topic, subscriber = id, "stream client connected");

    let reason = loop {
        tokio::select! {
            frame = subscription.recv() => match frame {
                Some(frame) => {
                    let msg = Message::Text(frame.as_ref().into());
                    if let Err(reason) = write(&mut sender, msg, limit).await {
                        break reason;
                    }
                    sent += 1;
                }
                None => {
                    let close = CloseFrame {
                        code: close_code::AWAY,
                        reason: "stream closed by server".into(),
                    };
                    let _ = write(&mut sender, Message::Close(Some(close)), limit).await;
                    break "closed by server";
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) => {
                    // Flush the close reply queued by the protocol layer
                    let _ = tokio::time::timeout(limit, sender.close()).await;
                    break "closed by client";
                }
                None => break "connection lost",
                Some(Err(e)) => {
                    debug!(%topic, subscriber = id, error = %e, "stream read failed");
                    break "read failed";
                }
                // Pongs to client pings are queued by the protocol layer; payloads are ignored
                Some(Ok(_)) => {}
            },
            _ = ping.tick() => {
                let msg = Message::Ping(Bytes::new());
                if let Err(reason) = write(&mut sender, msg, limit).await {
                    break reason;
                }
            }
        }
    };

    drop(subscription);
    if reason == "write timed out" {
        warn!(%topic, subscriber = id, frames = sent, "stream client stopped reading, dropped");
    } else {
        info!(%topic, subscriber = id, frames = sent, reason, "stream client disconnected");
    }
}
