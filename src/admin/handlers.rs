use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::engine::{CommandSnapshot, Engine};
use crate::resilience::{CircuitState, PoolSnapshot};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub commands: usize,
    pub open_circuits: usize,
    pub pools: usize,
}

pub async fn get_status(State(engine): State<Engine>) -> Json<SystemStatus> {
    let commands = engine.snapshots();
    let open_circuits = commands
        .iter()
        .filter(|c| c.state != CircuitState::Closed)
        .count();
    let status = if open_circuits == 0 { "operational" } else { "degraded" };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        commands: commands.len(),
        open_circuits,
        pools: engine.pool_snapshots().len(),
    })
}

pub async fn get_commands(State(engine): State<Engine>) -> Json<Vec<CommandSnapshot>> {
    Json(engine.snapshots())
}

pub async fn get_command(
    State(engine): State<Engine>,
    Path(key): Path<String>,
) -> Result<Json<CommandSnapshot>, StatusCode> {
    engine.find_snapshot(&key).map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_pools(State(engine): State<Engine>) -> Json<Vec<PoolSnapshot>> {
    Json(engine.pool_snapshots())
}

/// Server-sent `commands` events, each carrying the JSON array of command
/// snapshots, every `admin.stream_interval_ms` until the engine shuts down.
pub async fn stream_metrics(
    State(engine): State<Engine>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let period = Duration::from_millis(engine.config().admin.stream_interval_ms.max(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = engine.shutdown_signal();

    let frames = stream::unfold(
        (engine, ticker, shutdown),
        |(engine, mut ticker, mut shutdown): (Engine, Interval, broadcast::Receiver<()>)| async move {
            tokio::select! {
                _ = shutdown.recv() => None,
                _ = ticker.tick() => {
                    let event = match Event::default().event("commands").json_data(engine.snapshots()) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to encode command snapshots");
                            Event::default().event("error").data(e.to_string())
                        }
                    };
                    Some((Ok(event), (engine, ticker, shutdown)))
                }
            }
        },
    );

    Sse::new(frames).keep_alive(KeepAlive::default())
}
