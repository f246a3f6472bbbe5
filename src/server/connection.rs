//! Per-connection router.
//!
//! One task per accepted socket, one owning loop per task. Each iteration
//! races the inbound frame against a bounded idle tick, then runs the two
//! non-blocking duties: draining the shared command channel and flushing
//! pending outbound messages for every station this connection has
//! resolved. A dead transport ends only this connection; registry state and
//! undelivered messages survive for the station's next session.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::ocpp;
use crate::server::AppState;

const IDLE_TICK: Duration = Duration::from_millis(500);

pub async fn run(mut socket: WebSocket, peer: SocketAddr, state: AppState) {
    info!(%peer, "charge point connected");
    let mut tracked: HashSet<String> = HashSet::new();
    let mut idle = tokio::time::interval(IDLE_TICK);
    idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(error) = handle_inbound(&state, peer, &text, &mut tracked).await {
                            warn!(%peer, %error, "inbound message dropped");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings/pongs are handled by the transport; binary
                    // frames are not part of the 1.6J profile.
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(%peer, %error, "transport error");
                        break;
                    }
                }
            }
            _ = idle.tick() => {}
        }

        drain_commands(&state).await;
        if flush_outbound(&state, &tracked, &mut socket).await.is_err() {
            break;
        }
    }
    info!(%peer, "charge point disconnected");
}

/// Decode one frame, dispatch it through the engine against the station
/// resolved from the transport address, persist, and publish availability.
async fn handle_inbound(
    state: &AppState,
    peer: SocketAddr,
    text: &str,
    tracked: &mut HashSet<String>,
) -> Result<(), ProtocolError> {
    let message = ocpp::decode(text)?;
    debug!(%peer, frame = %text, "received");

    let handle = state
        .registry
        .resolve(&peer.ip().to_string(), peer.port())
        .await
        .map_err(ProtocolError::Store)?;

    let outcome = {
        let mut station = handle.lock().await;
        station.last_seen = Utc::now();
        state.engine.handle(&mut station, message).await
    };
    state.registry.commit(&handle).await?;
    // Commit may have promoted the record to its serial identity.
    tracked.insert(handle.lock().await.reg_id.clone());
    outcome?;

    state
        .availability
        .send_replace(state.registry.identified().await);
    Ok(())
}

/// Execute externally issued commands. Any connection may pick a command
/// up; the resulting pending request is flushed by whichever connection
/// tracks the target station.
async fn drain_commands(state: &AppState) {
    for command in state.commands.try_drain() {
        match state.registry.get(&command.station_id) {
            Some(handle) => {
                {
                    let mut station = handle.lock().await;
                    let msg_id = command.action.apply(&mut station);
                    debug!(station = %station.reg_id, %msg_id, "command queued");
                }
                if let Err(error) = state.registry.commit(&handle).await {
                    warn!(station = %command.station_id, %error, "failed to persist command");
                }
            }
            None => warn!(station = %command.station_id, "command for unknown station dropped"),
        }
    }
}

/// Send every not-yet-delivered message for the stations this connection
/// has resolved. A send failure means the transport is gone and the caller
/// ends the loop.
async fn flush_outbound(
    state: &AppState,
    tracked: &HashSet<String>,
    socket: &mut WebSocket,
) -> Result<(), axum::Error> {
    for reg_id in tracked {
        let Some(handle) = state.registry.get(reg_id) else {
            continue;
        };
        let frames = handle.lock().await.take_outbound();
        for frame in frames {
            debug!(station = %reg_id, frame = %frame, "sending");
            socket.send(Message::Text(frame)).await?;
        }
    }
    Ok(())
}
