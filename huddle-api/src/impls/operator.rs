//! Operator (monitoring) channel
//!
//! Sends the full room list when the operator connects and again after every
//! room lifecycle event. Inbound frames are only logged.

use huddle_sfu::{Outbound, RoomEvent, RoomFactory};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::signaling::SignalStream;

/// Serve one operator connection until it closes or a write fails
pub async fn run_operator<S: SignalStream>(
    factory: &RoomFactory,
    stream: &mut S,
    outbound: Arc<dyn Outbound>,
) {
    let mut events = factory.subscribe();
    info!("Operator connected");

    if !send_room_list(factory, outbound.as_ref()).await {
        return;
    }

    loop {
        tokio::select! {
            inbound = stream.recv() => match inbound {
                Some(Ok(frame)) => debug!(frame = %frame, "Operator message"),
                Some(Err(e)) => {
                    warn!(error = %e, "Operator read failed");
                    break;
                }
                None => break,
            },
            event = events.recv() => {
                match event {
                    Some(RoomEvent::Created(room_id)) => debug!(room_id = %room_id, "Room created"),
                    Some(RoomEvent::Deleted(room_id)) => debug!(room_id = %room_id, "Room deleted"),
                    Some(RoomEvent::Lagged(missed)) => debug!(missed, "Operator missed room events"),
                    None => break,
                }
                if !send_room_list(factory, outbound.as_ref()).await {
                    break;
                }
            }
        }
    }

    info!("Operator disconnected");
}

async fn send_room_list(factory: &RoomFactory, outbound: &dyn Outbound) -> bool {
    let frame = match serde_json::to_string(&factory.list_rooms()) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Failed to encode room list");
            return false;
        }
    };
    match outbound.send_text(frame).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "Failed to send room list");
            false
        }
    }
}
