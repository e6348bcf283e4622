//! The event bus's single dispatch task (C8): subscribes once at startup
//! and performs the cross-cutting effects that shouldn't live in whichever
//! request handler happened to publish the triggering event — currently
//! just turning a `StopStream` into an actual session-registry removal.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};
use wolf_common::events::HostEvent;

use crate::state::AppState;

pub async fn run(state: Arc<AppState>) {
    let mut events = state.events.subscribe();
    loop {
        match events.recv().await {
            Ok(HostEvent::StopStream { session_id }) => {
                state.sessions.remove(session_id, &state.events);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event dispatch task lagged, some events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("event bus closed, dispatch task exiting");
                return;
            }
        }
    }
}
