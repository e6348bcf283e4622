//! The internal event bus: a tagged-union event type broadcast to every
//! subscriber task. Mirrors the shape of `protocol::dispatcher`'s
//! handler-registry-plus-stats pattern, built on `tokio::sync::broadcast`
//! instead of an opcode-keyed handler table since every subscriber here
//! wants every event, filtered by match rather than by registration.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::packet::input::InputPacket;
use crate::state::session::SessionId;

/// One lifecycle or control-plane event, grounded on `moonlight::control`'s
/// `ControlEvent`/`PauseStreamEvent`/`ResumeStreamEvent`/`StopStreamEvent`
/// plus the RTP ping events from `state/data-structures.hpp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    SessionConnected { session_id: SessionId, client_ip: IpAddr },
    SessionDisconnected { session_id: SessionId },
    #[serde(skip)]
    InputReceived { session_id: SessionId, input: InputPacket },
    PauseStream { session_id: SessionId },
    ResumeStream { session_id: SessionId },
    StopStream { session_id: SessionId },
    RtpVideoPing { session_id: SessionId, client_ip: IpAddr },
    RtpAudioPing { session_id: SessionId, client_ip: IpAddr },
}

/// Bus statistics, in the spirit of `DispatcherStats`.
#[derive(Debug, Default)]
pub struct EventBusStats {
    pub published: u64,
    pub dropped_no_subscribers: u64,
}

/// A single-producer-many-consumer event bus. Every publisher task holds
/// a clone of the sender; every subscriber task (runner, virtual devices,
/// the session registry) calls `subscribe()` once at startup.
pub struct EventBus {
    sender: broadcast::Sender<HostEvent>,
    stats: std::sync::Mutex<EventBusStats>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender, stats: std::sync::Mutex::new(EventBusStats::default()) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Delivery order is preserved per publisher task;
    /// cross-publisher ordering is not guaranteed, matching the
    /// concurrency model's ordering guarantees.
    pub fn publish(&self, event: HostEvent) {
        let mut stats = self.stats.lock().unwrap();
        stats.published += 1;
        if self.sender.send(event).is_err() {
            stats.dropped_no_subscribers += 1;
        }
    }

    pub fn stats(&self) -> EventBusStats {
        let stats = self.stats.lock().unwrap();
        EventBusStats { published: stats.published, dropped_no_subscribers: stats.dropped_no_subscribers }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let session_id: SessionId = 1;

        bus.publish(HostEvent::SessionConnected { session_id, client_ip: "127.0.0.1".parse().unwrap() });

        match rx.recv().await.unwrap() {
            HostEvent::SessionConnected { session_id: received, .. } => assert_eq!(received, session_id),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(bus.stats().published, 1);
    }

    #[test]
    fn publish_without_subscribers_is_counted_not_fatal() {
        let bus = EventBus::new(16);
        bus.publish(HostEvent::StopStream { session_id: 1 });
        assert_eq!(bus.stats().dropped_no_subscribers, 1);
    }
}
