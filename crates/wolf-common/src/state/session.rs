//! The session registry (C8): a copy-on-write list of `StreamSession`s plus
//! the port allocator, grounded on `state/sessions.hpp`.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::events::{EventBus, HostEvent};
use crate::state::{ports, App, AudioMode, DisplayMode};

/// Numeric, monotonically-increasing, non-reusable session identifier.
pub type SessionId = u64;

#[derive(Debug, Clone)]
pub struct StreamSession {
    pub session_id: SessionId,
    pub client_ip: IpAddr,
    pub client_cert_pem: String,
    pub app: App,
    pub aes_key: [u8; 16],
    pub aes_iv: [u8; 16],
    pub video_port: u16,
    pub audio_port: u16,
    pub control_port: u16,
    pub rtsp_port: u16,
    /// Filled in once RTSP ANNOUNCE finalizes the session's parameters;
    /// `None` between `/launch` and a completed negotiation.
    pub negotiated_display_mode: Option<DisplayMode>,
    pub negotiated_audio_mode: Option<AudioMode>,
}

/// Copy-on-write session list: readers call `snapshot()`, writers CAS in a
/// freshly-built `Arc` (matches `SessionsAtoms = shared_ptr<immer::atom<...>>`).
pub struct SessionRegistry {
    sessions: ArcSwap<Vec<StreamSession>>,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: ArcSwap::from_pointee(Vec::new()), next_id: AtomicU64::new(1) }
    }

    pub fn snapshot(&self) -> Arc<Vec<StreamSession>> {
        self.sessions.load_full()
    }

    /// Allocates a fresh numeric session id and non-colliding video/audio/
    /// control ports, and inserts a new session. Port search starts at
    /// `base_port` plus the standard offsets and increments on collision,
    /// exactly as `get_next_available_port` does; the RTSP port is a single
    /// shared listener, so it never participates in collision avoidance.
    pub fn create(&self, client_ip: IpAddr, client_cert_pem: String, app: App, aes_key: [u8; 16], aes_iv: [u8; 16], base_port: u16) -> StreamSession {
        let previous = self.snapshot();

        let video_port = next_available_port(&previous, base_port + ports::VIDEO_RTP_OFFSET, |s| s.video_port);
        let audio_port = next_available_port(&previous, base_port + ports::AUDIO_RTP_OFFSET, |s| s.audio_port);
        let control_port = next_available_port(&previous, base_port + ports::CONTROL_OFFSET, |s| s.control_port);
        let rtsp_port = base_port + ports::RTSP_OFFSET;

        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let session = StreamSession {
            session_id,
            client_ip,
            client_cert_pem,
            app,
            aes_key,
            aes_iv,
            video_port,
            audio_port,
            control_port,
            rtsp_port,
            negotiated_display_mode: None,
            negotiated_audio_mode: None,
        };

        let mut next = previous.as_ref().clone();
        next.push(session.clone());
        self.sessions.store(Arc::new(next));

        session
    }

    /// Replaces a session in place, e.g. once RTSP ANNOUNCE finalizes its
    /// negotiated parameters. No-op if the session has since been removed.
    pub fn update(&self, session_id: SessionId, f: impl FnOnce(&mut StreamSession)) {
        let previous = self.snapshot();
        let mut next = previous.as_ref().clone();
        if let Some(session) = next.iter_mut().find(|s| s.session_id == session_id) {
            f(session);
            self.sessions.store(Arc::new(next));
        }
    }

    /// Single-match lookup by session id.
    pub fn lookup_by_id(&self, session_id: SessionId) -> Option<StreamSession> {
        self.snapshot().iter().find(|s| s.session_id == session_id).cloned()
    }

    /// Single-match lookup by client IP. Returns `None` (with a warning
    /// logged at the call site) when more than one session matches.
    pub fn lookup_by_ip(&self, client_ip: IpAddr) -> Option<StreamSession> {
        let snapshot = self.snapshot();
        let mut matches = snapshot.iter().filter(|s| s.client_ip == client_ip);
        let first = matches.next()?;
        if matches.next().is_some() {
            tracing::warn!(%client_ip, "found multiple sessions for a given IP");
            return None;
        }
        Some(first.clone())
    }

    /// Filters the session out and publishes a `StopStream` event — but only
    /// if a session with this id actually existed, so the event dispatch
    /// task's own call into `remove` (triggered by that same event) can't
    /// loop forever republishing it for an id that's already gone.
    pub fn remove(&self, session_id: SessionId, events: &EventBus) {
        let previous = self.snapshot();
        if !previous.iter().any(|s| s.session_id == session_id) {
            return;
        }
        let next: Vec<StreamSession> = previous.iter().filter(|s| s.session_id != session_id).cloned().collect();
        self.sessions.store(Arc::new(next));
        events.publish(HostEvent::StopStream { session_id });
    }
}

fn next_available_port(sessions: &[StreamSession], start: u16, port_of: impl Fn(&StreamSession) -> u16) -> u16 {
    let used: std::collections::HashSet<u16> = sessions.iter().map(&port_of).collect();
    let mut port = start;
    while used.contains(&port) {
        port += 1;
    }
    port
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Runner;

    fn sample_app() -> App {
        App { title: "test".into(), id: 1, support_hdr: false, runner: Runner::Process { command: vec!["true".into()], working_dir: None } }
    }

    #[test]
    fn port_allocation_increments_on_collision() {
        let registry = SessionRegistry::new();
        let ip1: IpAddr = "10.0.0.1".parse().unwrap();
        let ip2: IpAddr = "10.0.0.2".parse().unwrap();

        let s1 = registry.create(ip1, String::new(), sample_app(), [0u8; 16], [0u8; 16], ports::DEFAULT_BASE_PORT);
        let s2 = registry.create(ip2, String::new(), sample_app(), [0u8; 16], [0u8; 16], ports::DEFAULT_BASE_PORT);

        assert_eq!(s1.video_port, ports::DEFAULT_BASE_PORT + ports::VIDEO_RTP_OFFSET);
        assert_eq!(s2.video_port, ports::DEFAULT_BASE_PORT + ports::VIDEO_RTP_OFFSET + 1);
    }

    #[test]
    fn ports_are_derived_from_a_non_default_base_port() {
        let registry = SessionRegistry::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let session = registry.create(ip, String::new(), sample_app(), [0u8; 16], [0u8; 16], 3000);

        assert_eq!(session.video_port, 3000 + ports::VIDEO_RTP_OFFSET);
        assert_eq!(session.control_port, 3000 + ports::CONTROL_OFFSET);
        assert_eq!(session.audio_port, 3000 + ports::AUDIO_RTP_OFFSET);
        assert_eq!(session.rtsp_port, 3000 + ports::RTSP_OFFSET);
    }

    #[test]
    fn session_ids_are_numeric_and_non_reusable() {
        let registry = SessionRegistry::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let s1 = registry.create(ip, String::new(), sample_app(), [0u8; 16], [0u8; 16], ports::DEFAULT_BASE_PORT);
        let s2 = registry.create(ip, String::new(), sample_app(), [0u8; 16], [0u8; 16], ports::DEFAULT_BASE_PORT);

        assert_ne!(s1.session_id, s2.session_id);

        let events = EventBus::default();
        registry.remove(s1.session_id, &events);
        let s3 = registry.create(ip, String::new(), sample_app(), [0u8; 16], [0u8; 16], ports::DEFAULT_BASE_PORT);
        assert_ne!(s3.session_id, s1.session_id);
        assert_ne!(s3.session_id, s2.session_id);
    }

    #[test]
    fn lookup_by_ip_returns_none_on_ambiguous_match() {
        let registry = SessionRegistry::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        registry.create(ip, String::new(), sample_app(), [0u8; 16], [0u8; 16], ports::DEFAULT_BASE_PORT);
        registry.create(ip, String::new(), sample_app(), [0u8; 16], [0u8; 16], ports::DEFAULT_BASE_PORT);

        assert!(registry.lookup_by_ip(ip).is_none());
    }

    #[test]
    fn remove_drops_the_session_and_publishes_stop_stream() {
        let registry = SessionRegistry::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let session = registry.create(ip, String::new(), sample_app(), [0u8; 16], [0u8; 16], ports::DEFAULT_BASE_PORT);

        let events = EventBus::default();
        let mut rx = events.subscribe();
        registry.remove(session.session_id, &events);

        assert!(registry.lookup_by_id(session.session_id).is_none());
        match rx.try_recv().unwrap() {
            HostEvent::StopStream { session_id } => assert_eq!(session_id, session.session_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn removing_an_unknown_session_does_not_publish() {
        let registry = SessionRegistry::new();
        let events = EventBus::default();
        let mut rx = events.subscribe();

        registry.remove(999, &events);

        assert!(rx.try_recv().is_err());
    }
}
