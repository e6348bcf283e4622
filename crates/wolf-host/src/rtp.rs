//! RTP sender tasks (C7): one per session per stream kind, each consuming
//! encoded frames handed in from the (out-of-scope) media encoder over a
//! channel and emitting UDP datagrams to the client's RTP endpoint.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wolf_common::packet::rtp::{AudioPacketizer, VideoPacketizer};
use wolf_common::state::session::SessionId;

pub struct VideoStreamParams {
    pub payload_size: usize,
    pub fec_percentage: u8,
    pub min_required_fec_packets: usize,
    pub aes_key: Option<[u8; 16]>,
    pub aes_iv: [u8; 16],
}

pub async fn run_video_session(socket: UdpSocket, peer: SocketAddr, session_id: SessionId, params: VideoStreamParams, mut frames: mpsc::Receiver<(Vec<u8>, u32)>) {
    let mut cur_seq_number: u32 = 0;
    while let Some((frame, frame_index)) = frames.recv().await {
        let (packets, next_seq) = VideoPacketizer::packetize(
            &frame,
            frame_index,
            params.payload_size,
            params.fec_percentage,
            params.min_required_fec_packets,
            params.aes_key.as_ref(),
            &params.aes_iv,
            cur_seq_number,
        );
        cur_seq_number = next_seq;

        for packet in packets {
            if let Err(e) = socket.send_to(&packet, peer).await {
                warn!(%session_id, error = %e, "failed to send video packet");
            }
        }
    }
    debug!(%session_id, "video session channel closed");
}

pub async fn run_audio_session(
    socket: UdpSocket,
    peer: SocketAddr,
    session_id: SessionId,
    packet_duration: u32,
    aes_key: Option<[u8; 16]>,
    aes_iv: [u8; 16],
    mut frames: mpsc::Receiver<Vec<u8>>,
) {
    let mut packetizer = AudioPacketizer::new(packet_duration);
    while let Some(opus_frame) = frames.recv().await {
        let packets = packetizer.push_frame(&opus_frame, aes_key.as_ref(), &aes_iv);
        for packet in packets {
            if let Err(e) = socket.send_to(&packet, peer).await {
                warn!(%session_id, error = %e, "failed to send audio packet");
            }
        }
    }
    debug!(%session_id, "audio session channel closed");
}
