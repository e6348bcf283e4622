//! RTP header framing and the video/audio packetizers.
//!
//! Header layout and per-packet IV derivation are grounded on
//! `original_source/src/moonlight-server/gst-plugin/{audio,utils}.hpp`
//! and the `gstrtpmoonlightpay_video.hpp` payloader config; the video
//! FEC-block sizing mirrors `hgaiser-moonshine`'s packetizer
//! (`other_examples/78fda232...`).

use crate::crypto::{self, AES_IV_LEN, AES_KEY_LEN};
use crate::fec;

pub const RTP_HEADER_SIZE: usize = 12;
pub const VIDEO_PAYLOAD_TYPE: u8 = 97;
pub const AUDIO_PAYLOAD_TYPE: u8 = 97;
pub const AUDIO_FEC_PAYLOAD_TYPE: u8 = 127;

/// 12-byte RTP header: flags 0x80, packetType, sequence (BE u16),
/// timestamp (BE u32), ssrc=0.
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader {
    pub packet_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
}

impl RtpHeader {
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.push(0x80);
        out.push(self.packet_type);
        out.extend_from_slice(&self.sequence_number.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // ssrc
    }
}

/// The Moonlight-specific header following the RTP header on video
/// packets: `streamPacketIndex`, `frameIndex`, `flags`, `reserved`,
/// `multiFecFlags`, `multiFecBlocks`, `fecInfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NvVideoPacket {
    pub stream_packet_index: u32,
    pub frame_index: u32,
    pub flags: u8,
    pub reserved: u8,
    pub multi_fec_flags: u8,
    pub multi_fec_blocks: u8,
    pub fec_info: u32,
}

pub const FLAG_CONTAINS_PIC_DATA: u8 = 0x1;
pub const FLAG_END_OF_FRAME: u8 = 0x2;
pub const FLAG_START_OF_FRAME: u8 = 0x4;

impl NvVideoPacket {
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.stream_packet_index.to_le_bytes());
        out.extend_from_slice(&self.frame_index.to_le_bytes());
        out.push(self.flags);
        out.push(self.reserved);
        out.push(self.multi_fec_flags);
        out.push(self.multi_fec_blocks);
        out.extend_from_slice(&self.fec_info.to_le_bytes());
    }
}

pub const NV_VIDEO_PACKET_SIZE: usize = 4 + 4 + 1 + 1 + 1 + 1 + 4;

/// IV used to encrypt a single RTP packet's payload: the session's 16-byte
/// `aes_iv`, treated as a big-endian u32 in the first 4 bytes plus
/// `cur_seq_number`, re-serialized big-endian into a zero-padded 16 byte
/// buffer. Matches `gst-plugin/utils.hpp::derive_iv`.
pub fn derive_iv(aes_iv: &[u8; AES_IV_LEN], cur_seq_number: u32) -> [u8; AES_IV_LEN] {
    let base = u32::from_be_bytes(aes_iv[0..4].try_into().unwrap());
    let derived = base.wrapping_add(cur_seq_number);
    let mut iv = [0u8; AES_IV_LEN];
    iv[0..4].copy_from_slice(&derived.to_be_bytes());
    iv
}

pub fn encrypt_payload(aes_key: &[u8; AES_KEY_LEN], aes_iv: &[u8; AES_IV_LEN], cur_seq_number: u32, payload: &[u8]) -> Vec<u8> {
    let iv = derive_iv(aes_iv, cur_seq_number);
    crypto::aes_encrypt_cbc(payload, aes_key, &iv, true)
}

/// Fragments one encoded video frame into data + FEC shards, ready to be
/// sent as UDP datagrams. Each returned buffer is a complete RTP packet
/// (header + 4-byte reserved padding + NV_VIDEO_PACKET + payload).
pub struct VideoPacketizer;

impl VideoPacketizer {
    /// `payload_size` is the data-shard payload size in bytes (excludes RTP
    /// and NV_VIDEO_PACKET headers). Returns the packets to send and the
    /// new value of `cur_seq_number`.
    #[allow(clippy::too_many_arguments)]
    pub fn packetize(
        frame: &[u8],
        frame_index: u32,
        payload_size: usize,
        fec_percentage: u8,
        min_required_fec_packets: usize,
        aes_key: Option<&[u8; AES_KEY_LEN]>,
        aes_iv: &[u8; AES_IV_LEN],
        mut cur_seq_number: u32,
    ) -> (Vec<Vec<u8>>, u32) {
        let data_shard_count = frame.len().div_ceil(payload_size).max(1);
        let fec_shard_count = fec::video_fec_shard_count(data_shard_count, fec_percentage, min_required_fec_packets);

        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(data_shard_count + fec_shard_count);
        for i in 0..data_shard_count {
            let start = i * payload_size;
            let end = ((i + 1) * payload_size).min(frame.len());
            let mut shard = vec![0u8; payload_size];
            shard[..end - start].copy_from_slice(&frame[start..end]);
            shards.push(shard);
        }
        for _ in 0..fec_shard_count {
            shards.push(vec![0u8; payload_size]);
        }

        if fec_shard_count > 0 {
            let _ = fec::encode(&mut shards, data_shard_count, fec_shard_count);
        }

        let mut packets = Vec::with_capacity(shards.len());
        for (shard_index, shard_payload) in shards.iter().enumerate() {
            let is_data = shard_index < data_shard_count;
            let mut flags = FLAG_CONTAINS_PIC_DATA;
            if is_data && shard_index == 0 {
                flags |= FLAG_START_OF_FRAME;
            }
            if is_data && shard_index == data_shard_count - 1 {
                flags |= FLAG_END_OF_FRAME;
            }

            let video_header = NvVideoPacket {
                stream_packet_index: cur_seq_number << 8,
                frame_index,
                flags,
                reserved: 0,
                multi_fec_flags: 0x10,
                multi_fec_blocks: 0,
                fec_info: ((shard_index << 12) | (data_shard_count << 22) | ((fec_percentage as usize) << 4)) as u32,
            };

            let payload = match aes_key {
                Some(key) => encrypt_payload(key, aes_iv, cur_seq_number, shard_payload),
                None => shard_payload.clone(),
            };

            let mut packet = Vec::with_capacity(RTP_HEADER_SIZE + 4 + NV_VIDEO_PACKET_SIZE + payload.len());
            let rtp_header = RtpHeader {
                packet_type: VIDEO_PAYLOAD_TYPE,
                sequence_number: cur_seq_number as u16,
                timestamp: cur_seq_number,
            };
            rtp_header.serialize(&mut packet);
            packet.extend_from_slice(&[0u8; 4]); // reserved region
            video_header.serialize(&mut packet);
            packet.extend_from_slice(&payload);

            packets.push(packet);
            cur_seq_number = cur_seq_number.wrapping_add(1);
        }

        (packets, cur_seq_number)
    }
}

/// Fixed 4 data + 2 parity audio pipeline with FEC emitted every 4th
/// packet, grounded on `gst-plugin/audio.hpp::split_into_rtp`.
pub struct AudioPacketizer {
    packet_duration: u32,
    cur_seq_number: u32,
    data_shard_buffer: Vec<Vec<u8>>,
}

impl AudioPacketizer {
    pub fn new(packet_duration: u32) -> Self {
        Self { packet_duration, cur_seq_number: 0, data_shard_buffer: Vec::new() }
    }

    /// Feeds one Opus frame. Returns the RTP packets to send: always the
    /// data packet, plus two FEC packets when the group of 4 completes.
    pub fn push_frame(&mut self, opus_frame: &[u8], aes_key: Option<&[u8; AES_KEY_LEN]>, aes_iv: &[u8; AES_IV_LEN]) -> Vec<Vec<u8>> {
        let seq = self.cur_seq_number;
        let timestamp = seq.wrapping_mul(self.packet_duration);

        let payload = match aes_key {
            Some(key) => encrypt_payload(key, aes_iv, seq, opus_frame),
            None => opus_frame.to_vec(),
        };

        let mut data_packet = Vec::with_capacity(RTP_HEADER_SIZE + payload.len());
        RtpHeader { packet_type: AUDIO_PAYLOAD_TYPE, sequence_number: seq as u16, timestamp }.serialize(&mut data_packet);
        data_packet.extend_from_slice(&payload);

        self.data_shard_buffer.push(payload);
        if self.data_shard_buffer.len() > fec::AUDIO_DATA_SHARDS {
            self.data_shard_buffer.remove(0);
        }

        let mut out = vec![data_packet];

        let time_to_fec = (seq + 1) % fec::AUDIO_DATA_SHARDS as u32 == 0;
        if time_to_fec && self.data_shard_buffer.len() == fec::AUDIO_DATA_SHARDS {
            let shard_size = self.data_shard_buffer.iter().map(|s| s.len()).max().unwrap_or(0);
            let mut shards: Vec<Vec<u8>> = self
                .data_shard_buffer
                .iter()
                .map(|s| {
                    let mut padded = s.clone();
                    padded.resize(shard_size, 0);
                    padded
                })
                .chain((0..fec::AUDIO_FEC_SHARDS).map(|_| vec![0u8; shard_size]))
                .collect();

            if fec::encode(&mut shards, fec::AUDIO_DATA_SHARDS, fec::AUDIO_FEC_SHARDS).is_ok() {
                let base_seq_num = seq - (fec::AUDIO_DATA_SHARDS as u32 - 1);
                let base_timestamp = base_seq_num.wrapping_mul(self.packet_duration);

                for fec_idx in 0..fec::AUDIO_FEC_SHARDS {
                    let mut fec_packet = Vec::new();
                    RtpHeader {
                        packet_type: AUDIO_FEC_PAYLOAD_TYPE,
                        sequence_number: (seq + fec_idx as u32) as u16,
                        timestamp: 0,
                    }
                    .serialize(&mut fec_packet);

                    fec_packet.push(fec_idx as u8); // fecShardIndex
                    fec_packet.push(AUDIO_PAYLOAD_TYPE); // payloadType
                    fec_packet.extend_from_slice(&(base_seq_num as u16).to_be_bytes());
                    fec_packet.extend_from_slice(&base_timestamp.to_be_bytes());
                    fec_packet.extend_from_slice(&0u32.to_be_bytes()); // ssrc

                    fec_packet.extend_from_slice(&shards[fec::AUDIO_DATA_SHARDS + fec_idx]);
                    out.push(fec_packet);
                }
            }
        }

        self.cur_seq_number = self.cur_seq_number.wrapping_add(1);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_exact_payload_size_yields_one_data_shard() {
        let aes_iv = [0u8; AES_IV_LEN];
        let (packets, next_seq) = VideoPacketizer::packetize(&[0xAAu8; 100], 0, 100, 0, 0, None, &aes_iv, 0);
        // 0 fec percentage, 0 minimum -> exactly one data shard, no parity.
        assert_eq!(packets.len(), 1);
        assert_eq!(next_seq, 1);
    }

    #[test]
    fn audio_fec_fires_every_fourth_packet() {
        let aes_iv = [0u8; AES_IV_LEN];
        let mut packetizer = AudioPacketizer::new(960);
        let mut produced = Vec::new();
        for _ in 0..4 {
            produced.push(packetizer.push_frame(&[0u8; 32], None, &aes_iv).len());
        }
        assert_eq!(produced, vec![1, 1, 1, 3]);
    }

    #[test]
    fn derive_iv_matches_big_endian_addition() {
        let mut aes_iv = [0u8; AES_IV_LEN];
        aes_iv[0..4].copy_from_slice(&10u32.to_be_bytes());
        let iv = derive_iv(&aes_iv, 5);
        assert_eq!(u32::from_be_bytes(iv[0..4].try_into().unwrap()), 15);
        assert_eq!(&iv[4..], &[0u8; 12]);
    }
}
