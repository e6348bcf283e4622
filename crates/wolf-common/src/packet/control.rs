//! Control channel wire framing: type/length/seq/gcm_tag/ciphertext, and the
//! ten inner packet types carried once decrypted.
//!
//! Byte layout matches `moonlight::control` (`src/moonlight/moonlight/control.hpp`);
//! round-trip tested the same way as the other wire-format modules.

use crate::crypto::{self, AES_IV_LEN, AES_KEY_LEN, GCM_TAG_LEN};
use crate::error::{HResult, HostError};

pub const HEADER_TYPE_ENCRYPTED: u16 = 0x0001;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    StartA = 0x0305,
    StartB = 0x0307,
    InvalidateRefFrames = 0x0301,
    LossStats = 0x0201,
    FrameStats = 0x0204,
    InputData = 0x0206,
    RumbleData = 0x010b,
    Termination = 0x0100,
    PeriodicPing = 0x0200,
    IdrFrame = 0x0302,
}

impl PacketType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x0305 => Self::StartA,
            0x0307 => Self::StartB,
            0x0301 => Self::InvalidateRefFrames,
            0x0201 => Self::LossStats,
            0x0204 => Self::FrameStats,
            0x0206 => Self::InputData,
            0x010b => Self::RumbleData,
            0x0100 => Self::Termination,
            0x0200 => Self::PeriodicPing,
            0x0302 => Self::IdrFrame,
            _ => return None,
        })
    }
}

/// A decoded, decrypted inner control message.
pub struct ControlMessage {
    pub packet_type: PacketType,
    pub payload: Vec<u8>,
}

/// Encrypts `payload` as an inner control message (its first two bytes must
/// already be the little-endian packet type) and wraps it in the outer
/// `type/length/seq/tag/ciphertext` frame ready to send over the wire.
pub fn encrypt_packet(key: &[u8; AES_KEY_LEN], seq: u32, payload: &[u8]) -> Vec<u8> {
    let iv = seq_to_iv(seq);
    let (ciphertext, tag) = crypto::aes_encrypt_gcm(payload, key, &iv);

    let mut frame = Vec::with_capacity(4 + 4 + GCM_TAG_LEN + ciphertext.len());
    let length: u16 = (4 + GCM_TAG_LEN + ciphertext.len()) as u16;
    frame.extend_from_slice(&HEADER_TYPE_ENCRYPTED.to_le_bytes());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&seq.to_le_bytes());
    frame.extend_from_slice(&tag);
    frame.extend_from_slice(&ciphertext);
    frame
}

/// Parses and decrypts an inbound frame. Rejects unknown inner types and
/// frames too short to contain a header.
pub fn decrypt_packet(key: &[u8; AES_KEY_LEN], frame: &[u8]) -> HResult<(u32, ControlMessage)> {
    if frame.len() < 24 {
        return Err(HostError::MalformedPacket("control frame shorter than header".into()));
    }
    let header_type = u16::from_le_bytes(frame[0..2].try_into().unwrap());
    if header_type != HEADER_TYPE_ENCRYPTED {
        return Err(HostError::MalformedPacket(format!("unexpected header type 0x{header_type:04x}")));
    }
    let length = u16::from_le_bytes(frame[2..4].try_into().unwrap()) as usize;
    let seq = u32::from_le_bytes(frame[4..8].try_into().unwrap());
    let tag: [u8; GCM_TAG_LEN] = frame[8..24].try_into().unwrap();
    let ciphertext_len = length.checked_sub(4 + GCM_TAG_LEN).ok_or_else(|| HostError::MalformedPacket("length underflow".into()))?;
    let ciphertext = frame.get(24..24 + ciphertext_len).ok_or_else(|| HostError::MalformedPacket("truncated ciphertext".into()))?;

    let iv = seq_to_iv(seq);
    let plaintext = crypto::aes_decrypt_gcm(ciphertext, key, &tag, &iv)?;

    if plaintext.len() < 2 {
        return Err(HostError::MalformedPacket("inner message too short for type field".into()));
    }
    let inner_type = u16::from_le_bytes(plaintext[0..2].try_into().unwrap());
    let packet_type = PacketType::from_u16(inner_type).ok_or_else(|| HostError::MalformedPacket(format!("unknown inner type 0x{inner_type:04x}")))?;

    Ok((seq, ControlMessage { packet_type, payload: plaintext }))
}

fn seq_to_iv(seq: u32) -> [u8; AES_IV_LEN] {
    let mut iv = [0u8; AES_IV_LEN];
    iv[0..4].copy_from_slice(&seq.to_le_bytes());
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_start_a() {
        let key = [0xABu8; AES_KEY_LEN];
        let mut payload = (PacketType::StartA as u16).to_le_bytes().to_vec();
        payload.extend_from_slice(b"extra");

        let frame = encrypt_packet(&key, 7, &payload);
        let (seq, msg) = decrypt_packet(&key, &frame).unwrap();

        assert_eq!(seq, 7);
        assert_eq!(msg.packet_type, PacketType::StartA);
        assert_eq!(msg.payload, payload);
    }

    #[test]
    fn unknown_header_type_rejected() {
        let mut frame = vec![0u8; 30];
        frame[0..2].copy_from_slice(&0x0002u16.to_le_bytes());
        let key = [0u8; AES_KEY_LEN];
        assert!(decrypt_packet(&key, &frame).is_err());
    }

    #[test]
    fn concrete_vector_seq1() {
        let key = {
            let bytes = crypto::hex_to_bytes("EDF04A215C4FBEA20934120C8480D855", false);
            let mut k = [0u8; 16];
            k.copy_from_slice(&bytes);
            k
        };
        let frame = hex::decode("010019000100000021DBB8DC0590AF3A2B20BCE5A347DE31D366E5B9C5").unwrap();
        let (seq, msg) = decrypt_packet(&key, &frame).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(hex::encode(&msg.payload), "0703010000");
    }

    #[test]
    fn concrete_vector_seq2() {
        let key = {
            let bytes = crypto::hex_to_bytes("EDF04A215C4FBEA20934120C8480D855", false);
            let mut k = [0u8; 16];
            k.copy_from_slice(&bytes);
            k
        };
        let frame = hex::decode("0100200002000000220722FBADED58A03F2E8898F0F1DCB7C93F6235590618E4186AD990").unwrap();
        let (seq, msg) = decrypt_packet(&key, &frame).unwrap();
        assert_eq!(seq, 2);
        assert_eq!(hex::encode(&msg.payload), "000208000400000000000000");
    }
}
