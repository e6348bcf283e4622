//! Reed-Solomon GF(2^8) forward error correction, used by both the audio
//! and video RTP pipelines. Grounded on the shard-group shape used by
//! moonshine's video packetizer (`reed_solomon_erasure::galois_8`).

use reed_solomon_erasure::galois_8::ReedSolomon;
use reed_solomon_erasure::Error as RsError;

pub const AUDIO_DATA_SHARDS: usize = 4;
pub const AUDIO_FEC_SHARDS: usize = 2;

/// `fec_shards = max(min_required, ceil(data_shards * fec_percentage / 100))`,
/// the rounding rule used for the video pipeline's shard count.
pub fn video_fec_shard_count(data_shards: usize, fec_percentage: u8, min_required_fec_packets: usize) -> usize {
    let computed = (data_shards * fec_percentage as usize).div_ceil(100);
    computed.max(min_required_fec_packets)
}

/// Encodes `shards` in place: the leading `data_shards` entries are left
/// untouched, the trailing `parity_shards` entries are filled with parity.
/// All shards must be the same length.
pub fn encode(shards: &mut [Vec<u8>], data_shards: usize, parity_shards: usize) -> Result<(), RsError> {
    let rs = ReedSolomon::new(data_shards, parity_shards)?;
    rs.encode(shards)
}

/// Reconstructs any missing shards (`None` entries) given at least
/// `data_shards` present entries out of `data_shards + parity_shards`.
pub fn reconstruct(shards: &mut [Option<Vec<u8>>], data_shards: usize, parity_shards: usize) -> Result<(), RsError> {
    let rs = ReedSolomon::new(data_shards, parity_shards)?;
    rs.reconstruct(shards)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_fec_recovers_from_two_losses() {
        let shard_size = 16;
        let mut shards: Vec<Vec<u8>> = (0..AUDIO_DATA_SHARDS)
            .map(|i| vec![i as u8; shard_size])
            .chain((0..AUDIO_FEC_SHARDS).map(|_| vec![0u8; shard_size]))
            .collect();

        encode(&mut shards, AUDIO_DATA_SHARDS, AUDIO_FEC_SHARDS).unwrap();

        let original_data: Vec<Vec<u8>> = shards[..AUDIO_DATA_SHARDS].to_vec();

        let mut with_loss: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        with_loss[0] = None;
        with_loss[2] = None;

        reconstruct(&mut with_loss, AUDIO_DATA_SHARDS, AUDIO_FEC_SHARDS).unwrap();

        for i in 0..AUDIO_DATA_SHARDS {
            assert_eq!(with_loss[i].as_ref().unwrap(), &original_data[i]);
        }
    }

    #[test]
    fn video_fec_shard_rounding() {
        assert_eq!(video_fec_shard_count(10, 20, 1), 2);
        assert_eq!(video_fec_shard_count(10, 5, 2), 2);
        assert_eq!(video_fec_shard_count(3, 50, 1), 2);
    }
}
