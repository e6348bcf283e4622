//! The PIN-pairing state machine: `GetServerCert -> ClientChallenge ->
//! ServerChallengeResp -> ClientPairingSecret`, with an ephemeral
//! `PairCache` keyed by client IP and an async wait for the PIN resolved
//! by the management API (`state/data-structures.hpp::PairCache`/
//! `PairSignal`).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::crypto;
use crate::error::{HResult, HostError};

/// A PIN resolution: either the human-entered PIN, or a distinguished
/// cancellation value. The promise is always resolved, never dropped, so
/// a waiting phase-1 task can tell "revoked" apart from "channel closed".
#[derive(Debug, Clone)]
pub enum PinResolution {
    Pin(String),
    Cancelled,
}

/// Per-client-IP state accumulated across the four pairing phases.
pub struct PairCache {
    pub client_cert_pem: Option<String>,
    pub aes_key: Option<[u8; 16]>,
    pub server_secret: Option<Vec<u8>>,
    pub server_challenge: Option<Vec<u8>>,
    pub client_hash: Option<Vec<u8>>,
}

impl PairCache {
    fn new() -> Self {
        Self { client_cert_pem: None, aes_key: None, server_secret: None, server_challenge: None, client_hash: None }
    }
}

/// One outstanding "waiting for a human to enter the PIN" request, surfaced
/// to the management API as `{pair_secret, pin_or_ip}`.
pub struct PendingPin {
    pub pair_secret: String,
    pub client_ip: IpAddr,
    sender: Option<oneshot::Sender<PinResolution>>,
}

/// The pairing subsystem's mutable state: the per-IP cache plus any PIN
/// waits in flight. Accessed serially per client IP (one pairing task per
/// IP at a time), so a plain mutex is sufficient here — unlike the
/// paired-client set this is not read on every HTTPS request.
#[derive(Default)]
pub struct PairingState {
    caches: Mutex<HashMap<IpAddr, PairCache>>,
    pending: Mutex<HashMap<String, PendingPin>>,
}

impl PairingState {
    pub fn new() -> Self {
        Self { caches: Mutex::new(HashMap::new()), pending: Mutex::new(HashMap::new()) }
    }

    /// Starts or restarts the state machine for `client_ip`. A phase-1
    /// request for an already-cached IP evicts the old cache first.
    pub fn begin(&self, client_ip: IpAddr) {
        self.caches.lock().unwrap().insert(client_ip, PairCache::new());
    }

    pub fn with_cache<R>(&self, client_ip: IpAddr, f: impl FnOnce(&mut PairCache) -> R) -> HResult<R> {
        let mut caches = self.caches.lock().unwrap();
        let cache = caches.get_mut(&client_ip).ok_or(HostError::PairingCheckFailed)?;
        Ok(f(cache))
    }

    pub fn evict(&self, client_ip: IpAddr) {
        self.caches.lock().unwrap().remove(&client_ip);
    }

    /// Registers a wait for a PIN and returns the receiver half. The
    /// management API resolves it by `pair_secret` via `submit_pin` or
    /// `cancel`.
    pub fn await_pin(&self, pair_secret: String, client_ip: IpAddr) -> oneshot::Receiver<PinResolution> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(pair_secret.clone(), PendingPin { pair_secret, client_ip, sender: Some(tx) });
        rx
    }

    pub fn list_pending(&self) -> Vec<(String, IpAddr)> {
        self.pending.lock().unwrap().values().map(|p| (p.pair_secret.clone(), p.client_ip)).collect()
    }

    pub fn submit_pin(&self, pair_secret: &str, pin: String) -> bool {
        self.resolve(pair_secret, PinResolution::Pin(pin))
    }

    pub fn cancel(&self, pair_secret: &str) -> bool {
        self.resolve(pair_secret, PinResolution::Cancelled)
    }

    fn resolve(&self, pair_secret: &str, resolution: PinResolution) -> bool {
        let mut pending = self.pending.lock().unwrap();
        if let Some(entry) = pending.get_mut(pair_secret) {
            if let Some(sender) = entry.sender.take() {
                let _ = sender.send(resolution);
                pending.remove(pair_secret);
                return true;
            }
        }
        false
    }
}

/// Derives the shared AES key from the salt (first 16 bytes) and the PIN,
/// per Moonlight's salted-SHA-256 scheme: `key = SHA256(salt || pin)[0..16]`.
pub fn derive_pairing_key(salt: &[u8], pin: &str) -> [u8; 16] {
    let mut input = Vec::with_capacity(salt.len() + pin.len());
    input.extend_from_slice(salt);
    input.extend_from_slice(pin.as_bytes());
    let digest = crypto::sha256(&input);
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_after_begin_evicts_old_cache() {
        let state = PairingState::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        state.begin(ip);
        state.with_cache(ip, |c| c.aes_key = Some([1u8; 16])).unwrap();
        state.begin(ip);
        let has_key = state.with_cache(ip, |c| c.aes_key.is_some()).unwrap();
        assert!(!has_key);
    }

    #[tokio::test]
    async fn pin_submission_resolves_the_waiter() {
        let state = PairingState::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let rx = state.await_pin("secret-1".into(), ip);

        assert!(state.submit_pin("secret-1", "1234".into()));
        match rx.await.unwrap() {
            PinResolution::Pin(pin) => assert_eq!(pin, "1234"),
            PinResolution::Cancelled => panic!("expected Pin"),
        }
    }

    #[tokio::test]
    async fn cancel_resolves_with_cancelled() {
        let state = PairingState::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let rx = state.await_pin("secret-2".into(), ip);

        assert!(state.cancel("secret-2"));
        assert!(matches!(rx.await.unwrap(), PinResolution::Cancelled));
    }
}
