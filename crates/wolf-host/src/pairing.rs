//! The 4-phase PIN pairing ceremony (C3), dispatched by `/pair` based on
//! which query parameters are present. Response tag names (`plaincert`,
//! `challengeresponse`, `pairingsecret`, `paired`) follow the Moonlight/GFE
//! pairing protocol's established field names.

use std::net::IpAddr;

use uuid::Uuid;
use wolf_common::crypto;
use wolf_common::state::pair::PinResolution;
use wolf_common::state::PairedClient;

use crate::state::AppState;
use crate::xml::XmlBuilder;

/// All pairing CBC exchanges use a zero IV; the key itself never repeats
/// across sessions since it is re-derived from a fresh salt each time.
const PAIRING_IV: [u8; 16] = [0u8; 16];

pub struct Phase1Request<'a> {
    pub client_ip: IpAddr,
    pub salt_hex: &'a str,
    pub client_cert_hex: &'a str,
}

pub async fn phase1_get_server_cert(state: &AppState, req: Phase1Request<'_>) -> String {
    let salt = crypto::hex_to_bytes(req.salt_hex, false);
    let client_cert_pem = match String::from_utf8(crypto::hex_to_bytes(req.client_cert_hex, false)) {
        Ok(pem) => pem,
        Err(_) => return XmlBuilder::new(400).element("paired", 0).finish(),
    };

    state.pairing.begin(req.client_ip);

    let pair_secret = Uuid::new_v4().to_string();
    let rx = state.pairing.await_pin(pair_secret, req.client_ip);

    let pin = match rx.await {
        Ok(PinResolution::Pin(pin)) => pin,
        Ok(PinResolution::Cancelled) | Err(_) => {
            state.pairing.evict(req.client_ip);
            return XmlBuilder::new(200).element("paired", 0).finish();
        }
    };

    let aes_key = wolf_common::state::pair::derive_pairing_key(&salt, &pin);
    let mut server_secret = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut server_secret);

    let result = state.pairing.with_cache(req.client_ip, |cache| {
        cache.client_cert_pem = Some(client_cert_pem);
        cache.aes_key = Some(aes_key);
        cache.server_secret = Some(server_secret.to_vec());
    });
    if result.is_err() {
        return XmlBuilder::new(200).element("paired", 0).finish();
    }

    let cert_hex = crypto::bytes_to_hex(state.host_cert.cert_pem.as_bytes());
    XmlBuilder::new(200).element("paired", 1).element("plaincert", cert_hex).finish()
}

pub fn phase2_client_challenge(state: &AppState, client_ip: IpAddr, challenge_hex: &str) -> String {
    let outcome = state.pairing.with_cache(client_ip, |cache| {
        let aes_key = cache.aes_key.ok_or(())?;
        let server_secret = cache.server_secret.clone().ok_or(())?;

        let encrypted = crypto::hex_to_bytes(challenge_hex, false);
        let decrypted = crypto::aes_decrypt_cbc(&encrypted, &aes_key, &PAIRING_IV, false).map_err(|_| ())?;

        let server_cert_signature = crypto::cert_signature_from_pem(&state.host_cert.cert_pem).map_err(|_| ())?;

        let mut hash_input = Vec::new();
        hash_input.extend_from_slice(&decrypted);
        hash_input.extend_from_slice(&server_cert_signature);
        hash_input.extend_from_slice(&server_secret);
        let hash = crypto::sha256(&hash_input);

        let mut server_challenge = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut server_challenge);
        cache.server_challenge = Some(server_challenge.to_vec());

        let mut response_plain = Vec::with_capacity(32 + 16 + 16);
        response_plain.extend_from_slice(&hash);
        response_plain.extend_from_slice(&server_cert_signature[..16]);
        response_plain.extend_from_slice(&server_challenge);

        Ok::<Vec<u8>, ()>(crypto::aes_encrypt_cbc(&response_plain, &aes_key, &PAIRING_IV, false))
    });

    match outcome {
        Ok(Ok(encrypted_response)) => {
            XmlBuilder::new(200).element("paired", 1).element("challengeresponse", crypto::bytes_to_hex(&encrypted_response)).finish()
        }
        _ => {
            state.pairing.evict(client_ip);
            XmlBuilder::new(200).element("paired", 0).finish()
        }
    }
}

pub fn phase3_server_challenge_resp(state: &AppState, client_ip: IpAddr, challenge_resp_hex: &str) -> String {
    let outcome = state.pairing.with_cache(client_ip, |cache| {
        let aes_key = cache.aes_key.ok_or(())?;
        let server_secret = cache.server_secret.clone().ok_or(())?;

        let encrypted = crypto::hex_to_bytes(challenge_resp_hex, false);
        let decrypted = crypto::aes_decrypt_cbc(&encrypted, &aes_key, &PAIRING_IV, false).map_err(|_| ())?;
        cache.client_hash = Some(decrypted);

        let signature = crypto::sign(&server_secret, &state.host_cert.private_key).map_err(|_| ())?;
        let mut pairing_secret = Vec::with_capacity(server_secret.len() + signature.len());
        pairing_secret.extend_from_slice(&server_secret);
        pairing_secret.extend_from_slice(&signature);
        Ok::<Vec<u8>, ()>(pairing_secret)
    });

    match outcome {
        Ok(Ok(pairing_secret)) => XmlBuilder::new(200).element("paired", 1).element("pairingsecret", crypto::bytes_to_hex(&pairing_secret)).finish(),
        _ => {
            state.pairing.evict(client_ip);
            XmlBuilder::new(200).element("paired", 0).finish()
        }
    }
}

pub fn phase4_client_pairing_secret(state: &AppState, client_ip: IpAddr, client_pairing_secret_hex: &str) -> String {
    let outcome = state.pairing.with_cache(client_ip, |cache| {
        let server_challenge = cache.server_challenge.clone().ok_or(())?;
        let client_hash = cache.client_hash.clone().ok_or(())?;
        let client_cert_pem = cache.client_cert_pem.clone().ok_or(())?;

        let blob = crypto::hex_to_bytes(client_pairing_secret_hex, false);
        if blob.len() < 16 {
            return Err(());
        }
        let (client_secret, client_signature) = blob.split_at(16);

        let client_public_key = crypto::rsa_public_key_from_cert_pem(&client_cert_pem).map_err(|_| ())?;
        if !crypto::verify(client_secret, client_signature, &client_public_key) {
            return Err(());
        }

        let client_cert_signature = crypto::cert_signature_from_pem(&client_cert_pem).map_err(|_| ())?;
        let mut expected_input = Vec::new();
        expected_input.extend_from_slice(&server_challenge);
        expected_input.extend_from_slice(&client_cert_signature);
        expected_input.extend_from_slice(client_secret);
        let expected = crypto::sha256(&expected_input);

        if !constant_time_eq(&expected, &client_hash) {
            return Err(());
        }

        Ok::<(Vec<u8>, String), ()>((client_cert_signature, client_cert_pem))
    });

    match outcome {
        Ok(Ok((client_cert_signature, client_cert_pem))) => {
            state.config.add_paired_client(PairedClient {
                client_cert_signature,
                client_cert_pem,
                app_state_folder: String::new(),
                run_uid: 1000,
                run_gid: 1000,
                controllers_override: Vec::new(),
                mouse_acceleration: 1.0,
                v_scroll_acceleration: 1.0,
                h_scroll_acceleration: 1.0,
            });
            state.pairing.evict(client_ip);
            XmlBuilder::new(200).element("paired", 1).finish()
        }
        _ => {
            state.pairing.evict(client_ip);
            XmlBuilder::new(200).element("paired", 0).finish()
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
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
        AppState::new(config, host, crypto::HostCertificate::generate().unwrap())
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_length() {
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2]));
    }

    #[test]
    fn constant_time_eq_accepts_identical_bytes() {
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
    }

    #[test]
    fn phase2_without_a_prior_phase1_reports_unpaired() {
        let state = test_state();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let xml = phase2_client_challenge(&state, ip, "00");
        assert!(xml.contains("<paired>0</paired>"));
    }

    #[test]
    fn phase4_with_garbage_secret_reports_unpaired_and_does_not_pair() {
        let state = test_state();
        let ip: IpAddr = "10.0.0.6".parse().unwrap();
        state.pairing.begin(ip);
        state.pairing.with_cache(ip, |c| {
            c.server_challenge = Some(vec![0u8; 16]);
            c.client_hash = Some(vec![0u8; 32]);
            c.client_cert_pem = Some(state.host_cert.cert_pem.clone());
        }).unwrap();

        let xml = phase4_client_pairing_secret(&state, ip, "00");
        assert!(xml.contains("<paired>0</paired>"));
        assert!(state.config.paired_clients_snapshot().is_empty());
    }
}
