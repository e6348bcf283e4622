//! Crypto primitives used by pairing, the control channel and the RTP
//! packetizer: AES-CBC/GCM, SHA-256, RSA signatures, and X.509 certificate
//! handling. Key and IV sizes are fixed at 128 bits / 16 bytes throughout.

use aes::Aes128;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::AesGcm;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use der::{Decode, DecodePem, Encode};
use rand::rngs::OsRng;
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use x509_cert::Certificate;

use crate::error::{HResult, HostError};

pub const AES_KEY_LEN: usize = 16;
pub const AES_IV_LEN: usize = 16;
pub const GCM_TAG_LEN: usize = 16;

/// The control channel's AES-GCM uses a 16-byte IV (seq || 12 zero bytes),
/// not the usual 12-byte nonce, to match the on-wire control packet format.
type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Nonce = aes_gcm::aead::generic_array::GenericArray<u8, U16>;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES-128-CBC encrypt. When `pad` is false the plaintext must already be a
/// multiple of the block size.
pub fn aes_encrypt_cbc(plaintext: &[u8], key: &[u8; AES_KEY_LEN], iv: &[u8; AES_IV_LEN], pad: bool) -> Vec<u8> {
    let enc = Aes128CbcEnc::new(key.into(), iv.into());
    if pad {
        enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    } else {
        enc.encrypt_padded_vec_mut::<NoPadding>(plaintext)
    }
}

/// AES-128-CBC decrypt, inverse of [`aes_encrypt_cbc`].
pub fn aes_decrypt_cbc(ciphertext: &[u8], key: &[u8; AES_KEY_LEN], iv: &[u8; AES_IV_LEN], pad: bool) -> HResult<Vec<u8>> {
    let dec = Aes128CbcDec::new(key.into(), iv.into());
    let out = if pad {
        dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    } else {
        dec.decrypt_padded_vec_mut::<NoPadding>(ciphertext)
    };
    out.map_err(|_| HostError::MalformedPacket("bad CBC padding".into()))
}

/// AES-128-GCM encrypt. Returns `(ciphertext, tag)`, tag always 16 bytes.
pub fn aes_encrypt_gcm(plaintext: &[u8], key: &[u8; AES_KEY_LEN], iv: &[u8; AES_IV_LEN]) -> (Vec<u8>, [u8; GCM_TAG_LEN]) {
    let cipher = Aes128Gcm16::new(key.into());
    let nonce = Nonce::from_slice(iv);
    let mut out = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
        .expect("gcm encryption cannot fail for valid key/nonce sizes");
    let tag_bytes: Vec<u8> = out.split_off(out.len() - GCM_TAG_LEN);
    let mut tag = [0u8; GCM_TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    (out, tag)
}

/// AES-128-GCM decrypt. Fails with [`HostError::BadTag`] if authentication
/// fails, never revealing which byte differed.
pub fn aes_decrypt_gcm(
    ciphertext: &[u8],
    key: &[u8; AES_KEY_LEN],
    tag: &[u8; GCM_TAG_LEN],
    iv: &[u8; AES_IV_LEN],
) -> HResult<Vec<u8>> {
    let cipher = Aes128Gcm16::new(key.into());
    let nonce = Nonce::from_slice(iv);
    let mut combined = Vec::with_capacity(ciphertext.len() + GCM_TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    cipher
        .decrypt(nonce, Payload { msg: &combined, aad: &[] })
        .map_err(|_| HostError::BadTag)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode_upper(sha256(data))
}

/// Parses a hex string into bytes, skipping non-hex characters and reading
/// digit pairs left to right, so `hex_to_bytes(&bytes_to_hex(b), false) == b`
/// for any `b`. `reverse` additionally flips the resulting byte order, for
/// the wire fields some clients send byte-reversed.
pub fn hex_to_bytes(hex: &str, reverse: bool) -> Vec<u8> {
    let digits: Vec<u32> = hex.chars().filter_map(|c| c.to_digit(16)).collect();
    let mut buf: Vec<u8> = digits.chunks_exact(2).map(|pair| ((pair[0] as u8) << 4) | pair[1] as u8).collect();
    if reverse {
        buf.reverse();
    }
    buf
}

pub fn bytes_to_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Sign `msg` with a pre-hashed SHA-256 digest under PKCS#1 v1.5 padding.
/// (original_source calls the generic `EVP_DigestSign`, which for an RSA
/// key defaults to PKCS#1 v1.5 — see DESIGN.md.)
pub fn sign(msg: &[u8], private_key: &RsaPrivateKey) -> HResult<Vec<u8>> {
    let digest = sha256(msg);
    private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(HostError::from)
}

pub fn verify(msg: &[u8], signature: &[u8], public_key: &RsaPublicKey) -> bool {
    let digest = sha256(msg);
    public_key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature).is_ok()
}

pub fn generate_rsa_keypair() -> HResult<(RsaPrivateKey, RsaPublicKey)> {
    let private_key = RsaPrivateKey::new(&mut OsRng, 2048).map_err(HostError::from)?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok((private_key, public_key))
}

pub fn generate_session_key() -> [u8; AES_KEY_LEN] {
    let mut key = [0u8; AES_KEY_LEN];
    rand::RngCore::fill_bytes(&mut OsRng, &mut key);
    key
}

/// The host's long-lived X.509 identity: `C=IT, O=GamesOnWhales, CN=localhost`,
/// serial 1, 20-year validity, SHA-256 self-signature — matching the wire
/// fixture every Moonlight client expects to see.
pub struct HostCertificate {
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
    pub cert_pem: String,
    pub key_pem: String,
    /// DER encodings, handed to the TLS layer directly so it never has to
    /// re-parse the PEM text this struct also carries for the pairing XML.
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

impl HostCertificate {
    pub fn generate() -> HResult<Self> {
        use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
        use std::time::{Duration, SystemTime};

        let (private_key, public_key) = generate_rsa_keypair()?;
        let pkcs8_der = private_key
            .to_pkcs8_der()
            .map_err(|e| HostError::Crypto(e.to_string()))?;
        let key_pair = KeyPair::try_from(pkcs8_der.as_bytes()).map_err(|e| HostError::Crypto(e.to_string()))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, "IT");
        dn.push(DnType::OrganizationName, "GamesOnWhales");
        dn.push(DnType::CommonName, "localhost");
        params.distinguished_name = dn;
        params.serial_number = Some(1u64.into());
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = (SystemTime::now() + Duration::from_secs(630_720_000)).into();
        params.subject_alt_names = vec![SanType::DnsName("localhost".try_into().unwrap())];

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| HostError::Crypto(e.to_string()))?;

        Ok(Self {
            private_key,
            public_key,
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            cert_der: cert.der().to_vec(),
            key_der: key_pair.serialize_der(),
        })
    }
}

/// Extracts the raw ASN.1 signature bits from a PEM certificate. The
/// protocol uses these bytes (not a subject-key fingerprint) as a peer's
/// identity fingerprint during pairing.
pub fn cert_signature_from_pem(pem: &str) -> HResult<Vec<u8>> {
    let cert = Certificate::from_pem(pem.as_bytes()).map_err(|e| HostError::Crypto(e.to_string()))?;
    Ok(cert.signature.raw_bytes().to_vec())
}

/// Same extraction as [`cert_signature_from_pem`], but for a certificate
/// already in raw DER form (e.g. the peer certificate `rustls` hands the TLS
/// layer) — skips the PEM round-trip entirely rather than re-armoring DER
/// bytes into a PEM body that was never base64 to begin with.
pub fn cert_signature_from_der(der: &[u8]) -> HResult<Vec<u8>> {
    let cert = Certificate::from_der(der).map_err(|e| HostError::Crypto(e.to_string()))?;
    Ok(cert.signature.raw_bytes().to_vec())
}

pub fn rsa_public_key_from_cert_pem(pem: &str) -> HResult<RsaPublicKey> {
    let cert = Certificate::from_pem(pem.as_bytes()).map_err(|e| HostError::Crypto(e.to_string()))?;
    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| HostError::Crypto(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| HostError::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_natural_order() {
        let bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let hex = bytes_to_hex(&bytes);
        assert_eq!(hex_to_bytes(&hex, false), bytes);
    }

    #[test]
    fn hex_to_bytes_reverse_true_flips_order() {
        let hex = "DEADBEEF";
        let natural = hex_to_bytes(hex, false);
        let reversed = hex_to_bytes(hex, true);
        let mut expect_reversed = natural.clone();
        expect_reversed.reverse();
        assert_eq!(reversed, expect_reversed);
    }

    #[test]
    fn gcm_roundtrip() {
        let key = [0x11u8; AES_KEY_LEN];
        let iv = [0x22u8; AES_IV_LEN];
        let msg = b"hello control channel";
        let (ct, tag) = aes_encrypt_gcm(msg, &key, &iv);
        let pt = aes_decrypt_gcm(&ct, &key, &tag, &iv).unwrap();
        assert_eq!(pt, msg);
    }

    #[test]
    fn gcm_bad_tag_rejected() {
        let key = [0x11u8; AES_KEY_LEN];
        let iv = [0x22u8; AES_IV_LEN];
        let (ct, mut tag) = aes_encrypt_gcm(b"payload", &key, &iv);
        tag[0] ^= 0xff;
        assert!(aes_decrypt_gcm(&ct, &key, &tag, &iv).is_err());
    }

    #[test]
    fn concrete_control_vector_seq0() {
        let key_hex = "EDF04A215C4FBEA20934120C8480D855";
        let key_bytes = hex_to_bytes(key_hex, false);
        let mut key = [0u8; 16];
        key.copy_from_slice(&key_bytes);

        let packet = hex::decode("01001A0000000000BF0EB6DA10E47C702EC8644EB87D9CF7B6FAC9FF75CA").unwrap();
        let seq = u32::from_le_bytes(packet[4..8].try_into().unwrap());
        let tag: [u8; 16] = packet[8..24].try_into().unwrap();
        let ciphertext = &packet[24..];

        let mut iv = [0u8; 16];
        iv[0..4].copy_from_slice(&seq.to_le_bytes());

        let plaintext = aes_decrypt_gcm(ciphertext, &key, &tag, &iv).unwrap();
        assert_eq!(hex::encode(plaintext), "020302000000");
    }

    #[test]
    fn cbc_roundtrip_padded() {
        let key = [0x33u8; AES_KEY_LEN];
        let iv = [0x44u8; AES_IV_LEN];
        let msg = b"not block aligned!";
        let ct = aes_encrypt_cbc(msg, &key, &iv, true);
        let pt = aes_decrypt_cbc(&ct, &key, &iv, true).unwrap();
        assert_eq!(pt, msg);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let (sk, pk) = generate_rsa_keypair().unwrap();
        let msg = b"server secret";
        let sig = sign(msg, &sk).unwrap();
        assert!(verify(msg, &sig, &pk));
        assert!(!verify(b"tampered", &sig, &pk));
    }
}
