//! Error kinds shared across the host, mirroring the disposition table in
//! the protocol design (log-and-drop vs fatal vs client-visible).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gcm authentication failed")]
    BadTag,

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("pairing check failed")]
    PairingCheckFailed,

    #[error("client is not paired")]
    UnpairedClient,

    #[error("unknown session")]
    UnknownSession,

    #[error("a session for this client is already active")]
    SessionAlreadyActive,

    #[error("runner process crashed: {0}")]
    RunnerCrashed(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("no ports available")]
    PortExhausted,
}

impl From<rsa::Error> for HostError {
    fn from(e: rsa::Error) -> Self {
        HostError::Crypto(e.to_string())
    }
}

impl From<aes_gcm::Error> for HostError {
    fn from(_: aes_gcm::Error) -> Self {
        HostError::BadTag
    }
}

pub type Result<T> = anyhow::Result<T>;
pub type HResult<T> = std::result::Result<T, HostError>;
