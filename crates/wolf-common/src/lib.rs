//! Wolf Host Common Library
//!
//! Shared functionality for the Moonlight-compatible game-streaming host:
//! - Cryptography (AES-CBC/GCM, RSA, SHA-256, X.509 certificates)
//! - Forward error correction (Reed-Solomon)
//! - Wire packet formats (control channel, RTP, input)
//! - Host state (configuration, pairing, session registry)
//! - The internal event bus
//! - The virtual input/audio device capability interface

pub mod crypto;
pub mod devices;
pub mod error;
pub mod events;
pub mod fec;
pub mod packet;
pub mod state;

pub use error::{HResult, HostError, Result};
