//! Shared host state: the data model from `state/data-structures.hpp`,
//! rebuilt around `ArcSwap` copy-on-write snapshots in place of
//! `immer::atom`/`immer::vector`.

pub mod config;
pub mod pair;
pub mod session;

use serde::{Deserialize, Serialize};

/// Standard Moonlight/GameStream port offsets, matching
/// `STANDARD_PORTS_MAPPING`: every listener and per-session port is
/// `base_port` plus (or minus) one of these, never an absolute value, so a
/// host running on a non-default `base_port` still gets a consistent,
/// non-colliding layout.
pub mod ports {
    pub const DEFAULT_BASE_PORT: u16 = 47989;
    pub const VIDEO_RTP_OFFSET: u16 = 9;
    pub const CONTROL_OFFSET: u16 = 10;
    pub const AUDIO_RTP_OFFSET: u16 = 11;
    pub const RTSP_OFFSET: u16 = 21;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Speaker {
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    BackLeft,
    BackRight,
    SideLeft,
    SideRight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioMode {
    pub channels: u8,
    pub streams: u8,
    pub coupled_streams: u8,
    pub speakers: Vec<Speaker>,
}

/// A polymorphic app launch target: a bare command, a container, or a
/// nested child session. Each variant carries its own parameters and is
/// expected to be driven by a `run(session_context)` entry point
/// implemented in the host binary (the virtual-device/process layer is
/// outside this crate's scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Runner {
    Process { command: Vec<String>, working_dir: Option<String> },
    Container { image: String, mounts: Vec<(String, String)> },
    ChildSession { parent_session_id: session::SessionId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub title: String,
    pub id: u32,
    pub support_hdr: bool,
    pub runner: Runner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub display_modes: Vec<DisplayMode>,
    pub audio_modes: Vec<AudioMode>,
    pub external_ip: String,
    pub internal_ip: String,
    pub mac_address: String,
}

/// Forced controller personality override; the position in
/// `PairedClient::controllers_override` denotes the controller number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControllerType {
    Xbox,
    Ps,
    Nintendo,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedClient {
    /// The raw signature bytes extracted from the client's X.509
    /// certificate; used as the persistence key so re-pairing a client
    /// whose cert is unchanged is idempotent.
    pub client_cert_signature: Vec<u8>,
    pub client_cert_pem: String,
    pub app_state_folder: String,
    pub run_uid: u32,
    pub run_gid: u32,
    /// Forced controller overrides; position in the list is the controller
    /// number.
    pub controllers_override: Vec<ControllerType>,
    /// Values above 1.0 speed the axis up, between 0.0 and 1.0 slow it down.
    pub mouse_acceleration: f32,
    pub v_scroll_acceleration: f32,
    pub h_scroll_acceleration: f32,
}
