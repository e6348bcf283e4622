//! Process-wide shared state, bundling everything the HTTP, RTSP, control
//! and management surfaces read and write.

use wolf_common::crypto::HostCertificate;
use wolf_common::events::EventBus;
use wolf_common::state::config::Config;
use wolf_common::state::pair::PairingState;
use wolf_common::state::session::SessionRegistry;
use wolf_common::state::Host;

pub struct AppState {
    pub config: Config,
    pub host: Host,
    pub host_cert: HostCertificate,
    pub pairing: PairingState,
    pub sessions: SessionRegistry,
    pub events: EventBus,
}

impl AppState {
    pub fn new(config: Config, host: Host, host_cert: HostCertificate) -> Self {
        Self { config, host, host_cert, pairing: PairingState::new(), sessions: SessionRegistry::new(), events: EventBus::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wolf_common::state::config::ConfigFile;

    #[test]
    fn new_bundles_fresh_pairing_and_session_state() {
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
        let state = AppState::new(config, host, HostCertificate::generate().unwrap());

        assert!(state.config.paired_clients_snapshot().is_empty());
        assert!(state.sessions.lookup_by_ip("10.0.0.1".parse().unwrap()).is_none());
    }
}
