//! Host configuration: load/save and the paired-client set's copy-on-write
//! discipline (`ArcSwap` in place of `immer::atom`).

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::{App, PairedClient};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub hostname: String,
    pub uuid: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default)]
    pub support_hevc: bool,
    #[serde(default)]
    pub support_av1: bool,
    #[serde(default)]
    pub paired_clients: Vec<PairedClient>,
    #[serde(default)]
    pub apps: Vec<App>,
}

fn default_base_port() -> u16 {
    47989
}

/// Live, in-memory configuration. `paired_clients` is the one field every
/// HTTPS request reads and only a completed pairing writes: readers take
/// an `Arc` snapshot via `load()`, writers swap in a new `Arc` built from
/// the previous snapshot plus one addition.
pub struct Config {
    pub hostname: String,
    pub uuid: String,
    pub base_port: u16,
    pub support_hevc: bool,
    pub support_av1: bool,
    pub apps: Vec<App>,
    paired_clients: ArcSwap<Vec<PairedClient>>,
}

impl Config {
    pub fn from_file(file: ConfigFile) -> Self {
        Self {
            hostname: file.hostname,
            uuid: file.uuid,
            base_port: file.base_port,
            support_hevc: file.support_hevc,
            support_av1: file.support_av1,
            apps: file.apps,
            paired_clients: ArcSwap::from_pointee(file.paired_clients),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&contents)?;
        Ok(Self::from_file(file))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = ConfigFile {
            hostname: self.hostname.clone(),
            uuid: self.uuid.clone(),
            base_port: self.base_port,
            support_hevc: self.support_hevc,
            support_av1: self.support_av1,
            paired_clients: self.paired_clients_snapshot().as_ref().clone(),
            apps: self.apps.clone(),
        };
        let contents = toml::to_string_pretty(&file)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn paired_clients_snapshot(&self) -> Arc<Vec<PairedClient>> {
        self.paired_clients.load_full()
    }

    pub fn is_paired(&self, cert_signature: &[u8]) -> bool {
        self.paired_clients_snapshot().iter().any(|c| c.client_cert_signature == cert_signature)
    }

    /// Adds a newly-paired client, evicting any prior entry with the same
    /// certificate signature first (re-pairing is idempotent, not additive).
    pub fn add_paired_client(&self, client: PairedClient) {
        let previous = self.paired_clients_snapshot();
        let mut next: Vec<PairedClient> = previous.iter().filter(|c| c.client_cert_signature != client.client_cert_signature).cloned().collect();
        next.push(client);
        self.paired_clients.store(Arc::new(next));
    }

    pub fn remove_paired_client(&self, cert_signature: &[u8]) {
        let previous = self.paired_clients_snapshot();
        let next: Vec<PairedClient> = previous.iter().filter(|c| c.client_cert_signature != cert_signature).cloned().collect();
        self.paired_clients.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client(sig: u8) -> PairedClient {
        PairedClient {
            client_cert_signature: vec![sig],
            client_cert_pem: String::new(),
            app_state_folder: String::new(),
            run_uid: 1000,
            run_gid: 1000,
            controllers_override: Vec::new(),
            mouse_acceleration: 1.0,
            v_scroll_acceleration: 1.0,
            h_scroll_acceleration: 1.0,
        }
    }

    #[test]
    fn re_pairing_evicts_previous_entry() {
        let config = Config::from_file(ConfigFile {
            hostname: "test".into(),
            uuid: "uid".into(),
            base_port: 47989,
            support_hevc: false,
            support_av1: false,
            paired_clients: vec![],
            apps: vec![],
        });

        config.add_paired_client(sample_client(1));
        config.add_paired_client(sample_client(1));

        assert_eq!(config.paired_clients_snapshot().len(), 1);
        assert!(config.is_paired(&[1]));
    }
}
