//! (De)serializable application configuration.
//!
//! The configuration file is YAML. It holds the run metadata written to the
//! run table, plus the network, timing, and filesystem settings the envoys
//! need. Every section except the run metadata has defaults, so a minimal
//! file only needs the experiment name and run number.

use crate::constants::{
    Topology, ADDRESS_START, DATA_EXPORTER_LISTENER_PORT, DATA_ROUTER_LISTENER_PORT,
    ECC_URL_PORT, HOST_OFFSET, NUMBER_OF_MODULES, SENTRY_PORT, SURVEYOR_URL_PORT,
};
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Addresses and ports of the DAQ network
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub address_prefix: String,
    pub host_offset: usize,
    pub number_of_modules: usize,
    pub ecc_port: u16,
    pub surveyor_port: u16,
    pub sentry_port: u16,
    pub data_router_port: u16,
    pub data_exporter_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address_prefix: String::from(ADDRESS_START),
            host_offset: HOST_OFFSET,
            number_of_modules: NUMBER_OF_MODULES,
            ecc_port: ECC_URL_PORT,
            surveyor_port: SURVEYOR_URL_PORT,
            sentry_port: SENTRY_PORT,
            data_router_port: DATA_ROUTER_LISTENER_PORT,
            data_exporter_port: DATA_EXPORTER_LISTENER_PORT,
        }
    }
}

impl NetworkConfig {
    /// Address of the ECC server for a module. The MuTaNT lives at `.1`.
    pub fn module_address(&self, id: usize, is_mutant: bool) -> String {
        if is_mutant {
            format!("{}.1", self.address_prefix)
        } else {
            self.router_address(id)
        }
    }

    /// Address of the DataRouter host paired with CoBo `id`
    pub fn router_address(&self, id: usize) -> String {
        format!("{}.{}", self.address_prefix, self.host_offset + id)
    }
}

/// Polling intervals and timeouts
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// How often the status envoys poll their servers
    pub status_interval_ms: u64,
    /// Request timeout for the ECC servers (matches the ECC server/client)
    pub ecc_timeout_secs: u64,
    /// Request timeout for the Surveyor pages
    pub surveyor_timeout_secs: u64,
    /// Request timeout for the Sentry API
    pub sentry_timeout_secs: u64,
    /// Connect and reply timeout for FRIBDAQ
    pub frib_timeout_secs: u64,
    /// Upper bound on any wait during a transition or run sequence
    pub transition_timeout_secs: u64,
    /// Spacing of rate graph points
    pub graph_interval_secs: u64,
    /// Number of points kept per rate graph
    pub graph_max_points: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: 2000,
            ecc_timeout_secs: 120,
            surveyor_timeout_secs: 10,
            sentry_timeout_secs: 120,
            frib_timeout_secs: 120,
            transition_timeout_secs: 300,
            graph_interval_secs: 2,
            graph_max_points: 10,
        }
    }
}

impl TimingConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn ecc_timeout(&self) -> Duration {
        Duration::from_secs(self.ecc_timeout_secs)
    }

    pub fn surveyor_timeout(&self) -> Duration {
        Duration::from_secs(self.surveyor_timeout_secs)
    }

    pub fn sentry_timeout(&self) -> Duration {
        Duration::from_secs(self.sentry_timeout_secs)
    }

    pub fn frib_timeout(&self) -> Duration {
        Duration::from_secs(self.frib_timeout_secs)
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_secs(self.transition_timeout_secs)
    }
}

/// Filesystem locations used by the run sequence
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathConfig {
    /// Directory holding the extension shell scripts
    pub script_dir: PathBuf,
    /// Shell used to run the extension scripts
    pub shell: String,
    /// Directory holding the ECC configuration files
    pub config_dir: PathBuf,
    /// Root directory for configuration backups
    pub backup_config_dir: PathBuf,
    /// Directory for the per-experiment run tables
    pub tables_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from("scripts"),
            shell: String::from("zsh"),
            config_dir: PathBuf::from("/Volumes/attpc/configs"),
            backup_config_dir: PathBuf::from("/Volumes/attpc/configs_backup"),
            tables_dir: PathBuf::from("tables"),
        }
    }
}

/// Which service watches the DataRouters
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Surveyor,
    #[default]
    Sentry,
}

/// FRIBDAQ run-control link
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FribConfig {
    pub address: String,
    pub control_port: u16,
    pub response_port: u16,
}

/// The application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvoyConfig {
    #[serde(skip)]
    pub path: PathBuf,

    pub experiment: String,
    pub run_number: i32,
    pub description: String,
    pub pressure: f32,
    pub v_thgem: f32,
    pub v_mm: f32,
    pub e_drift: f32,
    pub v_cathode: f32,
    pub e_trans: f32,
    pub gas: String,
    pub beam: String,
    pub energy: f32,
    pub magnetic_field: f32,

    /// Free-form run log entries
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Set when a run is started, cleared when it is stopped
    #[serde(default)]
    pub run_started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub paths: PathConfig,
    #[serde(default)]
    pub monitor: MonitorKind,
    #[serde(default)]
    pub frib: Option<FribConfig>,
}

impl Default for EnvoyConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("envoy.yml"),
            experiment: String::from("Exp"),
            run_number: 0,
            description: String::from("Write here"),
            pressure: 0.0,
            v_thgem: 0.0,
            v_mm: 0.0,
            e_drift: 0.0,
            v_cathode: 0.0,
            e_trans: 0.0,
            gas: String::from("H2"),
            beam: String::from("16C"),
            energy: 0.0,
            magnetic_field: 0.0,
            fields: BTreeMap::new(),
            run_started_at: None,
            network: NetworkConfig::default(),
            timing: TimingConfig::default(),
            paths: PathConfig::default(),
            monitor: MonitorKind::default(),
            frib: None,
        }
    }
}

impl EnvoyConfig {
    /// Load a configuration from a YAML file, remembering its path for
    /// later saves
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&text)?;
        config.path = path.to_path_buf();
        Ok(config)
    }

    /// Save to the path the config was loaded from
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&self.path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Add (or overwrite) a run log field
    pub fn add_field(&mut self, name: String, value: String) {
        if name.trim().is_empty() {
            tracing::warn!("Ignoring run log field with an empty name");
            return;
        }
        self.fields.insert(name, value);
    }

    pub fn topology(&self) -> Topology {
        Topology::new(self.network.number_of_modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_network_matches_constants() {
        let network = NetworkConfig::default();
        assert_eq!(network.router_address(0), "192.168.41.60");
        assert_eq!(network.module_address(11, true), "192.168.41.1");
        assert_eq!(network.module_address(4, false), "192.168.41.64");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("envoy.yml");

        let mut config = EnvoyConfig {
            experiment: String::from("e20009"),
            run_number: 17,
            ..Default::default()
        };
        config.add_field(String::from("Shift lead"), String::from("dbazin"));
        config.save_to(&path).unwrap();

        let loaded = EnvoyConfig::load(&path).unwrap();
        assert_eq!(loaded.experiment, "e20009");
        assert_eq!(loaded.run_number, 17);
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.fields.get("Shift lead").unwrap(), "dbazin");
        assert_eq!(loaded.monitor, MonitorKind::Sentry);
        assert!(loaded.frib.is_none());
    }

    #[test]
    fn test_minimal_file_uses_section_defaults() {
        let yaml = r#"
experiment: e20020
run_number: 3
description: test
pressure: 300.0
v_thgem: 0.0
v_mm: 0.0
e_drift: 0.0
v_cathode: 0.0
e_trans: 0.0
gas: D2
beam: 10Be
energy: 9.6
magnetic_field: 2.85
monitor: surveyor
timing:
  status_interval_ms: 500
"#;
        let config: EnvoyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.monitor, MonitorKind::Surveyor);
        assert_eq!(config.timing.status_interval_ms, 500);
        assert_eq!(config.timing.ecc_timeout_secs, 120);
        assert_eq!(config.network, NetworkConfig::default());
        assert_eq!(config.topology().mutant_id(), 11);
    }

    #[test]
    fn test_empty_field_name_is_ignored() {
        let mut config = EnvoyConfig::default();
        config.add_field(String::from("  "), String::from("x"));
        assert!(config.fields.is_empty());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = EnvoyConfig::load(&dir.path().join("nope.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::BadIO(_)));
    }
}
