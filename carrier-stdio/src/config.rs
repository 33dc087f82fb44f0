//! Host configuration from file and environment.

use std::path::{Path, PathBuf};

use carrier_core::{BootstrapList, BridgeConfig};
use serde::Deserialize;

/// Host configuration. File: ~/.config/carrier-bridge/config.toml or /etc/carrier-bridge/config.toml.
/// Env overrides: CARRIER_BRIDGE_DATA_DIR, CARRIER_BRIDGE_LOG, CARRIER_BRIDGE_BOOTSTRAPS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root for every instance's persistent location.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Bootstrap list JSON (`{"bootstraps": [...]}`). None means no bootstraps.
    #[serde(default)]
    pub bootstraps: Option<PathBuf>,
    /// tracing filter directive; RUST_LOG wins when set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/share/carrier-bridge"),
        None => PathBuf::from("carrier-data"),
    }
}

fn default_log_filter() -> String {
    "carrier=info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bootstraps: None,
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Library config for the bridge. An unreadable bootstrap file is logged and skipped.
    pub fn bridge_config(&self) -> BridgeConfig {
        let bootstraps = match &self.bootstraps {
            Some(path) => match BootstrapList::load(path) {
                Ok(list) => list.nodes,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring bootstrap list");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        BridgeConfig {
            data_dir: self.data_dir.clone(),
            bootstraps,
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(s) = var("CARRIER_BRIDGE_DATA_DIR").filter(|s| !s.is_empty()) {
            self.data_dir = PathBuf::from(s);
        }
        if let Some(s) = var("CARRIER_BRIDGE_LOG").filter(|s| !s.is_empty()) {
            self.log_filter = s;
        }
        if let Some(s) = var("CARRIER_BRIDGE_BOOTSTRAPS").filter(|s| !s.is_empty()) {
            self.bootstraps = Some(PathBuf::from(s));
        }
    }
}

/// Load config: defaults, then the first config file found, then env vars. Never fails.
pub fn load() -> Config {
    let mut c = load_file(&config_paths()).unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME") {
        out.push(PathBuf::from(h).join(".config/carrier-bridge/config.toml"));
    }
    out.push(PathBuf::from("/etc/carrier-bridge/config.toml"));
    out
}

/// The first existing path decides; a broken file there means defaults, not the next path.
fn load_file(paths: &[PathBuf]) -> Option<Config> {
    let path = paths.iter().find(|p| p.exists())?;
    parse_file(path)
}

fn parse_file(path: &Path) -> Option<Config> {
    let s = std::fs::read_to_string(path).ok()?;
    toml::from_str(&s).ok()
}
