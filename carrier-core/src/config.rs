//! Bridge configuration: data directory, bootstrap nodes, per-instance options.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::native::CarrierOptions;

/// A bootstrap node as shipped in the `bootstraps.json` resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapNode {
    pub ipv4: String,
    pub port: u16,
    pub public_key: String,
}

/// The `{"bootstraps": [...]}` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapList {
    #[serde(rename = "bootstraps", default)]
    pub nodes: Vec<BootstrapNode>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid bootstrap list: {0}")]
    Json(#[from] serde_json::Error),
}

impl BootstrapList {
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&s)
    }
}

/// Library-level configuration shared by every carrier instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Root under which `createObject` directories are created.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Used when the instance config does not name its own bootstraps.
    #[serde(default)]
    pub bootstraps: Vec<BootstrapNode>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("carrier-data")
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bootstraps: Vec::new(),
        }
    }
}

/// Options JSON passed by the caller to `createObject`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub udp_enabled: bool,
    pub persistent_location: String,
    #[serde(default)]
    pub bootstraps: Option<Vec<BootstrapNode>>,
}

impl InstanceConfig {
    pub fn from_json(s: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(s)
            .map_err(|e| BridgeError::invalid_argument(format!("carrier options: {e}")))
    }
}

/// Relative path made only of normal components.
fn relative_component(s: &str, what: &str) -> Result<PathBuf, BridgeError> {
    let p = PathBuf::from(s);
    if s.is_empty() || !p.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(BridgeError::invalid_argument(format!(
            "{what} must be a relative path"
        )));
    }
    Ok(p)
}

impl BridgeConfig {
    /// Resolve the native options for an instance created in `dir`.
    /// The persistent location is `data_dir/dir/persistentLocation`.
    pub fn carrier_options(
        &self,
        dir: &str,
        instance: InstanceConfig,
    ) -> Result<CarrierOptions, BridgeError> {
        let dir = relative_component(dir, "dir")?;
        let location = relative_component(&instance.persistent_location, "persistentLocation")?;
        Ok(CarrierOptions {
            udp_enabled: instance.udp_enabled,
            persistent_location: self.data_dir.join(dir).join(location),
            bootstraps: instance
                .bootstraps
                .unwrap_or_else(|| self.bootstraps.clone()),
        })
    }
}
