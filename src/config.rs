// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use serde::{Deserialize, Serialize};

use crate::error::CephError;
use crate::node::PkgType;

/// Config, along with its children ClusterSpec, NodeSpec, and UpgradeSpec,
/// is the model for a cluster used in the cephup inventory file. The config
/// file is deserialized into a Config object.
///
/// The inventory model is intentionally decoupled from the in-memory model
/// built in [`crate::cluster`], so the file format can stay stable while the
/// dynamic model changes.
#[derive(Serialize, Deserialize, Debug)]
pub struct Config {
    pub cluster: ClusterSpec,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub upgrade: UpgradeSpec,
}

impl Config {
    /// Read the inventory from `path`, falling back to the default config
    /// path when none is given.
    pub fn load(path: Option<String>) -> Result<Config, CephError> {
        let path = path.unwrap_or_else(crate::default_config_path);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            CephError::Config(format!("could not open config file \"{path}\": {e}"))
        })?;
        toml::from_str(&text)
            .map_err(|e| CephError::Config(format!("could not parse \"{path}\": {e}")))
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ClusterSpec {
    pub name: String,
    /// Release marker, e.g. "4.3" or "5.1". Major version 5 and up drive the
    /// cluster through the cephadm shell.
    pub version: String,
    #[serde(default)]
    pub public_networks: Vec<String>,
    #[serde(default)]
    pub cluster_networks: Vec<String>,
    /// Target container image for installs and upgrades.
    pub container_image: Option<String>,
    /// Where the tool repository file for the target build is served from.
    pub repo_base_url: Option<String>,
    /// Custom configuration overlays applied verbatim at setup.
    #[serde(default)]
    pub overrides: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct NodeSpec {
    pub hostname: String,
    pub ip_address: String,
    pub internal_ip: Option<String>,
    pub username: String,
    pub password: String,
    pub root_password: String,
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Backing device paths for volume-carrying nodes.
    #[serde(default)]
    pub devices: Vec<String>,
    /// Number of pathless volumes to provision when `devices` is empty.
    #[serde(default)]
    pub no_of_volumes: usize,
    #[serde(default = "default_pkg_type")]
    pub pkg_type: PkgType,
    /// OS version id (as in /etc/os-release). Queried from the node when
    /// not provided.
    pub os_version: Option<String>,
}

fn default_pkg_type() -> PkgType {
    PkgType::Rpm
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpgradeSpec {
    /// Target image for the upgrade; the "latest" tag when omitted.
    pub image: Option<String>,
    /// Run a client write workload for the duration of the upgrade.
    #[serde(default)]
    pub benchmark: bool,
    /// Verify cluster health once the upgrade completes.
    #[serde(default)]
    pub verify_cluster_health: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_monitor_timeout_secs")]
    pub monitor_timeout_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

impl Default for UpgradeSpec {
    fn default() -> Self {
        UpgradeSpec {
            image: None,
            benchmark: false,
            verify_cluster_health: false,
            poll_interval_secs: default_poll_interval_secs(),
            monitor_timeout_secs: default_monitor_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_monitor_timeout_secs() -> u64 {
    3600
}

fn default_health_timeout_secs() -> u64 {
    300
}
