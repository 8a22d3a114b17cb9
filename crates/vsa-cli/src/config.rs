use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use vsa_collect::{expand_hosts, CollectSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub hosts: String,
    pub target_hosts: String,
    pub db_host: String,
    pub db_instances_command: String,
    pub db_volumes_command: String,
    pub cache_dir: PathBuf,
    pub connect_timeout_secs: u64,
    pub inventory_command: String,
    pub inventory_push: Option<PathBuf>,
    pub inventory_remote_path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            hosts: "cc[1-504]-p".to_string(),
            target_hosts: "v[1,3]-p".to_string(),
            db_host: "m3-p".to_string(),
            db_instances_command: "./inventory_all_instances".to_string(),
            db_volumes_command: "./inventory_volumes3".to_string(),
            cache_dir: PathBuf::from("/tmp/magellan-volume-state-audit"),
            connect_timeout_secs: 15,
            inventory_command: "vsa hv-inventory".to_string(),
            inventory_push: None,
            inventory_remote_path: "/tmp/vsa".to_string(),
        }
    }
}

impl AuditConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn collect_settings(&self) -> Result<CollectSettings> {
        Ok(CollectSettings {
            hosts: expand_hosts(&self.hosts)
                .with_context(|| format!("invalid hosts {:?}", self.hosts))?,
            target_hosts: expand_hosts(&self.target_hosts)
                .with_context(|| format!("invalid target hosts {:?}", self.target_hosts))?,
            db_host: self.db_host.clone(),
            db_instances_command: self.db_instances_command.clone(),
            db_volumes_command: self.db_volumes_command.clone(),
            connect_timeout_secs: self.connect_timeout_secs,
            inventory_command: self.inventory_command.clone(),
            inventory_push: self.inventory_push.clone(),
            inventory_remote_path: self.inventory_remote_path.clone(),
        })
    }
}

pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = env::var("VSA_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("vsa/config.toml")
}
