use crate::db::{join_volumes, DbVolumeRecord};
use crate::inventory::HvInventory;
use crate::parse::{parse_db_instances, parse_db_volumes, parse_itadm_targets, TargetEntry};
use crate::remote::{fold_by_host, pdcp, pdsh, ssh, RemoteExec};
use crate::CollectError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Where and how each source is collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectSettings {
    pub hosts: Vec<String>,
    pub target_hosts: Vec<String>,
    pub db_host: String,
    pub db_instances_command: String,
    pub db_volumes_command: String,
    pub connect_timeout_secs: u64,
    /// Command run on each hypervisor; it must print an [`HvInventory`] as JSON.
    pub inventory_command: String,
    /// Local agent binary copied to every hypervisor before collecting.
    pub inventory_push: Option<PathBuf>,
    pub inventory_remote_path: String,
}

pub struct Collector<'a, E: RemoteExec + ?Sized> {
    exec: &'a E,
    settings: &'a CollectSettings,
}

impl<'a, E: RemoteExec + ?Sized> Collector<'a, E> {
    pub fn new(exec: &'a E, settings: &'a CollectSettings) -> Self {
        Self { exec, settings }
    }

    /// Hypervisor inventories keyed by host. Hosts that answer with
    /// unreadable JSON are skipped.
    pub fn hypervisors(&self) -> Result<BTreeMap<String, HvInventory>, CollectError> {
        let settings = self.settings;
        if let Some(agent) = &settings.inventory_push {
            pdcp(
                self.exec,
                &settings.hosts,
                agent,
                &settings.inventory_remote_path,
                settings.connect_timeout_secs,
            )?;
        }

        let command = settings
            .inventory_command
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let output = pdsh(
            self.exec,
            &settings.hosts,
            &command,
            settings.connect_timeout_secs,
        )?;

        let mut inventories = BTreeMap::new();
        for (host, lines) in fold_by_host(&output) {
            match decode_inventory(&host, &lines.join("\n")) {
                Ok(inventory) => {
                    inventories.insert(host, inventory);
                }
                Err(CollectError::InventoryJson { host, source }) => {
                    warn!(host = %host, error = %source, "skipping hypervisor with unreadable inventory")
                }
                Err(err) => warn!(error = %err, "skipping hypervisor"),
            }
        }

        info!(
            requested = settings.hosts.len(),
            answered = inventories.len(),
            "collected hypervisor inventories"
        );
        Ok(inventories)
    }

    pub fn database(&self) -> Result<Vec<DbVolumeRecord>, CollectError> {
        let settings = self.settings;
        let instances = parse_db_instances(&ssh(
            self.exec,
            &settings.db_host,
            &settings.db_instances_command,
        )?);
        let volumes = parse_db_volumes(&ssh(
            self.exec,
            &settings.db_host,
            &settings.db_volumes_command,
        )?);

        let records = join_volumes(&instances, &volumes);
        info!(
            instances = instances.len(),
            volumes = records.len(),
            "collected database inventory"
        );
        Ok(records)
    }

    pub fn targets(&self) -> Result<Vec<TargetEntry>, CollectError> {
        let settings = self.settings;
        let output = pdsh(
            self.exec,
            &settings.target_hosts,
            &["itadm".to_string(), "list-target".to_string()],
            settings.connect_timeout_secs,
        )?;

        let targets = fold_by_host(&output)
            .values()
            .flat_map(|lines| parse_itadm_targets(&lines.join("\n")))
            .collect::<Vec<_>>();
        info!(targets = targets.len(), "collected target exports");
        Ok(targets)
    }
}

fn decode_inventory(host: &str, json: &str) -> Result<HvInventory, CollectError> {
    serde_json::from_str(json).map_err(|source| CollectError::InventoryJson {
        host: host.to_string(),
        source,
    })
}
