use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInstance {
    pub id: String,
    pub uuid: String,
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbVolume {
    pub id: String,
    pub instance_uuid: Option<String>,
    pub dev: Option<String>,
    pub ip: Option<String>,
    pub port: Option<String>,
    pub lun: Option<String>,
    pub volume_id: String,
    pub status: String,
}

/// A volume joined with the instance it is attached to, as cached in
/// `db.json` and fed to reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbVolumeRecord {
    pub volume_id: String,
    pub id: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub lun: Option<String>,
    #[serde(default)]
    pub dev: Option<String>,
    pub status: String,
    #[serde(default)]
    pub instance_uuid: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

/// Attaches instance id and host to every volume whose instance uuid maps to
/// exactly one instance. Ambiguous or dangling uuids leave the instance
/// fields empty.
pub fn join_volumes(instances: &[DbInstance], volumes: &[DbVolume]) -> Vec<DbVolumeRecord> {
    volumes
        .iter()
        .map(|volume| {
            let instance = volume
                .instance_uuid
                .as_deref()
                .and_then(|uuid| find_instance(instances, uuid, &volume.volume_id));

            DbVolumeRecord {
                volume_id: volume.volume_id.clone(),
                id: volume.id.clone(),
                ip: volume.ip.clone(),
                port: volume.port.clone(),
                lun: volume.lun.clone(),
                dev: volume.dev.clone(),
                status: volume.status.clone(),
                instance_uuid: instance.map(|instance| instance.uuid.clone()),
                instance_id: instance.map(|instance| instance.id.clone()),
                host: instance.map(|instance| instance.host.clone()),
            }
        })
        .collect()
}

fn find_instance<'a>(
    instances: &'a [DbInstance],
    uuid: &str,
    volume_id: &str,
) -> Option<&'a DbInstance> {
    let mut matches = instances.iter().filter(|instance| instance.uuid == uuid);
    let first = matches.next();
    if first.is_none() {
        warn!(volume_id, uuid, "unable to find instance for volume");
        return None;
    }
    if matches.next().is_some() {
        warn!(volume_id, uuid, "multiple instances for volume");
        return None;
    }
    first
}
