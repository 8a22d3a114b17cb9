//! Conversion of raw per-source data into [`NormalizedRecord`]s.

use crate::db::DbVolumeRecord;
use crate::inventory::HvInventory;
use crate::parse::{volume_numeric_id, TargetEntry};
use std::collections::BTreeMap;
use vsa_core::{Attr, NormalizedRecord, SourceKind};

pub fn database_records(volumes: &[DbVolumeRecord]) -> Vec<NormalizedRecord> {
    volumes
        .iter()
        .map(|volume| {
            NormalizedRecord::new(SourceKind::Database)
                .with(Attr::VolumeId, volume.volume_id.as_str())
                .with(Attr::Id, volume.id.as_str())
                .with(Attr::Status, volume.status.as_str())
                .with_opt(Attr::Ip, volume.ip.as_deref())
                .with_opt(Attr::Port, volume.port.as_deref())
                .with_opt(Attr::Lun, volume.lun.as_deref())
                .with_opt(Attr::Dev, volume.dev.as_deref())
                .with_opt(Attr::InstanceUuid, volume.instance_uuid.as_deref())
                .with_opt(Attr::InstanceId, volume.instance_id.as_deref())
                .with_opt(Attr::Host, volume.host.as_deref())
        })
        .collect()
}

/// Initiator sessions of every host, hosts in sorted order.
pub fn session_records(inventories: &BTreeMap<String, HvInventory>) -> Vec<NormalizedRecord> {
    let mut records = Vec::new();
    for (host, inventory) in inventories {
        for session in &inventory.iscsiadm {
            records.push(
                NormalizedRecord::new(SourceKind::HypervisorSession)
                    .with(Attr::Host, host.as_str())
                    .with(Attr::VolumeId, session.volume_id.as_str())
                    .with(Attr::Ip, session.ip.as_str())
                    .with(Attr::Port, session.port.as_str())
                    .with(Attr::Mode, session.mode.as_str())
                    .with(Attr::Lun, session.lun.as_str()),
            );
        }
    }
    records
}

/// Disk attachments of every running domain, hosts in sorted order.
pub fn attachment_records(inventories: &BTreeMap<String, HvInventory>) -> Vec<NormalizedRecord> {
    let mut records = Vec::new();
    for (host, inventory) in inventories {
        for domain in &inventory.virsh {
            for volume in &domain.volumes {
                records.push(
                    NormalizedRecord::new(SourceKind::HypervisorAttachment)
                        .with(Attr::Host, host.as_str())
                        .with(Attr::VolumeId, volume.volume_id.as_str())
                        .with_opt(
                            Attr::Id,
                            volume_numeric_id(&volume.volume_id).map(|id| id.to_string()),
                        )
                        .with(Attr::InstanceId, domain.id.to_string())
                        .with(Attr::Dev, volume.dev.as_str())
                        .with(Attr::Domain, domain.domain.as_str()),
                );
            }
        }
    }
    records
}

pub fn target_records(targets: &[TargetEntry]) -> Vec<NormalizedRecord> {
    targets
        .iter()
        .map(|target| {
            NormalizedRecord::new(SourceKind::TargetExport)
                .with(Attr::VolumeId, target.volume_id.as_str())
                .with(Attr::Status, target.status.as_str())
                .with(Attr::Sessions, target.sessions.as_str())
        })
        .collect()
}
