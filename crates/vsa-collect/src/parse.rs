//! Parsers for the text output of iscsiadm, virsh, itadm and the database
//! inventory scripts. Lines that do not fit the expected shape are logged
//! and skipped; a single bad line never aborts a listing.

use crate::db::{DbInstance, DbVolume};
use crate::inventory::{Domain, DomainVolume, IscsiSession};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

/// One export from `itadm list-target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub volume_id: String,
    pub status: String,
    pub sessions: String,
}

fn volume_id_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^volume-([0-9a-fA-F]{8})").expect("valid regex"))
}

fn domain_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^instance-([0-9a-fA-F]{8})").expect("valid regex"))
}

fn iscsi_session_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(
            r"^(\w+): \[(\d+)\] (\d+\.\d+\.\d+\.\d+):(\d+),(\d+) iqn\.2010-10\.org\.openstack:(volume-[0-9a-fA-F]{8})",
        )
        .expect("valid regex")
    })
}

fn iscsi_location_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(
            r"ip-(\d+\.\d+\.\d+\.\d+):(\d+)-iscsi-iqn\.2010-10\.org\.openstack:(volume-[0-9a-fA-F]{8})-lun-(\d+)",
        )
        .expect("valid regex")
    })
}

fn local_disk_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"/disk(\.local)?$").expect("valid regex"))
}

fn target_name_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(r"^iqn\.2010-10\.org\.openstack:(volume-[0-9a-fA-F]{8})").expect("valid regex")
    })
}

fn volume_provider_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(
            r"^(\d+\.\d+\.\d+\.\d+):(\d+),(\d+) iqn\.2010-10\.org\.openstack:(volume-[0-9a-fA-F]{8})",
        )
        .expect("valid regex")
    })
}

/// `volume-0000001a` -> `26`.
pub fn volume_numeric_id(volume_id: &str) -> Option<u64> {
    let captures = volume_id_rx().captures(volume_id)?;
    u64::from_str_radix(captures.get(1)?.as_str(), 16).ok()
}

/// `instance-0000002a` -> `42`.
pub fn instance_numeric_id(domain: &str) -> Option<u64> {
    let captures = domain_rx().captures(domain)?;
    u64::from_str_radix(captures.get(1)?.as_str(), 16).ok()
}

/// Name the volume service gives a volume without a provider location.
pub fn volume_name(id: u64) -> String {
    format!("volume-{id:08x}")
}

/// Parses `iscsiadm -m session`.
pub fn parse_iscsi_sessions(text: &str) -> Vec<IscsiSession> {
    let mut sessions = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("iscsiadm: No active sessions") {
            continue;
        }
        let Some(captures) = iscsi_session_rx().captures(line) else {
            warn!(line, "unrecognized iscsiadm session line");
            continue;
        };
        sessions.push(IscsiSession {
            mode: captures[1].to_string(),
            ip: captures[3].to_string(),
            port: captures[4].to_string(),
            lun: captures[5].to_string(),
            volume_id: captures[6].to_string(),
        });
    }
    sessions
}

/// Parses `virsh list`. Volumes are filled in later from `domblklist`.
pub fn parse_virsh_list(text: &str) -> Vec<Domain> {
    let mut domains = Vec::new();
    for line in text.lines() {
        let columns = line.split_whitespace().collect::<Vec<_>>();
        if columns.len() != 3 || columns[0] == "Id" {
            continue;
        }
        let Some(id) = instance_numeric_id(columns[1]) else {
            warn!(domain = columns[1], "invalid domain name");
            continue;
        };
        domains.push(Domain {
            domain: columns[1].to_string(),
            id,
            state: columns[2].to_string(),
            volumes: Vec::new(),
        });
    }
    domains
}

/// Parses `virsh domblklist <domain>`, keeping iSCSI-backed disks only.
pub fn parse_domblklist(text: &str) -> Vec<DomainVolume> {
    let mut volumes = Vec::new();
    for line in text.lines() {
        let columns = line.split_whitespace().collect::<Vec<_>>();
        if columns.len() != 2 || columns[0] == "Target" {
            continue;
        }
        let (dev, location) = (columns[0], columns[1]);
        if location == "-" || local_disk_rx().is_match(location) {
            continue;
        }
        let Some(captures) = iscsi_location_rx().captures(location) else {
            warn!(dev, location, "unrecognized block device source");
            continue;
        };
        volumes.push(DomainVolume {
            ip: captures[1].to_string(),
            port: captures[2].to_string(),
            volume_id: captures[3].to_string(),
            lun: captures[4].to_string(),
            dev: dev.to_string(),
        });
    }
    volumes
}

/// Parses `itadm list-target` output of a single target host.
pub fn parse_itadm_targets(text: &str) -> Vec<TargetEntry> {
    let mut targets = Vec::new();
    for line in text.lines() {
        let columns = line.split_whitespace().collect::<Vec<_>>();
        if columns.len() != 3 {
            continue;
        }
        let Some(captures) = target_name_rx().captures(columns[0]) else {
            warn!(target = columns[0], "unable to match target iqn");
            continue;
        };
        targets.push(TargetEntry {
            volume_id: captures[1].to_string(),
            status: columns[1].to_string(),
            sessions: columns[2].to_string(),
        });
    }
    targets
}

/// Parses the instance listing: `id uuid host <zone> state`.
pub fn parse_db_instances(text: &str) -> Vec<DbInstance> {
    let mut instances = Vec::new();
    for line in text.lines() {
        let columns = line.split_whitespace().collect::<Vec<_>>();
        if columns.is_empty() {
            continue;
        }
        if columns.len() < 5 || columns[0].parse::<u64>().is_err() {
            warn!(line, "error processing instance row");
            continue;
        }
        instances.push(DbInstance {
            id: columns[0].to_string(),
            uuid: columns[1].to_string(),
            host: columns[2].to_string(),
        });
    }
    instances
}

/// Parses the volume listing:
/// `id;instance_uuid;dev;user;project;provider_location;status`.
pub fn parse_db_volumes(text: &str) -> Vec<DbVolume> {
    let mut volumes = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let columns = line.split(';').map(str::trim).collect::<Vec<_>>();
        if columns.len() != 7 {
            warn!(line, "error processing volume row");
            continue;
        }
        let Ok(numeric_id) = columns[0].parse::<u64>() else {
            warn!(line, "error processing volume row");
            continue;
        };

        let mut volume = DbVolume {
            id: columns[0].to_string(),
            instance_uuid: present(columns[1]),
            dev: present(columns[2]),
            ip: None,
            port: None,
            lun: None,
            volume_id: volume_name(numeric_id),
            status: columns[6].to_string(),
        };

        if let Some(location) = present(columns[5]) {
            let Some(captures) = volume_provider_rx().captures(&location) else {
                warn!(line, "error processing volume row");
                continue;
            };
            volume.ip = Some(captures[1].to_string());
            volume.port = Some(captures[2].to_string());
            volume.lun = Some(captures[3].to_string());
            volume.volume_id = captures[4].to_string();
        }

        volumes.push(volume);
    }
    volumes
}

// The inventory scripts print Python's `None` for NULL columns.
fn present(value: &str) -> Option<String> {
    match value.trim() {
        "" | "None" => None,
        other => Some(other.to_string()),
    }
}
