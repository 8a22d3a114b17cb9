//! Hypervisor-side inventory: running domains with their iSCSI-backed disks
//! and the host's iSCSI initiator sessions. Produced on the hypervisor by
//! `vsa hv-inventory` and shipped back as JSON.

use crate::parse::{parse_domblklist, parse_iscsi_sessions, parse_virsh_list};
use crate::remote::RemoteExec;
use crate::CollectError;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HvInventory {
    #[serde(default)]
    pub virsh: Vec<Domain>,
    #[serde(default)]
    pub iscsiadm: Vec<IscsiSession>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub domain: String,
    pub id: u64,
    pub state: String,
    #[serde(default)]
    pub volumes: Vec<DomainVolume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVolume {
    pub ip: String,
    pub port: String,
    pub volume_id: String,
    pub lun: String,
    pub dev: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiSession {
    pub ip: String,
    pub port: String,
    pub mode: String,
    pub lun: String,
    pub volume_id: String,
}

/// Gathers the inventory of the machine `exec` runs on.
pub fn collect_local(exec: &(impl RemoteExec + ?Sized)) -> Result<HvInventory, CollectError> {
    let listing = run_checked(exec, "virsh", &["list"])?;
    let mut domains = parse_virsh_list(&listing);

    for domain in &mut domains {
        let blocks = run_checked(exec, "virsh", &["domblklist", domain.domain.as_str()]);
        match blocks {
            Ok(blocks) => domain.volumes = parse_domblklist(&blocks),
            Err(err) => warn!(domain = %domain.domain, error = %err, "domblklist failed"),
        }
    }

    // iscsiadm exits non-zero when there are no sessions.
    let sessions = exec.run("iscsiadm", &["-m".to_string(), "session".to_string()])?;
    let iscsiadm = parse_iscsi_sessions(&sessions.stdout);

    Ok(HvInventory {
        virsh: domains,
        iscsiadm,
    })
}

fn run_checked(
    exec: &(impl RemoteExec + ?Sized),
    program: &str,
    args: &[&str],
) -> Result<String, CollectError> {
    let args = args.iter().map(|arg| arg.to_string()).collect::<Vec<_>>();
    let output = exec.run(program, &args)?;
    if !output.success {
        return Err(CollectError::CommandFailed {
            program: format!("{program} {}", args.join(" ")),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}
