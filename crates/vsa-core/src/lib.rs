use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod matrix;

pub use matrix::{ComparisonMatrix, MatrixDeclaration};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("matrix entry {left}<->{right} references {attr}, which neither kind produces")]
    UnknownAttribute {
        left: SourceKind,
        right: SourceKind,
        attr: Attr,
    },
    #[error("matrix entry {left}<->{right} has no comparison keys")]
    EmptyKeySet { left: SourceKind, right: SourceKind },
    #[error("matrix pair {left}<->{right} is declared twice with different keys")]
    ConflictingPair { left: SourceKind, right: SourceKind },
    #[error("source kind {kind} has an empty join-key set")]
    EmptyJoinKeys { kind: SourceKind },
    #[error("unknown source kind: {0}")]
    UnknownSourceKind(String),
    #[error("unknown attribute: {0}")]
    UnrecognizedAttribute(String),
}

/// The four subsystems that report volume state, in reconciliation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Database,
    HypervisorSession,
    HypervisorAttachment,
    TargetExport,
}

impl SourceKind {
    /// Processing order used by a reconciliation run. The database seeds the
    /// rows; operational subsystems are folded in afterwards.
    pub const PROCESSING_ORDER: [SourceKind; 4] = [
        SourceKind::Database,
        SourceKind::HypervisorSession,
        SourceKind::HypervisorAttachment,
        SourceKind::TargetExport,
    ];

    /// Column order of the presence indicator (`TDIV`).
    pub const INDICATOR_ORDER: [SourceKind; 4] = [
        SourceKind::TargetExport,
        SourceKind::Database,
        SourceKind::HypervisorSession,
        SourceKind::HypervisorAttachment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Database => "database",
            SourceKind::HypervisorSession => "hypervisor-session",
            SourceKind::HypervisorAttachment => "hypervisor-attachment",
            SourceKind::TargetExport => "target-export",
        }
    }

    pub fn marker(&self) -> char {
        match self {
            SourceKind::Database => 'd',
            SourceKind::HypervisorSession => 'i',
            SourceKind::HypervisorAttachment => 'v',
            SourceKind::TargetExport => 't',
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "database" | "db" | "d" => Ok(SourceKind::Database),
            "hypervisor-session" | "hypervisor_session" | "iscsi" | "i" => {
                Ok(SourceKind::HypervisorSession)
            }
            "hypervisor-attachment" | "hypervisor_attachment" | "virsh" | "v" => {
                Ok(SourceKind::HypervisorAttachment)
            }
            "target-export" | "target_export" | "itadm" | "t" => Ok(SourceKind::TargetExport),
            other => Err(ContractError::UnknownSourceKind(other.to_string())),
        }
    }
}

/// Attribute names a normalized record may carry. Every source populates a
/// subset of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attr {
    VolumeId,
    Id,
    Ip,
    Port,
    Lun,
    Host,
    InstanceId,
    InstanceUuid,
    Dev,
    Mode,
    Status,
    Sessions,
    Domain,
}

impl Attr {
    pub const ALL: [Attr; 13] = [
        Attr::VolumeId,
        Attr::Id,
        Attr::Ip,
        Attr::Port,
        Attr::Lun,
        Attr::Host,
        Attr::InstanceId,
        Attr::InstanceUuid,
        Attr::Dev,
        Attr::Mode,
        Attr::Status,
        Attr::Sessions,
        Attr::Domain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Attr::VolumeId => "volume_id",
            Attr::Id => "id",
            Attr::Ip => "ip",
            Attr::Port => "port",
            Attr::Lun => "lun",
            Attr::Host => "host",
            Attr::InstanceId => "instance_id",
            Attr::InstanceUuid => "instance_uuid",
            Attr::Dev => "dev",
            Attr::Mode => "mode",
            Attr::Status => "status",
            Attr::Sessions => "sessions",
            Attr::Domain => "domain",
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attr {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        Attr::ALL
            .into_iter()
            .find(|attr| attr.as_str() == normalized)
            .ok_or(ContractError::UnrecognizedAttribute(normalized))
    }
}

/// One observation from one source. Lookups of attributes the source did not
/// populate return `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub kind: SourceKind,
    #[serde(default)]
    pub attrs: BTreeMap<Attr, String>,
}

impl NormalizedRecord {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            attrs: BTreeMap::new(),
        }
    }

    pub fn with(mut self, attr: Attr, value: impl Into<String>) -> Self {
        self.attrs.insert(attr, value.into());
        self
    }

    /// Sets `attr` when `value` is present; absent values stay absent.
    pub fn with_opt(mut self, attr: Attr, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            self.attrs.insert(attr, value.into());
        }
        self
    }

    pub fn get(&self, attr: Attr) -> Option<&str> {
        self.attrs.get(&attr).map(String::as_str)
    }
}

/// Attribute sets that shape how a kind creates and enriches rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindProfile {
    /// Copied into a brand-new row created by this kind.
    pub join_keys: Vec<Attr>,
    /// Copied into a row whenever this kind creates or matches it.
    pub contributed: Vec<Attr>,
}

impl KindProfile {
    pub fn new(join_keys: &[Attr], contributed: &[Attr]) -> Self {
        Self {
            join_keys: join_keys.to_vec(),
            contributed: contributed.to_vec(),
        }
    }

    pub fn produces(&self, attr: Attr) -> bool {
        self.join_keys.contains(&attr) || self.contributed.contains(&attr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindProfiles {
    pub database: KindProfile,
    pub hypervisor_session: KindProfile,
    pub hypervisor_attachment: KindProfile,
    pub target_export: KindProfile,
}

impl Default for KindProfiles {
    fn default() -> Self {
        Self {
            database: KindProfile::new(
                &[Attr::VolumeId, Attr::Ip, Attr::Host, Attr::InstanceId],
                &[Attr::InstanceUuid, Attr::Id, Attr::Status],
            ),
            hypervisor_session: KindProfile::new(
                &[Attr::VolumeId, Attr::Ip, Attr::Host],
                &[Attr::Mode],
            ),
            hypervisor_attachment: KindProfile::new(
                &[Attr::VolumeId, Attr::Host, Attr::InstanceId],
                &[Attr::Dev],
            ),
            target_export: KindProfile::new(&[Attr::VolumeId], &[Attr::Sessions]),
        }
    }
}

impl KindProfiles {
    pub fn profile(&self, kind: SourceKind) -> &KindProfile {
        match kind {
            SourceKind::Database => &self.database,
            SourceKind::HypervisorSession => &self.hypervisor_session,
            SourceKind::HypervisorAttachment => &self.hypervisor_attachment,
            SourceKind::TargetExport => &self.target_export,
        }
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        for kind in SourceKind::PROCESSING_ORDER {
            if self.profile(kind).join_keys.is_empty() {
                return Err(ContractError::EmptyJoinKeys { kind });
            }
        }
        Ok(())
    }
}

/// A row attribute together with the kind that supplied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowValue {
    pub value: String,
    pub source: SourceKind,
}

/// The current belief about one physical volume across all sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusRow {
    confirmed: BTreeSet<SourceKind>,
    attrs: BTreeMap<Attr, RowValue>,
}

impl ConsensusRow {
    pub fn is_confirmed(&self, kind: SourceKind) -> bool {
        self.confirmed.contains(&kind)
    }

    /// True when `kind` is marked present and at least one attribute it
    /// supplied is still held by the row.
    pub fn has_confirmed_values(&self, kind: SourceKind) -> bool {
        self.is_confirmed(kind) && self.attrs.values().any(|value| value.source == kind)
    }

    pub fn confirmed_kinds(&self) -> impl Iterator<Item = SourceKind> + '_ {
        self.confirmed.iter().copied()
    }

    pub fn get(&self, attr: Attr) -> Option<&str> {
        self.attrs.get(&attr).map(|entry| entry.value.as_str())
    }

    pub fn source_of(&self, attr: Attr) -> Option<SourceKind> {
        self.attrs.get(&attr).map(|entry| entry.source)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (Attr, &str)> + '_ {
        self.attrs
            .iter()
            .map(|(attr, entry)| (*attr, entry.value.as_str()))
    }

    /// Four characters in `TDIV` order, `-` for kinds not yet folded in.
    pub fn presence_indicator(&self) -> String {
        SourceKind::INDICATOR_ORDER
            .iter()
            .map(|kind| {
                if self.is_confirmed(*kind) {
                    kind.marker()
                } else {
                    '-'
                }
            })
            .collect()
    }

    pub fn confirm(&mut self, kind: SourceKind) {
        self.confirmed.insert(kind);
    }

    /// Copies `attr` from `record` when the record has it. An existing value
    /// supplied by a different kind is kept.
    pub fn absorb(&mut self, kind: SourceKind, attr: Attr, record: &NormalizedRecord) {
        let Some(value) = record.get(attr) else {
            return;
        };
        if self
            .attrs
            .get(&attr)
            .is_some_and(|existing| existing.source != kind)
        {
            return;
        }
        self.attrs.insert(
            attr,
            RowValue {
                value: value.to_string(),
                source: kind,
            },
        );
    }
}
