//! Pairwise comparison keys between source kinds.
//!
//! Rules are declared for one direction of a pair only; [`ComparisonMatrix::build`]
//! mirrors every entry so lookups work from either side.

use crate::{Attr, ContractError, KindProfiles, SourceKind};
use std::collections::BTreeMap;

/// Asymmetric list of `(left, right, keys)` rules, as written by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixDeclaration {
    pub entries: Vec<(SourceKind, SourceKind, Vec<Attr>)>,
}

impl Default for MatrixDeclaration {
    fn default() -> Self {
        use SourceKind::{Database, HypervisorAttachment, HypervisorSession, TargetExport};

        Self {
            entries: vec![
                (
                    Database,
                    HypervisorSession,
                    vec![Attr::VolumeId, Attr::Ip, Attr::Host],
                ),
                (
                    Database,
                    HypervisorAttachment,
                    vec![Attr::VolumeId, Attr::Host, Attr::InstanceId],
                ),
                (Database, TargetExport, vec![Attr::VolumeId]),
                (
                    HypervisorSession,
                    HypervisorAttachment,
                    vec![Attr::VolumeId, Attr::Host],
                ),
                (HypervisorSession, TargetExport, vec![Attr::VolumeId]),
                (HypervisorAttachment, TargetExport, vec![Attr::VolumeId]),
            ],
        }
    }
}

impl MatrixDeclaration {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn declare(mut self, left: SourceKind, right: SourceKind, keys: &[Attr]) -> Self {
        self.entries.push((left, right, keys.to_vec()));
        self
    }

    /// Checks every entry against the kinds' attribute sets. A key must be
    /// produced by at least one side of its pair, and a pair declared in both
    /// directions must agree.
    pub fn validate(&self, profiles: &KindProfiles) -> Result<(), ContractError> {
        let mut seen: BTreeMap<(SourceKind, SourceKind), Vec<Attr>> = BTreeMap::new();

        for (left, right, keys) in &self.entries {
            let (left, right) = (*left, *right);
            if keys.is_empty() {
                return Err(ContractError::EmptyKeySet { left, right });
            }

            for attr in keys {
                if !profiles.profile(left).produces(*attr)
                    && !profiles.profile(right).produces(*attr)
                {
                    return Err(ContractError::UnknownAttribute {
                        left,
                        right,
                        attr: *attr,
                    });
                }
            }

            let normalized = dedup_keys(keys);
            let pair = if left <= right {
                (left, right)
            } else {
                (right, left)
            };
            if let Some(existing) = seen.get(&pair) {
                if sorted(existing) != sorted(&normalized) {
                    return Err(ContractError::ConflictingPair { left, right });
                }
            } else {
                seen.insert(pair, normalized);
            }
        }

        Ok(())
    }
}

/// Symmetric lookup: `keys(a, b) == keys(b, a)` for every declared pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonMatrix {
    rules: BTreeMap<SourceKind, BTreeMap<SourceKind, Vec<Attr>>>,
}

impl ComparisonMatrix {
    /// Mirrors each declared entry to its reverse pair. Keys keep their
    /// declared order with duplicates dropped. No validation is done here;
    /// see [`ComparisonMatrix::from_declaration`].
    pub fn build(declaration: &MatrixDeclaration) -> Self {
        let mut rules: BTreeMap<SourceKind, BTreeMap<SourceKind, Vec<Attr>>> = BTreeMap::new();

        for (left, right, keys) in &declaration.entries {
            let keys = dedup_keys(keys);
            rules
                .entry(*left)
                .or_default()
                .insert(*right, keys.clone());
            rules.entry(*right).or_default().insert(*left, keys);
        }

        Self { rules }
    }

    /// Validates the declaration against `profiles` and builds the matrix.
    pub fn from_declaration(
        declaration: &MatrixDeclaration,
        profiles: &KindProfiles,
    ) -> Result<Self, ContractError> {
        profiles.validate()?;
        declaration.validate(profiles)?;
        Ok(Self::build(declaration))
    }

    /// All kinds `kind` is compared against, with the keys for each.
    pub fn comparisons_for(&self, kind: SourceKind) -> impl Iterator<Item = (SourceKind, &[Attr])> {
        self.rules
            .get(&kind)
            .into_iter()
            .flat_map(|others| others.iter().map(|(other, keys)| (*other, keys.as_slice())))
    }

    pub fn keys(&self, left: SourceKind, right: SourceKind) -> Option<&[Attr]> {
        self.rules
            .get(&left)
            .and_then(|others| others.get(&right))
            .map(Vec::as_slice)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (SourceKind, SourceKind, &[Attr])> {
        self.rules.iter().flat_map(|(left, others)| {
            others
                .iter()
                .map(move |(right, keys)| (*left, *right, keys.as_slice()))
        })
    }
}

fn dedup_keys(keys: &[Attr]) -> Vec<Attr> {
    let mut out = Vec::with_capacity(keys.len());
    for attr in keys {
        if !out.contains(attr) {
            out.push(*attr);
        }
    }
    out
}

fn sorted(keys: &[Attr]) -> Vec<Attr> {
    let mut keys = keys.to_vec();
    keys.sort();
    keys
}
