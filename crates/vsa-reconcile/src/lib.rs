//! Folds normalized records from every source kind into consensus rows.
//!
//! Admission is greedy: rows are scanned in creation order and the first row
//! that is a candidate and survives every key comparison absorbs the record.
//! Records that match nothing open a new row, which is how discrepancies
//! between subsystems show up.

use serde::Serialize;
use std::collections::BTreeMap;
use vsa_core::{Attr, ComparisonMatrix, ConsensusRow, KindProfiles, NormalizedRecord, SourceKind};

/// Where a single record ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Created(usize),
    Matched(usize),
}

impl Admission {
    pub fn row(&self) -> usize {
        match self {
            Admission::Created(index) | Admission::Matched(index) => *index,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct KindTally {
    pub admitted: usize,
    pub rows_created: usize,
    pub rows_matched: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub records_admitted: usize,
    pub rows_created: usize,
    pub rows_matched: usize,
    pub by_kind: BTreeMap<SourceKind, KindTally>,
}

impl ReconcileReport {
    fn record(&mut self, kind: SourceKind, admission: Admission) {
        let tally = self.by_kind.entry(kind).or_default();
        self.records_admitted += 1;
        tally.admitted += 1;
        match admission {
            Admission::Created(_) => {
                self.rows_created += 1;
                tally.rows_created += 1;
            }
            Admission::Matched(_) => {
                self.rows_matched += 1;
                tally.rows_matched += 1;
            }
        }
    }
}

/// Fully materialized input for one run, grouped by the kind tag of each
/// record and kept in supply order within a kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceRecords {
    by_kind: BTreeMap<SourceKind, Vec<NormalizedRecord>>,
}

impl SourceRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: NormalizedRecord) {
        self.by_kind.entry(record.kind).or_default().push(record);
    }

    pub fn records(&self, kind: SourceKind) -> &[NormalizedRecord] {
        self.by_kind
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Extend<NormalizedRecord> for SourceRecords {
    fn extend<T: IntoIterator<Item = NormalizedRecord>>(&mut self, iter: T) {
        for record in iter {
            self.push(record);
        }
    }
}

impl FromIterator<NormalizedRecord> for SourceRecords {
    fn from_iter<T: IntoIterator<Item = NormalizedRecord>>(iter: T) -> Self {
        let mut sources = Self::new();
        sources.extend(iter);
        sources
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub rows: Vec<ConsensusRow>,
    pub report: ReconcileReport,
}

impl Reconciliation {
    /// Number of rows per presence indicator, e.g. `"tdiv" -> 12`.
    pub fn presence_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.presence_indicator()).or_insert(0) += 1;
        }
        counts
    }
}

pub struct Reconciler<'a> {
    matrix: &'a ComparisonMatrix,
    profiles: &'a KindProfiles,
}

impl<'a> Reconciler<'a> {
    pub fn new(matrix: &'a ComparisonMatrix, profiles: &'a KindProfiles) -> Self {
        Self { matrix, profiles }
    }

    /// Folds `record` into the first matching row of `rows`, or appends a new
    /// row for it.
    pub fn admit(&self, record: &NormalizedRecord, rows: &mut Vec<ConsensusRow>) -> Admission {
        let kind = record.kind;
        let profile = self.profiles.profile(kind);

        for (index, row) in rows.iter_mut().enumerate() {
            if self.accepts(row, record) {
                row.confirm(kind);
                for attr in &profile.contributed {
                    row.absorb(kind, *attr, record);
                }
                return Admission::Matched(index);
            }
        }

        let mut row = ConsensusRow::default();
        row.confirm(kind);
        for attr in profile.join_keys.iter().chain(&profile.contributed) {
            row.absorb(kind, *attr, record);
        }
        rows.push(row);
        Admission::Created(rows.len() - 1)
    }

    /// Admits every record kind by kind in [`SourceKind::PROCESSING_ORDER`].
    pub fn reconcile(&self, sources: &SourceRecords) -> Reconciliation {
        let mut rows = Vec::new();
        let mut report = ReconcileReport::default();

        for kind in SourceKind::PROCESSING_ORDER {
            for record in sources.records(kind) {
                let admission = self.admit(record, &mut rows);
                report.record(kind, admission);
            }
        }

        Reconciliation { rows, report }
    }

    // A row is a candidate once any kind compared against `record.kind` has
    // confirmed values in it; every such kind's keys must then agree.
    fn accepts(&self, row: &ConsensusRow, record: &NormalizedRecord) -> bool {
        let mut candidate = false;
        for (other, keys) in self.matrix.comparisons_for(record.kind) {
            if !row.has_confirmed_values(other) {
                continue;
            }
            candidate = true;
            if !keys.iter().all(|attr| agrees(row, record, *attr)) {
                return false;
            }
        }
        candidate
    }
}

fn agrees(row: &ConsensusRow, record: &NormalizedRecord, attr: Attr) -> bool {
    match (row.get(attr), record.get(attr)) {
        (Some(held), Some(observed)) => held == observed,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsa_core::MatrixDeclaration;

    fn default_tables() -> (ComparisonMatrix, KindProfiles) {
        let profiles = KindProfiles::default();
        let matrix = ComparisonMatrix::from_declaration(&MatrixDeclaration::default(), &profiles)
            .expect("valid matrix");
        (matrix, profiles)
    }

    fn db(volume_id: &str, host: &str, instance_id: &str) -> NormalizedRecord {
        NormalizedRecord::new(SourceKind::Database)
            .with(Attr::VolumeId, volume_id)
            .with(Attr::Host, host)
            .with(Attr::InstanceId, instance_id)
    }

    #[test]
    fn new_row_copies_join_keys_and_contributed_attributes_only() {
        let (matrix, profiles) = default_tables();
        let reconciler = Reconciler::new(&matrix, &profiles);
        let mut rows = Vec::new();

        let record = NormalizedRecord::new(SourceKind::HypervisorSession)
            .with(Attr::VolumeId, "volume-0000001a")
            .with(Attr::Ip, "10.1.0.4")
            .with(Attr::Host, "cc12-p")
            .with(Attr::Port, "3260")
            .with(Attr::Lun, "1")
            .with(Attr::Mode, "tcp");

        assert_eq!(reconciler.admit(&record, &mut rows), Admission::Created(0));
        let row = &rows[0];
        assert_eq!(row.presence_indicator(), "--i-");
        assert_eq!(row.get(Attr::VolumeId), Some("volume-0000001a"));
        assert_eq!(row.get(Attr::Mode), Some("tcp"));
        assert_eq!(row.get(Attr::Port), None);
        assert_eq!(row.get(Attr::Lun), None);
    }

    #[test]
    fn match_overwrites_contributed_attributes_but_not_join_keys() {
        let (matrix, profiles) = default_tables();
        let reconciler = Reconciler::new(&matrix, &profiles);
        let mut rows = Vec::new();

        reconciler.admit(&db("volume-0000001a", "cc3-p", "42"), &mut rows);
        let attachment = NormalizedRecord::new(SourceKind::HypervisorAttachment)
            .with(Attr::VolumeId, "volume-0000001a")
            .with(Attr::Host, "cc3-p")
            .with(Attr::InstanceId, "42")
            .with(Attr::Dev, "vdb")
            .with(Attr::Domain, "instance-0000002a");

        assert_eq!(
            reconciler.admit(&attachment, &mut rows),
            Admission::Matched(0)
        );
        let row = &rows[0];
        assert_eq!(row.get(Attr::Dev), Some("vdb"));
        assert_eq!(row.source_of(Attr::Dev), Some(SourceKind::HypervisorAttachment));
        assert_eq!(row.source_of(Attr::Host), Some(SourceKind::Database));
        assert_eq!(row.get(Attr::Domain), None);
    }

    #[test]
    fn missing_attribute_on_either_side_rejects_the_row() {
        let (matrix, profiles) = default_tables();
        let reconciler = Reconciler::new(&matrix, &profiles);
        let mut rows = Vec::new();

        // Detached volume: the database knows no host or instance.
        let detached = NormalizedRecord::new(SourceKind::Database)
            .with(Attr::VolumeId, "volume-00000020")
            .with(Attr::Status, "available");
        reconciler.admit(&detached, &mut rows);

        let attachment = NormalizedRecord::new(SourceKind::HypervisorAttachment)
            .with(Attr::VolumeId, "volume-00000020")
            .with(Attr::Host, "cc7-p")
            .with(Attr::InstanceId, "9")
            .with(Attr::Dev, "vdc");
        assert_eq!(
            reconciler.admit(&attachment, &mut rows),
            Admission::Created(1)
        );

        let incomplete = NormalizedRecord::new(SourceKind::HypervisorAttachment)
            .with(Attr::VolumeId, "volume-00000020")
            .with(Attr::Dev, "vdd");
        assert_eq!(
            reconciler.admit(&incomplete, &mut rows),
            Admission::Created(2)
        );
        assert_eq!(rows[0].presence_indicator(), "-d--");
    }

    #[test]
    fn rejection_by_one_confirmed_kind_overrides_agreement_with_another() {
        let (matrix, profiles) = default_tables();
        let reconciler = Reconciler::new(&matrix, &profiles);
        let mut rows = Vec::new();

        let mut seeded = db("volume-00000031", "cc1-p", "7");
        seeded.attrs.insert(Attr::Ip, "10.1.0.9".to_string());
        reconciler.admit(&seeded, &mut rows);

        let session = NormalizedRecord::new(SourceKind::HypervisorSession)
            .with(Attr::VolumeId, "volume-00000031")
            .with(Attr::Ip, "10.1.0.9")
            .with(Attr::Host, "cc1-p")
            .with(Attr::Mode, "tcp");
        assert_eq!(reconciler.admit(&session, &mut rows), Admission::Matched(0));

        // Agrees with the session on volume and host but not with the
        // database on instance id.
        let attachment = NormalizedRecord::new(SourceKind::HypervisorAttachment)
            .with(Attr::VolumeId, "volume-00000031")
            .with(Attr::Host, "cc1-p")
            .with(Attr::InstanceId, "8")
            .with(Attr::Dev, "vdb");
        assert_eq!(
            reconciler.admit(&attachment, &mut rows),
            Admission::Created(1)
        );
        assert_eq!(rows[0].presence_indicator(), "-di-");
        assert_eq!(rows[1].presence_indicator(), "---v");
    }

    #[test]
    fn report_counts_every_admission_once() {
        let (matrix, profiles) = default_tables();
        let reconciler = Reconciler::new(&matrix, &profiles);

        let sources: SourceRecords = vec![
            NormalizedRecord::new(SourceKind::TargetExport)
                .with(Attr::VolumeId, "volume-0000001a")
                .with(Attr::Sessions, "1"),
            db("volume-0000001a", "cc3-p", "42"),
            db("volume-0000001b", "cc3-p", "42"),
        ]
        .into_iter()
        .collect();

        let run = reconciler.reconcile(&sources);
        assert_eq!(run.report.records_admitted, 3);
        assert_eq!(run.report.rows_created, 2);
        assert_eq!(run.report.rows_matched, 1);
        let export = &run.report.by_kind[&SourceKind::TargetExport];
        assert_eq!(export.rows_matched, 1);
        assert_eq!(run.presence_counts().get("td--"), Some(&1));
        assert_eq!(run.presence_counts().get("-d--"), Some(&1));

        let encoded = serde_json::to_value(&run.report).expect("encode report");
        assert_eq!(encoded["by_kind"]["database"]["rows_created"], 2);
    }

    #[test]
    fn empty_input_yields_no_rows() {
        let (matrix, profiles) = default_tables();
        let run = Reconciler::new(&matrix, &profiles).reconcile(&SourceRecords::new());
        assert!(run.rows.is_empty());
        assert_eq!(run.report, ReconcileReport::default());
    }
}
