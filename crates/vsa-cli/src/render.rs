use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use vsa_core::{Attr, ComparisonMatrix, ConsensusRow};
use vsa_reconcile::{ReconcileReport, Reconciliation};

const PRESENCE_WIDTH: usize = 3;

const COLUMNS: [(Attr, usize); 9] = [
    (Attr::VolumeId, 15),
    (Attr::Id, 6),
    (Attr::Mode, 4),
    (Attr::Status, 14),
    (Attr::Ip, 15),
    (Attr::Host, 7),
    (Attr::InstanceUuid, 36),
    (Attr::Dev, 10),
    (Attr::Sessions, 8),
];

/// Fixed-width report, one line per row after a header line. Absent values
/// print as `-`.
pub fn table(rows: &[ConsensusRow]) -> String {
    let mut out = String::new();

    let mut header = format!("{:>PRESENCE_WIDTH$}", "TDIV");
    for (attr, width) in COLUMNS {
        let _ = write!(header, " {:>width$}", attr.as_str());
    }
    out.push_str(&header);
    out.push('\n');

    for row in rows {
        let mut line = format!("{:>PRESENCE_WIDTH$}", row.presence_indicator());
        for (attr, width) in COLUMNS {
            let _ = write!(line, " {:>width$}", row.get(attr).unwrap_or("-"));
        }
        out.push_str(&line);
        out.push('\n');
    }

    out
}

#[derive(Debug, Serialize)]
struct JsonRow<'a> {
    presence: String,
    #[serde(flatten)]
    attrs: BTreeMap<Attr, &'a str>,
}

#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    pub rows: usize,
    #[serde(flatten)]
    pub report: &'a ReconcileReport,
    pub presence: BTreeMap<String, usize>,
}

impl<'a> Summary<'a> {
    pub fn of(run: &'a Reconciliation) -> Self {
        Self {
            rows: run.rows.len(),
            report: &run.report,
            presence: run.presence_counts(),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    rows: Vec<JsonRow<'a>>,
    summary: Summary<'a>,
}

pub fn json(run: &Reconciliation) -> Result<String> {
    let report = JsonReport {
        rows: run
            .rows
            .iter()
            .map(|row| JsonRow {
                presence: row.presence_indicator(),
                attrs: row.attrs().collect(),
            })
            .collect(),
        summary: Summary::of(run),
    };
    serde_json::to_string_pretty(&report).context("failed to encode report")
}

/// One line per unordered pair of kinds.
pub fn matrix(matrix: &ComparisonMatrix) -> String {
    let mut out = String::new();
    for (left, right, keys) in matrix.pairs().filter(|(left, right, _)| left <= right) {
        let keys = keys.iter().map(Attr::as_str).collect::<Vec<_>>().join(", ");
        let _ = writeln!(out, "{left} <-> {right}: {keys}");
    }
    out
}
