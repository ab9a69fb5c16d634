use crate::types::{ScanReport, Severity};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};

#[derive(Serialize)]
struct JsonReport<'a> {
    tool: &'static str,
    version: &'static str,
    summary: Summary,
    #[serde(flatten)]
    report: &'a ScanReport,
}

#[derive(Serialize)]
struct Summary {
    files_scanned: usize,
    files_failed: usize,
    total_findings: usize,
    by_severity: BTreeMap<Severity, usize>,
    max_severity: Option<Severity>,
}

pub(super) fn write_report<W: Write>(report: &ScanReport, writer: &mut W) -> io::Result<()> {
    let output = JsonReport {
        tool: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        summary: Summary {
            files_scanned: report.files.len(),
            files_failed: report.errors.len(),
            total_findings: report.total_findings(),
            by_severity: report.count_by_severity(),
            max_severity: report.max_severity(),
        },
        report,
    };
    serde_json::to_writer_pretty(&mut *writer, &output)?;
    writeln!(writer)
}
