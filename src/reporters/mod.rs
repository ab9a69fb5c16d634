//! Report output formats.

mod json;
mod text;

use crate::types::ScanReport;
use std::io::{self, Write};
use std::str::FromStr;

/// Output format for scan reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" | "cli" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {} (expected text or json)", s)),
        }
    }
}

/// Write a report in the given format.
pub fn report<W: Write>(scan_report: &ScanReport, format: OutputFormat, writer: &mut W) -> io::Result<()> {
    match format {
        OutputFormat::Text => text::write_report(scan_report, writer),
        OutputFormat::Json => json::write_report(scan_report, writer),
    }
}
