//! Core types shared by the analyzer, the scanner and the reporters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Severity of a finding, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "info")]
    Information,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl Severity {
    pub fn all() -> [Severity; 3] {
        [Severity::Information, Severity::Warning, Severity::Error]
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

impl FromStr for Severity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" | "information" => Ok(Severity::Information),
            "warn" | "warning" => Ok(Severity::Warning),
            "err" | "error" => Ok(Severity::Error),
            _ => Err(crate::Error::InvalidSeverity(s.to_string())),
        }
    }
}

/// Broad risk category of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    CredentialExposure,
    CodeExecution,
    DirectoryConsistency,
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FindingCategory::CredentialExposure => "Credential Exposure",
            FindingCategory::CodeExecution => "Code Execution",
            FindingCategory::DirectoryConsistency => "Directory Consistency",
        };
        f.write_str(label)
    }
}

/// Location of a node in the script source.
///
/// Offsets are byte offsets into the source; lines and columns are 1-based,
/// columns counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SourceRange {
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl SourceRange {
    /// Whether `other` lies entirely inside this range.
    pub fn contains(&self, other: &SourceRange) -> bool {
        self.start_offset <= other.start_offset && other.end_offset <= self.end_offset
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_column)
    }
}

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub title: String,
    pub severity: Severity,
    pub category: FindingCategory,
    pub message: String,
    pub range: SourceRange,
    /// Source text of the offending node.
    pub extent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Finding {
    pub fn new(
        rule_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        category: FindingCategory,
        range: SourceRange,
        extent: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            title: title.into(),
            severity,
            category,
            message: message.into(),
            range,
            extent: extent.into(),
            remediation: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Findings for a single scanned file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub sha256: String,
    pub scan_time_ms: u64,
    pub findings: Vec<Finding>,
}

/// A file that could not be read or parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub path: PathBuf,
    pub message: String,
}

/// Aggregated result of a scan over one or more files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub files: Vec<FileReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FileError>,
}

impl ScanReport {
    pub fn new() -> Self {
        Self {
            started_at: chrono::Utc::now(),
            duration_ms: 0,
            files: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn total_findings(&self) -> usize {
        self.files.iter().map(|f| f.findings.len()).sum()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.files
            .iter()
            .flat_map(|f| f.findings.iter())
            .map(|f| f.severity)
            .max()
    }

    pub fn count_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for finding in self.files.iter().flat_map(|f| f.findings.iter()) {
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for ScanReport {
    fn default() -> Self {
        Self::new()
    }
}
