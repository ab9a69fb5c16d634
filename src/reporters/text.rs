use crate::types::{Finding, ScanReport, Severity};
use colored::{ColoredString, Colorize};
use std::io::{self, Write};

pub(super) fn write_report<W: Write>(report: &ScanReport, w: &mut W) -> io::Result<()> {
    for file in &report.files {
        if file.findings.is_empty() {
            continue;
        }
        writeln!(w, "{}", file.path.display().to_string().bold().underline())?;
        for finding in &file.findings {
            write_finding(finding, w)?;
        }
        writeln!(w)?;
    }

    if !report.errors.is_empty() {
        writeln!(w, "{}", "Files not analyzed".bold().yellow())?;
        for error in &report.errors {
            writeln!(w, "  {}: {}", error.path.display(), error.message.dimmed())?;
        }
        writeln!(w)?;
    }

    write_summary(report, w)
}

fn write_finding<W: Write>(finding: &Finding, w: &mut W) -> io::Result<()> {
    writeln!(
        w,
        "  {:>5} {} [{}] {}",
        finding.range.to_string().dimmed(),
        severity_label(finding.severity),
        finding.rule_id.bright_cyan(),
        finding.message
    )?;
    if let Some(remediation) = &finding.remediation {
        writeln!(w, "        {} {}", "fix:".green(), remediation)?;
    }
    Ok(())
}

fn write_summary<W: Write>(report: &ScanReport, w: &mut W) -> io::Result<()> {
    let counts = report.count_by_severity();
    let total = report.total_findings();
    writeln!(w, "{}", "Summary".bold())?;
    writeln!(
        w,
        "  Files scanned: {}  ({} not analyzed)",
        report.files.len(),
        report.errors.len()
    )?;
    if total == 0 {
        writeln!(w, "  {}", "No issues found".green())?;
    } else {
        let parts: Vec<String> = Severity::all()
            .iter()
            .rev()
            .filter_map(|sev| counts.get(sev).map(|n| format!("{} {}", n, severity_label(*sev))))
            .collect();
        writeln!(w, "  Findings: {} ({})", total, parts.join(", "))?;
    }
    writeln!(w, "  Duration: {} ms", report.duration_ms)
}

fn severity_label(severity: Severity) -> ColoredString {
    let label = severity.to_string();
    match severity {
        Severity::Error => label.red().bold(),
        Severity::Warning => label.yellow(),
        Severity::Information => label.blue(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileError, FileReport, FindingCategory, SourceRange};
    use std::path::PathBuf;

    fn render(report: &ScanReport) -> String {
        colored::control::set_override(false);
        let mut out = Vec::new();
        write_report(report, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_text_lists_findings_and_summary() {
        let mut report = ScanReport::new();
        report.files.push(FileReport {
            path: PathBuf::from("Deploy.ps1"),
            sha256: String::new(),
            scan_time_ms: 0,
            findings: vec![Finding::new(
                "CRED-001",
                "Hardcoded credentials",
                "Password assignment in assignment to $password: 'My***********'",
                Severity::Error,
                FindingCategory::CredentialExposure,
                SourceRange {
                    start_line: 2,
                    start_column: 1,
                    ..Default::default()
                },
                "$password = \"MyPassword123\"",
            )
            .with_remediation("Use Get-Credential")],
        });
        report.errors.push(FileError {
            path: PathBuf::from("broken.ps1"),
            message: "parse error at 1:6: unterminated string".into(),
        });

        let text = render(&report);
        assert!(text.contains("Deploy.ps1"));
        assert!(text.contains("2:1 error [CRED-001]"));
        assert!(text.contains("fix: Use Get-Credential"));
        assert!(text.contains("broken.ps1: parse error"));
        assert!(text.contains("Findings: 1 (1 error)"));
    }

    #[test]
    fn test_clean_report() {
        let text = render(&ScanReport::new());
        assert!(text.contains("No issues found"));
    }
}
