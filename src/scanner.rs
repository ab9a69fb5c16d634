//! File discovery and concurrent scanning.
//!
//! Files are discovered with `walkdir`, filtered through a [`PathScope`],
//! then analyzed on the blocking pool. All tasks share one analyzer; the
//! report is sorted by path so output does not depend on task scheduling.

use crate::analyzers::{AnalyzerSettings, AstAnalyzer};
use crate::error::{Error, Result};
use crate::scope::{default_exclude_patterns, PathScope};
use crate::types::{FileError, FileReport, ScanReport};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Configuration for a scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub settings: AnalyzerSettings,
    /// File extensions to scan, without the dot.
    pub extensions: Vec<String>,
    /// Glob patterns (relative to the scan root) to skip.
    pub exclude: Vec<String>,
    pub max_file_size: u64,
    /// Maximum number of files analyzed at once.
    pub concurrency: usize,
    pub show_progress: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            settings: AnalyzerSettings::default(),
            extensions: vec!["ps1".to_string(), "psm1".to_string()],
            exclude: default_exclude_patterns(),
            max_file_size: 1024 * 1024,
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            show_progress: true,
        }
    }
}

/// Scans files and directories for script security issues.
pub struct Scanner {
    config: ScanConfig,
    scope: PathScope,
    analyzer: Arc<AstAnalyzer>,
}

impl Scanner {
    pub fn new() -> Result<Self> {
        Self::with_config(ScanConfig::default())
    }

    pub fn with_config(config: ScanConfig) -> Result<Self> {
        let analyzer = AstAnalyzer::with_settings(config.settings.clone())?;
        let scope = PathScope::new(&config.extensions, &config.exclude)?;
        Ok(Self {
            config,
            scope,
            analyzer: Arc::new(analyzer),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &AstAnalyzer {
        &self.analyzer
    }

    /// Scan a single file or directory.
    pub async fn scan_path(&self, path: &Path) -> Result<ScanReport> {
        self.scan_paths(&[path.to_path_buf()]).await
    }

    /// Scan several files or directories into one report.
    pub async fn scan_paths(&self, paths: &[PathBuf]) -> Result<ScanReport> {
        let started = Instant::now();
        let mut report = ScanReport::new();

        let mut files = Vec::new();
        for path in paths {
            files.extend(self.discover(path)?);
        }
        files.sort();
        files.dedup();
        info!(files = files.len(), "scanning");

        let progress = self.progress_bar(files.len());
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for file in files {
            let analyzer = Arc::clone(&self.analyzer);
            let permits = Arc::clone(&permits);
            let max_file_size = self.config.max_file_size;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let path = file.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || scan_file(&analyzer, &path, max_file_size))
                        .await;
                (file, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Some(bar) = &progress {
                bar.inc(1);
            }
            let (path, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "scan task failed");
                    continue;
                }
            };
            match outcome {
                Ok(Ok(file_report)) => report.files.push(file_report),
                Ok(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    report.errors.push(FileError {
                        path,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "analysis task failed");
                    report.errors.push(FileError {
                        path,
                        message: e.to_string(),
                    });
                }
            }
        }
        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        report.files.sort_by(|a, b| a.path.cmp(&b.path));
        report.errors.sort_by(|a, b| a.path.cmp(&b.path));
        report.duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            files = report.files.len(),
            errors = report.errors.len(),
            findings = report.total_findings(),
            duration_ms = report.duration_ms,
            "scan finished"
        );
        Ok(report)
    }

    /// Files under `path` that the scope accepts, sorted.
    ///
    /// A file given directly is scanned whatever its extension.
    pub fn discover(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let metadata = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
        if metadata.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }

        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let relative = e.path().strip_prefix(path).unwrap_or(e.path());
                self.scope.includes(relative)
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();
        Ok(files)
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.config.show_progress || total <= 1 || !std::io::stderr().is_terminal() {
            return None;
        }
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        Some(bar)
    }
}

/// Read, hash and analyze one file.
///
/// A file larger than `max_file_size` is an [`Error::FileTooLarge`].
pub fn scan_file(analyzer: &AstAnalyzer, path: &Path, max_file_size: u64) -> Result<FileReport> {
    let started = Instant::now();
    let size = std::fs::metadata(path).map_err(|e| Error::io(path, e))?.len();
    if size > max_file_size {
        return Err(Error::FileTooLarge {
            size,
            limit: max_file_size,
        });
    }

    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let sha256 = format!("{:x}", Sha256::digest(&bytes));
    let source = decode_script(&bytes);
    let findings = analyzer.analyze_source(&source)?;

    let scan_time_ms = started.elapsed().as_millis() as u64;
    debug!(path = %path.display(), findings = findings.len(), scan_time_ms, "file scanned");
    Ok(FileReport {
        path: path.to_path_buf(),
        sha256,
        scan_time_ms,
        findings,
    })
}

/// Decode script bytes, honoring the UTF-8 and UTF-16 byte order marks
/// Windows PowerShell editors write.
fn decode_script(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn quiet_config() -> ScanConfig {
        ScanConfig {
            show_progress: false,
            ..Default::default()
        }
    }

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_discover_filters_extensions_and_excludes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "Deploy.ps1", b"Get-Date");
        write(&dir, "lib/FasTools.psm1", b"Get-Date");
        write(&dir, "notes.txt", b"Get-Date");
        write(&dir, ".git/hooks/hook.ps1", b"Get-Date");

        let scanner = Scanner::with_config(quiet_config()).unwrap();
        let files = scanner.discover(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![PathBuf::from("Deploy.ps1"), PathBuf::from("lib/FasTools.psm1")]
        );
    }

    #[test]
    fn test_discover_missing_path_is_an_error() {
        let scanner = Scanner::with_config(quiet_config()).unwrap();
        assert!(scanner.discover(Path::new("/definitely/not/here")).is_err());
    }

    #[tokio::test]
    async fn test_scan_directory_reports_sorted_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.ps1", b"$password = \"MyPassword123\"");
        write(&dir, "a.ps1", b"Invoke-Expression \"Get-Process\"");
        write(&dir, "c.ps1", b"Write-Output 'clean'");

        let scanner = Scanner::with_config(quiet_config()).unwrap();
        let report = scanner.scan_path(dir.path()).await.unwrap();

        assert_eq!(report.files.len(), 3);
        assert!(report.files.windows(2).all(|w| w[0].path < w[1].path));
        assert_eq!(report.files[0].findings[0].rule_id, "EXEC-001");
        assert_eq!(report.files[1].findings[0].rule_id, "CRED-001");
        assert!(report.files[2].findings.is_empty());
        assert_eq!(report.files[0].sha256.len(), 64);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_parse_errors_are_recorded_and_scan_continues() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.ps1", b"$a = 'open");
        write(&dir, "good.ps1", b"$password = \"MyPassword123\"");

        let scanner = Scanner::with_config(quiet_config()).unwrap();
        let report = scanner.scan_path(dir.path()).await.unwrap();

        assert_eq!(report.files.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].path.ends_with("broken.ps1"));
        assert_eq!(report.total_findings(), 1);
    }

    #[tokio::test]
    async fn test_oversized_files_are_reported_as_not_analyzed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "big.ps1", "$password = \"MyPassword123\"\n".repeat(10).as_bytes());
        write(&dir, "small.ps1", b"Get-Date");

        let config = ScanConfig {
            max_file_size: 16,
            ..quiet_config()
        };
        let report = Scanner::with_config(config).unwrap().scan_path(dir.path()).await.unwrap();
        assert_eq!(report.files.len(), 1);
        assert!(report.files[0].path.ends_with("small.ps1"));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].path.ends_with("big.ps1"));
        assert!(report.errors[0].message.contains("max_file_size"));
    }

    #[tokio::test]
    async fn test_deeply_nested_file_does_not_stop_the_scan() {
        let dir = TempDir::new().unwrap();
        let nested = format!("$x = {}1{}", "(".repeat(10_000), ")".repeat(10_000));
        write(&dir, "nested.ps1", nested.as_bytes());
        write(&dir, "plain.ps1", b"$password = \"MyPassword123\"");

        let report = Scanner::with_config(quiet_config()).unwrap().scan_path(dir.path()).await.unwrap();
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.total_findings(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("nesting too deep"));
    }

    #[test]
    fn test_utf16_script_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "$password = \"MyPassword123\"".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "utf16.ps1", &bytes);

        let report = scan_file(&AstAnalyzer::new(), &path, 1024).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].rule_id, "CRED-001");
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        assert_eq!(decode_script(b"\xEF\xBB\xBFGet-Date"), "Get-Date");
    }
}
