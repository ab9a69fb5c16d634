//! Configuration file support.
//!
//! Looked up in `./fasguard.toml`, then `<config_dir>/fasguard/config.toml`.
//! Every section and key is optional.

use crate::analyzers::AnalyzerSettings;
use crate::error::{Error, Result};
use crate::scanner::ScanConfig;
use crate::scope::default_exclude_patterns;
use crate::types::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PROJECT_CONFIG_NAME: &str = "fasguard.toml";
const USER_CONFIG_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub whitelist: WhitelistConfig,
    pub scan: ScanSection,
}

/// Rule selection and severity handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rule ids to run; empty runs every built-in rule.
    pub include_rules: Vec<String>,
    pub exclude_rules: Vec<String>,
    pub min_severity: Severity,
    /// Per-rule severity override, keyed by rule id.
    pub severity: BTreeMap<String, Severity>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            include_rules: Vec::new(),
            exclude_rules: Vec::new(),
            min_severity: Severity::Information,
            severity: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitelistConfig {
    /// Extra regexes, matched against lower-cased text.
    pub patterns: Vec<String>,
}

/// File discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    /// Files larger than this (in bytes) are reported as errors, not analyzed.
    pub max_file_size: u64,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            extensions: vec!["ps1".to_string(), "psm1".to_string()],
            exclude: default_exclude_patterns(),
            max_file_size: 1024 * 1024,
        }
    }
}

impl Config {
    /// Load a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config = toml::from_str(&content)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load the first config file found in the default locations, or the
    /// built-in defaults when there is none.
    pub fn load_default() -> Result<Self> {
        for path in Self::default_paths() {
            if path.is_file() {
                return Self::load(&path);
            }
        }
        debug!("no config file found, using defaults");
        Ok(Self::default())
    }

    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(PROJECT_CONFIG_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("fasguard").join(USER_CONFIG_NAME));
        }
        paths
    }

    /// Rule settings derived from `[analysis]` and `[whitelist]`.
    pub fn to_settings(&self) -> Result<AnalyzerSettings> {
        let mut settings = AnalyzerSettings::default()
            .with_rules(&self.analysis.include_rules, &self.analysis.exclude_rules)?
            .with_min_severity(self.analysis.min_severity)
            .with_whitelist_patterns(self.whitelist.patterns.clone());
        for (rule_id, severity) in &self.analysis.severity {
            settings = settings.with_severity_override(rule_id, *severity)?;
        }
        Ok(settings)
    }

    pub fn to_scan_config(&self) -> Result<ScanConfig> {
        Ok(ScanConfig {
            settings: self.to_settings()?,
            extensions: self.scan.extensions.clone(),
            exclude: self.scan.exclude.clone(),
            max_file_size: self.scan.max_file_size,
            ..Default::default()
        })
    }
}

/// Commented default config written by `fasguard init`.
pub fn generate_default_config() -> String {
    r#"# fasguard configuration

[analysis]
# Rules to run. Empty runs every built-in rule (see `fasguard rules`).
include_rules = []
exclude_rules = []
# Findings below this severity are not reported: information, warning, error.
min_severity = "information"

# Per-rule severity override.
[analysis.severity]
# "AD-001" = "warning"

[whitelist]
# Extra regexes for values that are never secrets. Matched against
# lower-cased text, so write patterns in lower case.
patterns = []

[scan]
extensions = ["ps1", "psm1"]
exclude = ["**/.git/**", "**/.svn/**", "**/node_modules/**"]
# Bytes. Larger files are listed as errors and not analyzed.
max_file_size = 1048576
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [analysis]
            exclude_rules = ["AD-001"]
            min_severity = "warn"

            [analysis.severity]
            "exec-001" = "warning"
            "#,
        )
        .unwrap();
        assert_eq!(config.scan, ScanSection::default());

        let settings = config.to_settings().unwrap();
        assert!(!settings.is_enabled("AD-001"));
        assert!(settings.is_enabled("CRED-001"));
        assert_eq!(settings.min_severity, Severity::Warning);
        assert_eq!(
            settings.effective_severity("EXEC-001", Severity::Error),
            Severity::Warning
        );
    }

    #[test]
    fn test_unknown_rule_is_a_config_error() {
        let config: Config = toml::from_str("[analysis]\ninclude_rules = [\"CRED-999\"]").unwrap();
        assert!(matches!(config.to_settings(), Err(Error::UnknownRule(_))));
    }

    #[test]
    fn test_load_reports_toml_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[analysis\nmin_severity = 1").unwrap();
        assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load(Path::new("/no/such/fasguard.toml")),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_scan_config_carries_scan_section() {
        let mut config = Config::default();
        config.scan.extensions = vec!["ps1".into()];
        config.scan.max_file_size = 42;
        let scan = config.to_scan_config().unwrap();
        assert_eq!(scan.extensions, vec!["ps1".to_string()]);
        assert_eq!(scan.max_file_size, 42);
    }
}
