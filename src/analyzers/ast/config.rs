//! Settings passed to every rule invocation.

use crate::error::{Error, Result};
use crate::rules::{builtin_rules, find_rule};
use crate::types::Severity;
use std::collections::{BTreeMap, BTreeSet};

/// Which rules run and how their findings are filtered.
///
/// Built once from configuration and handed to the analyzer by value; rules
/// never read settings from anywhere else.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    /// Rule ids to run, normalized to upper case.
    pub enabled_rules: BTreeSet<String>,
    /// Findings below this severity are dropped.
    pub min_severity: Severity,
    /// Per-rule severity replacing the one the rule reports.
    pub severity_overrides: BTreeMap<String, Severity>,
    /// Extra whitelist regexes, matched against lower-cased text.
    pub whitelist_patterns: Vec<String>,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            enabled_rules: builtin_rules().iter().map(|r| r.id.to_string()).collect(),
            min_severity: Severity::Information,
            severity_overrides: BTreeMap::new(),
            whitelist_patterns: Vec::new(),
        }
    }
}

impl AnalyzerSettings {
    /// Resolve include/exclude lists into the enabled rule set.
    ///
    /// An empty `include` means every built-in rule. Unknown ids are errors.
    pub fn with_rules(mut self, include: &[String], exclude: &[String]) -> Result<Self> {
        let mut enabled: BTreeSet<String> = if include.is_empty() {
            builtin_rules().iter().map(|r| r.id.to_string()).collect()
        } else {
            include.iter().map(|id| canonical_rule_id(id)).collect::<Result<_>>()?
        };
        for id in exclude {
            enabled.remove(&canonical_rule_id(id)?);
        }
        self.enabled_rules = enabled;
        Ok(self)
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn with_severity_override(mut self, rule_id: &str, severity: Severity) -> Result<Self> {
        self.severity_overrides
            .insert(canonical_rule_id(rule_id)?, severity);
        Ok(self)
    }

    pub fn with_whitelist_patterns(mut self, patterns: Vec<String>) -> Self {
        self.whitelist_patterns = patterns;
        self
    }

    pub fn is_enabled(&self, rule_id: &str) -> bool {
        self.enabled_rules.contains(rule_id)
    }

    /// Severity a finding of `rule_id` is reported with.
    pub fn effective_severity(&self, rule_id: &str, reported: Severity) -> Severity {
        self.severity_overrides
            .get(rule_id)
            .copied()
            .unwrap_or(reported)
    }

    /// Check that every id refers to a built-in rule.
    pub fn validate(&self) -> Result<()> {
        for id in self.enabled_rules.iter().chain(self.severity_overrides.keys()) {
            canonical_rule_id(id)?;
        }
        Ok(())
    }
}

fn canonical_rule_id(id: &str) -> Result<String> {
    find_rule(id)
        .map(|r| r.id.to_string())
        .ok_or_else(|| Error::UnknownRule(id.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enables_all_rules() {
        let settings = AnalyzerSettings::default();
        assert_eq!(settings.enabled_rules.len(), 4);
        assert!(settings.is_enabled("AD-001"));
    }

    #[test]
    fn test_include_and_exclude() {
        let settings = AnalyzerSettings::default()
            .with_rules(&["cred-001".into(), "EXEC-001".into()], &["exec-001".into()])
            .unwrap();
        assert!(settings.is_enabled("CRED-001"));
        assert!(!settings.is_enabled("EXEC-001"));
        assert!(!settings.is_enabled("AD-001"));
    }

    #[test]
    fn test_unknown_rule_is_rejected() {
        let err = AnalyzerSettings::default()
            .with_rules(&[], &["NOPE-1".into()])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownRule(id) if id == "NOPE-1"));
    }

    #[test]
    fn test_severity_override() {
        let settings = AnalyzerSettings::default()
            .with_severity_override("ad-001", Severity::Warning)
            .unwrap();
        assert_eq!(
            settings.effective_severity("AD-001", Severity::Information),
            Severity::Warning
        );
        assert_eq!(
            settings.effective_severity("CRED-001", Severity::Error),
            Severity::Error
        );
    }
}
