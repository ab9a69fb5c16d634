//! Metadata for the built-in security rules.

pub mod patterns;

use crate::types::{FindingCategory, Severity};
use serde::Serialize;

/// Description of a built-in rule, as shown by `fasguard rules`.
#[derive(Debug, Clone, Serialize)]
pub struct RuleInfo {
    /// Unique identifier, e.g. `CRED-001`.
    pub id: &'static str,
    /// Human-readable title.
    pub title: &'static str,
    /// What the rule detects.
    pub description: &'static str,
    /// Highest severity the rule reports.
    pub severity: Severity,
    pub category: FindingCategory,
    /// Suggested remediation.
    pub remediation: &'static str,
}

pub const HARDCODED_CREDENTIALS: &str = "CRED-001";
pub const PLAINTEXT_PASSWORD: &str = "CRED-002";
pub const DYNAMIC_EXECUTION: &str = "EXEC-001";
pub const AD_CONSISTENCY: &str = "AD-001";

static BUILTIN_RULES: [RuleInfo; 4] = [
    RuleInfo {
        id: HARDCODED_CREDENTIALS,
        title: "Hardcoded credentials",
        description: "Passwords, API keys, tokens, connection strings and URL credentials \
                      written as literals in the script, and ConvertTo-SecureString called \
                      on a literal string.",
        severity: Severity::Error,
        category: FindingCategory::CredentialExposure,
        remediation: "Prompt with Get-Credential or Read-Host -AsSecureString, or read the \
                      secret from a vault such as Microsoft.PowerShell.SecretManagement.",
    },
    RuleInfo {
        id: PLAINTEXT_PASSWORD,
        title: "Plain-text password handling",
        description: "Secret-named parameters typed as plain strings, ConvertTo-SecureString \
                      -AsPlainText on non-interactive input, and PSCredential objects built \
                      from plain-text passwords.",
        severity: Severity::Error,
        category: FindingCategory::CredentialExposure,
        remediation: "Declare secrets as [SecureString] and credentials as [PSCredential].",
    },
    RuleInfo {
        id: DYNAMIC_EXECUTION,
        title: "Dynamic code execution",
        description: "Invoke-Expression, script blocks created from strings, Add-Type with \
                      dynamic definitions, remote execution of dynamic script blocks, \
                      encoded commands and download-then-execute pipelines.",
        severity: Severity::Error,
        category: FindingCategory::CodeExecution,
        remediation: "Call commands directly with splatted parameters instead of evaluating \
                      strings as code.",
    },
    RuleInfo {
        id: AD_CONSISTENCY,
        title: "Active Directory consistency",
        description: "Malformed SIDs and UPNs, unvalidated FAS security group SID parameters, \
                      user/FAS domain parameters without a consistency check, and AD cmdlets \
                      called without error handling.",
        severity: Severity::Warning,
        category: FindingCategory::DirectoryConsistency,
        remediation: "Validate SID parameters with [ValidatePattern('^S-1-5-21-...')] and \
                      wrap AD calls in try/catch.",
    },
];

/// All built-in rules, in the order they run.
pub fn builtin_rules() -> &'static [RuleInfo] {
    &BUILTIN_RULES
}

/// Look up a rule by id, ignoring case.
pub fn find_rule(id: &str) -> Option<&'static RuleInfo> {
    BUILTIN_RULES.iter().find(|r| r.id.eq_ignore_ascii_case(id.trim()))
}
