//! Detector for directory-service identity mistakes in FAS deployment scripts.
//!
//! Detects patterns like:
//! - `$group = "S-1-5-21-123"` (malformed SID)
//! - `param([string]$FASSecurityGroupSID)` (no `ValidatePattern`, no help)
//! - `param($UserDomain, $FASDomain)` with no check that they agree
//! - `"jdoe@corp"` (UPN without a DNS suffix)
//! - `Get-ADGroup $name` outside `try`

use super::{Detector, RuleContext};
use crate::analyzers::ast::syntax::{Attribute, Node, NodeKind, QuoteKind, SyntaxTree};
use crate::rules::patterns::is_placeholder;
use crate::rules::AD_CONSISTENCY;
use crate::types::{Finding, FindingCategory, Severity};
use regex::Regex;
use std::sync::LazyLock;

static DOMAIN_SID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^S-1-5-21-\d{10}-\d{10}-\d{10}-\d{4,5}$").expect("domain SID pattern must compile")
});

static WELL_KNOWN_SID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^S-1-(?:[0-4]-\d{1,10}|5-\d{1,2}|5-32-\d{3})$").expect("well-known SID pattern must compile")
});

static DOMAIN_PARAMETER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(user|computer|fas|ca|dc)(domain|domainname)$").expect("domain parameter pattern must compile")
});

/// A comparison involving a `*domain*` variable.
static DOMAIN_COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\w*domain\w*\s+-[ic]?(?:eq|ne)\b|-[ic]?(?:eq|ne)\s+\$\w*domain")
        .expect("domain comparison pattern must compile")
});

static UPN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("UPN pattern must compile")
});

static FAS_GROUP_SID_PARAMETER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^fas\w*sid$|^\w*securitygroupsid$").expect("FAS group SID pattern must compile")
});

static AD_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(get|set|new|remove|add)-ad(user|group|groupmember|domain|forest|computer|object)$")
        .expect("AD command pattern must compile")
});

pub struct AdConsistencyDetector;

impl AdConsistencyDetector {
    pub fn new() -> Self {
        Self
    }

    /// String literals that start with the SID prefix and are not interpolated.
    fn sid_literals<'t>(tree: &'t SyntaxTree) -> Vec<(Node<'t>, &'t str)> {
        tree.string_literals()
            .into_iter()
            .filter_map(|node| match node.kind() {
                NodeKind::StringLiteral { value, quote } => {
                    let value = value.trim();
                    let prefixed = value.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("S-1-"));
                    let dynamic = quote.is_expandable() && value.contains('$');
                    (prefixed && !dynamic).then_some((node, value))
                }
                _ => None,
            })
            .collect()
    }

    fn check_sid_format(&self, tree: &SyntaxTree) -> Vec<Finding> {
        Self::sid_literals(tree)
            .into_iter()
            .filter(|(_, sid)| !DOMAIN_SID.is_match(sid) && !WELL_KNOWN_SID.is_match(sid))
            .map(|(node, sid)| {
                self.finding(&node, Severity::Warning, format!("Malformed SID '{}'", sid))
                    .with_remediation("Domain SIDs have the form S-1-5-21-<10 digits>-<10 digits>-<10 digits>-<RID>")
                    .with_metadata("sid", sid)
            })
            .collect()
    }

    fn check_sid_defaults(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (node, sid) in Self::sid_literals(tree) {
            let Some(parameter) = node.enclosing_parameter() else {
                continue;
            };
            let NodeKind::ParameterDeclaration { name, attributes, .. } = parameter.kind() else {
                continue;
            };
            if has_sid_validation(attributes) {
                continue;
            }
            findings.push(
                self.finding(
                    &node,
                    Severity::Information,
                    format!("SID default '{}' of parameter ${} is not validated", sid, name),
                )
                .with_remediation("Add [ValidatePattern('^S-1-5-21-\\d+-\\d+-\\d+-\\d+$')] to the parameter"),
            );
        }
        findings
    }

    fn check_domain_parameters(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let parameters: Vec<_> = tree
            .parameters()
            .into_iter()
            .filter(|p| match p.kind() {
                NodeKind::ParameterDeclaration { name, .. } => DOMAIN_PARAMETER.is_match(name),
                _ => false,
            })
            .collect();
        if parameters.len() < 2 {
            return Vec::new();
        }
        // best effort: any domain comparison anywhere counts as a check
        let validated = parameters.iter().any(|p| match p.kind() {
            NodeKind::ParameterDeclaration { attributes, .. } => attributes
                .iter()
                .any(|a| a.is_named("ValidateScript") && a.arguments.to_ascii_lowercase().contains("domain")),
            _ => false,
        });
        if validated || DOMAIN_COMPARISON.is_match(tree.source()) {
            return Vec::new();
        }
        let names: Vec<String> = parameters
            .iter()
            .filter_map(|p| match p.kind() {
                NodeKind::ParameterDeclaration { name, .. } => Some(format!("${}", name)),
                _ => None,
            })
            .collect();
        vec![self
            .finding(
                &parameters[0],
                Severity::Information,
                format!(
                    "Domain parameters {} are never compared; a user/FAS domain mismatch goes unnoticed",
                    names.join(", ")
                ),
            )
            .with_remediation("Compare the domains (-eq/-ne) or add a [ValidateScript()] that checks them")]
    }

    fn check_upns(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in tree.string_literals() {
            let NodeKind::StringLiteral { value, quote } = node.kind() else {
                continue;
            };
            let value = value.trim();
            if !value.contains('@')
                || value.starts_with('@')
                || value.contains(char::is_whitespace)
                || value.contains("://")
                || (quote.is_expandable() && value.contains('$'))
                || (*quote == QuoteKind::Bare && value.starts_with('$'))
                || is_placeholder(value)
            {
                continue;
            }
            if UPN.is_match(value) {
                continue;
            }
            findings.push(
                self.finding(
                    &node,
                    Severity::Information,
                    format!("'{}' is not a valid user principal name", value),
                )
                .with_remediation("UPNs have the form user@domain.tld"),
            );
        }
        findings
    }

    fn check_group_sid_parameters(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let help = help_text(tree);
        let mut findings = Vec::new();
        for node in tree.parameters() {
            let NodeKind::ParameterDeclaration {
                name,
                attributes,
                comment,
                ..
            } = node.kind()
            else {
                continue;
            };
            if !FAS_GROUP_SID_PARAMETER.is_match(name) {
                continue;
            }
            if !attributes.iter().any(|a| a.is_named("ValidatePattern")) {
                findings.push(
                    self.finding(
                        &node,
                        Severity::Warning,
                        format!("FAS security group SID parameter ${} has no ValidatePattern", name),
                    )
                    .with_remediation("Add [ValidatePattern('^S-1-5-21-\\d+-\\d+-\\d+-\\d+$')]"),
                );
            }
            let documented = comment.is_some()
                || attributes
                    .iter()
                    .any(|a| a.arguments.to_ascii_lowercase().contains("helpmessage"))
                || help.contains(&format!(".parameter {}", name.to_ascii_lowercase()));
            if !documented {
                findings.push(
                    self.finding(
                        &node,
                        Severity::Information,
                        format!("FAS security group SID parameter ${} is not documented", name),
                    )
                    .with_remediation("Describe the expected group in a .PARAMETER help entry"),
                );
            }
        }
        findings
    }

    fn check_unguarded_ad_calls(&self, tree: &SyntaxTree) -> Vec<Finding> {
        tree.find_all(|n| n.command_name().is_some_and(|name| AD_COMMAND.is_match(name)))
            .into_iter()
            .filter(|node| !node.is_within_try())
            .map(|node| {
                let name = node.command_name().unwrap_or_default();
                self.finding(
                    &node,
                    Severity::Information,
                    format!("{} is called outside try/catch", name),
                )
                .with_remediation("Wrap AD calls in try/catch and use -ErrorAction Stop")
            })
            .collect()
    }
}

impl Default for AdConsistencyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for AdConsistencyDetector {
    fn rule_id(&self) -> &'static str {
        AD_CONSISTENCY
    }

    fn title(&self) -> &'static str {
        "Active Directory consistency"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::DirectoryConsistency
    }

    fn analyze(&self, tree: &SyntaxTree, _ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = self.check_sid_format(tree);
        findings.extend(self.check_sid_defaults(tree));
        findings.extend(self.check_domain_parameters(tree));
        findings.extend(self.check_upns(tree));
        findings.extend(self.check_group_sid_parameters(tree));
        findings.extend(self.check_unguarded_ad_calls(tree));
        findings
    }
}

fn has_sid_validation(attributes: &[Attribute]) -> bool {
    attributes
        .iter()
        .any(|a| a.is_named("ValidatePattern") && a.arguments.to_ascii_lowercase().contains("s-1-"))
}

/// Comment-based help of the script, lower-cased, whitespace collapsed.
fn help_text(tree: &SyntaxTree) -> String {
    tree.comments()
        .iter()
        .map(|c| c.text.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("\n")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::ast::config::AnalyzerSettings;
    use crate::analyzers::ast::parse_script;
    use crate::rules::patterns::Whitelist;

    fn analyze(source: &str) -> Vec<Finding> {
        let tree = parse_script(source).unwrap();
        let settings = AnalyzerSettings::default();
        let whitelist = Whitelist::builtin();
        let ctx = RuleContext {
            settings: &settings,
            whitelist: &whitelist,
        };
        AdConsistencyDetector::new().analyze(&tree, &ctx)
    }

    #[test]
    fn test_valid_domain_sid() {
        assert!(analyze("$sid = \"S-1-5-21-1234567890-1234567890-1234567890-1234\"").is_empty());
    }

    #[test]
    fn test_well_known_sids() {
        assert!(analyze("$admins = 'S-1-5-32-544'").is_empty());
        assert!(analyze("$everyone = 'S-1-1-0'").is_empty());
        assert!(analyze("$system = 'S-1-5-18'").is_empty());
    }

    #[test]
    fn test_malformed_sids_warn_once() {
        for sid in ["S-1-5-21-123", "S-1-5-21-1234567890-1234567890-1234567890", "S-1-X", "s-1-5-21-1-2-3-4"] {
            let findings = analyze(&format!("$sid = '{}'", sid));
            assert_eq!(findings.len(), 1, "{}", sid);
            assert_eq!(findings[0].severity, Severity::Warning);
            assert_eq!(findings[0].metadata["sid"], sid);
        }
    }

    #[test]
    fn test_interpolated_sid_is_skipped() {
        assert!(analyze("$sid = \"S-1-5-21-$domainPart-1001\"").is_empty());
    }

    #[test]
    fn test_unvalidated_sid_default() {
        let source = "param([string]$AdminSid = 'S-1-5-21-1234567890-1234567890-1234567890-500')";
        // the RID is too short for a domain account SID, so both checks fire
        let findings = analyze(source);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].severity, Severity::Information);

        let source = "param(\n  [ValidatePattern('^S-1-5-21-')]\n  [string]$AdminSid = 'S-1-5-21-1234567890-1234567890-1234567890-1500'\n)";
        assert!(analyze(source).is_empty());
    }

    #[test]
    fn test_domain_parameters_without_comparison() {
        let findings = analyze("param([string]$UserDomain, [string]$FASDomain)");
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("$UserDomain, $FASDomain"));
        assert!(findings[0].extent.contains("UserDomain"));

        let compared = "param([string]$UserDomain, [string]$FASDomain)\nif ($UserDomain -ne $FASDomain) { throw 'mismatch' }";
        assert!(analyze(compared).is_empty());

        assert!(analyze("param([string]$UserDomain)").is_empty());
    }

    #[test]
    fn test_upn_shapes() {
        assert!(analyze("$u = 'jdoe@corp.example.com'").is_empty());
        let findings = analyze("$u = 'jdoe@corp'");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Information);
        assert!(analyze("$u = 'https://user@host/path'").is_empty());
        assert!(analyze("$u = 'Contact admin@corp for help'").is_empty());
    }

    #[test]
    fn test_group_sid_parameter_checks() {
        let findings = analyze("param([string]$FASSecurityGroupSID)");
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[1].severity, Severity::Information);

        let documented = "<#\n.PARAMETER FASSecurityGroupSID\n  SID of the FAS users group.\n#>\nparam(\n  [ValidatePattern('^S-1-5-21-')]\n  [string]$FASSecurityGroupSID\n)";
        assert!(analyze(documented).is_empty());

        let help_message = "param([Parameter(HelpMessage = 'FAS users group')][ValidatePattern('^S-1-')][string]$FasGroupSid)";
        assert!(analyze(help_message).is_empty());
    }

    #[test]
    fn test_ad_calls_outside_try() {
        let source = "Get-ADUser -Identity $name\ntry { Add-ADGroupMember -Identity $g -Members $u } catch { Write-Warning $_ }";
        let findings = analyze(source);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.starts_with("Get-ADUser"));
    }
}
