//! Detector for secrets handled as plain strings.
//!
//! Detects patterns like:
//! - `param([string]$Password)`
//! - `ConvertTo-SecureString $plain -AsPlainText -Force`
//! - `New-Object PSCredential($user, $plainPassword)`

use super::{assigned_values, bare_variable, is_literal_string, short_type_name, split_arguments, Detector, RuleContext};
use crate::analyzers::ast::syntax::{Node, NodeKind, SyntaxTree};
use crate::rules::PLAINTEXT_PASSWORD;
use crate::types::{Finding, FindingCategory, Severity};
use regex::Regex;
use std::sync::LazyLock;

static SECRET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|pwd|pass|secret|key|credential|cred)").expect("secret name pattern must compile")
});

static CREDENTIAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cred").expect("credential name pattern must compile"));

/// Parameter names that match the secret pattern but hold no secret.
const NOT_SECRETS: &[&str] = &["PassThru"];

const PLAIN_TYPES: &[&str] = &["string", "string[]", "system.string", "system.string[]"];

/// Values that produce a secure string or a credential.
static SECURE_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)convertto-securestring|read-host\b.*-assecurestring|get-credential|\[securestring\]|\[system\.security\.securestring\]|\.getnetworkcredential\(|get-secret")
        .expect("secure source pattern must compile")
});

pub struct PlaintextPasswordDetector;

impl PlaintextPasswordDetector {
    pub fn new() -> Self {
        Self
    }

    fn check_parameters(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in tree.parameters() {
            let NodeKind::ParameterDeclaration {
                name,
                type_name,
                attributes,
                ..
            } = node.kind()
            else {
                continue;
            };
            if !SECRET_NAME.is_match(name) || NOT_SECRETS.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                continue;
            }
            if attributes.iter().any(|a| a.is_named("Credential")) {
                continue;
            }
            let plain = match type_name {
                None => true,
                Some(t) => PLAIN_TYPES.contains(&t.trim().to_ascii_lowercase().as_str()),
            };
            if !plain {
                continue;
            }
            let declared = type_name
                .as_deref()
                .map_or_else(|| "untyped".to_string(), |t| format!("[{}]", t));
            let recommended = if CREDENTIAL_NAME.is_match(name) {
                "[PSCredential]"
            } else {
                "[SecureString]"
            };
            findings.push(
                self.finding(
                    &node,
                    Severity::Error,
                    format!(
                        "Parameter '${}' holds a secret but is declared {}; use {} instead",
                        name, declared, recommended
                    ),
                )
                .with_remediation(format!("Declare the parameter as {}${}", recommended, name))
                .with_metadata("parameter", name.clone()),
            );
        }
        findings
    }

    fn check_plaintext_conversions(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in tree.commands_named(&["ConvertTo-SecureString"]) {
            if !node.has_switch("AsPlainText") || input_is_prompted(tree, &node) {
                continue;
            }
            let forced = node.has_switch("Force");
            let (severity, message) = if forced && !node.is_within_try() {
                (
                    Severity::Error,
                    "ConvertTo-SecureString -AsPlainText -Force converts a non-interactive plain-text secret without error handling",
                )
            } else {
                (
                    Severity::Warning,
                    "ConvertTo-SecureString -AsPlainText converts a plain-text secret that was not entered interactively",
                )
            };
            findings.push(
                self.finding(&node, severity, message.to_string())
                    .with_remediation("Use Read-Host -AsSecureString or Get-Credential to obtain the secret"),
            );
        }
        findings
    }

    fn check_credential_objects(&self, tree: &SyntaxTree, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        let candidates = tree.find_all(|n| match n.kind() {
            NodeKind::CommandInvocation { name, .. } => name.eq_ignore_ascii_case("New-Object"),
            NodeKind::MemberInvocation {
                target,
                member,
                is_static,
                ..
            } => *is_static && member.eq_ignore_ascii_case("new") && short_type_name(target) == "pscredential",
            _ => false,
        });
        for node in candidates {
            let Some(password) = credential_password_argument(&node) else {
                continue;
            };
            if is_literal_string(password) {
                if ctx.whitelist.is_whitelisted(password) {
                    continue;
                }
                findings.push(
                    self.finding(
                        &node,
                        Severity::Error,
                        "PSCredential is built from a literal password".to_string(),
                    )
                    .with_remediation("Build credentials with Get-Credential"),
                );
            } else if let Some(variable) = bare_variable(password) {
                if !is_secure_variable(tree, variable) {
                    findings.push(
                        self.finding(
                            &node,
                            Severity::Warning,
                            format!(
                                "PSCredential is built from ${} which is not a SecureString",
                                variable
                            ),
                        )
                        .with_remediation("Convert the password with Read-Host -AsSecureString before building the credential")
                        .with_metadata("variable", variable),
                    );
                }
            }
        }
        findings
    }
}

impl Default for PlaintextPasswordDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for PlaintextPasswordDetector {
    fn rule_id(&self) -> &'static str {
        PLAINTEXT_PASSWORD
    }

    fn title(&self) -> &'static str {
        "Plain-text password handling"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::CredentialExposure
    }

    fn analyze(&self, tree: &SyntaxTree, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = self.check_parameters(tree);
        findings.extend(self.check_plaintext_conversions(tree));
        findings.extend(self.check_credential_objects(tree, ctx));
        findings
    }
}

/// Whether the text converted by ConvertTo-SecureString came from Read-Host.
fn input_is_prompted(tree: &SyntaxTree, node: &Node<'_>) -> bool {
    let from_read_host = |text: &str| text.to_ascii_lowercase().contains("read-host");
    if let Some(previous) = node.pipeline_predecessor() {
        if from_read_host(previous.text()) {
            return true;
        }
    }
    let input = node
        .parameter_value(&["String"])
        .or_else(|| node.positional_arguments(&["AsPlainText", "Force"]).first().copied());
    let Some(input) = input else {
        return false;
    };
    if from_read_host(&input.text) {
        return true;
    }
    bare_variable(&input.text).is_some_and(|variable| {
        let values = assigned_values(tree, variable);
        !values.is_empty() && values.iter().all(|v| from_read_host(v))
    })
}

/// The password argument of a credential construction, if the node builds a
/// PSCredential.
fn credential_password_argument<'t>(node: &Node<'t>) -> Option<&'t str> {
    match node.kind() {
        NodeKind::MemberInvocation { arguments, .. } => arguments.get(1).map(String::as_str),
        NodeKind::CommandInvocation { .. } => {
            let type_name = node
                .parameter_value(&["TypeName"])
                .or_else(|| node.positional_arguments(&[]).first().copied())?;
            if short_type_name(&type_name.text) != "pscredential" {
                return None;
            }
            let arguments = node.parameter_value(&["ArgumentList", "Args"]).or_else(|| {
                let positional = node.positional_arguments(&[]);
                positional
                    .iter()
                    .position(|a| a.range == type_name.range)
                    .and_then(|i| positional.get(i + 1).copied())
            })?;
            split_arguments(&arguments.text).get(1).copied()
        }
        _ => None,
    }
}

/// A variable holding a secure string: a parameter typed as one, or a
/// variable assigned from a secure source.
fn is_secure_variable(tree: &SyntaxTree, variable: &str) -> bool {
    let typed_secure = tree.parameters().iter().any(|p| match p.kind() {
        NodeKind::ParameterDeclaration { name, type_name, .. } => {
            name.eq_ignore_ascii_case(variable)
                && type_name
                    .as_deref()
                    .is_some_and(|t| matches!(short_type_name(t).as_str(), "securestring" | "pscredential"))
        }
        _ => false,
    });
    typed_secure
        || assigned_values(tree, variable)
            .iter()
            .any(|v| SECURE_SOURCE.is_match(v))
}
