//! Detector for strings evaluated as code.
//!
//! Detects patterns like:
//! - `Invoke-Expression $command`
//! - `iwr https://x/payload.ps1 | iex`
//! - `[ScriptBlock]::Create($code).Invoke()`
//! - `Add-Type -TypeDefinition $source`
//! - `Invoke-Command -ScriptBlock ([scriptblock]::Create($remote))`
//! - `powershell.exe -EncodedCommand <base64>`

use super::{assigned_values, bare_variable, is_literal_string, short_type_name, Detector, RuleContext};
use crate::analyzers::ast::syntax::{Node, NodeKind, SyntaxTree};
use crate::rules::DYNAMIC_EXECUTION;
use crate::types::{Finding, FindingCategory, Severity};
use base64::Engine;
use regex::Regex;
use std::sync::LazyLock;

const EVAL_COMMANDS: &[&str] = &["Invoke-Expression", "iex"];

const REMOTE_COMMANDS: &[&str] = &["Invoke-Command", "icm"];

const SHELL_COMMANDS: &[&str] = &["powershell", "powershell.exe", "pwsh", "pwsh.exe"];

/// Switches of Invoke-Command that take no value.
const INVOKE_COMMAND_SWITCHES: &[&str] = &[
    "AsJob",
    "HideComputerName",
    "InDisconnectedSession",
    "EnableNetworkAccess",
    "NoNewScope",
    "RunAsAdministrator",
];

/// Commands and .NET calls that fetch content over the network.
static NETWORK_FETCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:invoke-webrequest|iwr|invoke-restmethod|irm|wget|curl|start-bitstransfer|downloadstring|downloadfile|downloaddata|net\.webclient)\b",
    )
    .expect("network fetch pattern must compile")
});

/// Calls that build a script block from text.
static SCRIPTBLOCK_FACTORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)::create\(|\.getscriptblock\(|::parseinput\(|::parsefile\(|newscriptblock\(")
        .expect("script block factory pattern must compile")
});

const PREVIEW_CHARS: usize = 120;

pub struct DynamicExecutionDetector;

/// Where the text passed to Invoke-Expression comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvalSource {
    Network,
    Variable,
    Literal,
}

impl EvalSource {
    fn label(self) -> &'static str {
        match self {
            EvalSource::Network => "network",
            EvalSource::Variable => "variable",
            EvalSource::Literal => "literal",
        }
    }
}

impl DynamicExecutionDetector {
    pub fn new() -> Self {
        Self
    }

    fn eval_source(tree: &SyntaxTree, input: &str, previous: Option<Node<'_>>) -> EvalSource {
        if NETWORK_FETCH.is_match(input) || previous.is_some_and(|p| NETWORK_FETCH.is_match(p.text())) {
            return EvalSource::Network;
        }
        let fetched_variable = variables_in(input).any(|variable| {
            assigned_values(tree, variable)
                .iter()
                .any(|v| NETWORK_FETCH.is_match(v))
        });
        if fetched_variable {
            return EvalSource::Network;
        }
        if input.contains('$') || previous.is_some() {
            EvalSource::Variable
        } else {
            EvalSource::Literal
        }
    }

    fn eval_finding(&self, node: &Node<'_>, what: &str, source: EvalSource) -> Finding {
        let message = match source {
            EvalSource::Network => format!(
                "CRITICAL: {} executes content downloaded from the network (download-then-execute)",
                what
            ),
            EvalSource::Variable => format!(
                "{} evaluates a string built from variable input; this allows code injection",
                what
            ),
            EvalSource::Literal => format!("{} evaluates a string as code", what),
        };
        self.finding(node, Severity::Error, message)
            .with_remediation("Call the command directly, passing arguments with splatting")
            .with_metadata("source", source.label())
    }

    fn check_invoke_expression(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in tree.commands_named(EVAL_COMMANDS) {
            let input = node
                .command_elements()
                .iter()
                .filter(|e| e.is_argument())
                .map(|e| e.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let source = Self::eval_source(tree, &input, node.pipeline_predecessor());
            findings.push(self.eval_finding(&node, "Invoke-Expression", source));
        }
        for node in tree.member_invocations() {
            let NodeKind::MemberInvocation {
                target,
                member,
                arguments,
                ..
            } = node.kind()
            else {
                continue;
            };
            let on_invoke_command = target.to_ascii_lowercase().ends_with("invokecommand");
            if on_invoke_command && member.eq_ignore_ascii_case("InvokeScript") {
                let source = Self::eval_source(tree, &arguments.join(" "), None);
                findings.push(self.eval_finding(&node, "InvokeCommand.InvokeScript", source));
            }
        }
        findings
    }

    fn check_scriptblock_create(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in tree.member_invocations() {
            let NodeKind::MemberInvocation {
                target,
                member,
                is_static,
                arguments,
            } = node.kind()
            else {
                continue;
            };
            if !*is_static || !member.eq_ignore_ascii_case("Create") || short_type_name(target) != "scriptblock" {
                continue;
            }
            let Some(argument) = arguments.first() else {
                continue;
            };
            if is_literal_string(argument) {
                continue;
            }
            findings.push(
                self.finding(
                    &node,
                    Severity::Error,
                    format!("Script block created from dynamic text {}", argument),
                )
                .with_remediation("Define the script block literally with { ... }"),
            );
        }
        findings
    }

    fn check_scriptblock_invoke(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in tree.member_invocations() {
            let NodeKind::MemberInvocation { target, member, .. } = node.kind() else {
                continue;
            };
            if !member.eq_ignore_ascii_case("Invoke") && !member.eq_ignore_ascii_case("InvokeReturnAsIs") {
                continue;
            }
            let dynamic = SCRIPTBLOCK_FACTORY.is_match(target)
                || bare_variable(target).is_some_and(|variable| {
                    assigned_values(tree, variable)
                        .iter()
                        .any(|v| SCRIPTBLOCK_FACTORY.is_match(v))
                });
            if dynamic {
                findings.push(
                    self.finding(
                        &node,
                        Severity::Warning,
                        format!("Invocation of a dynamically built script block {}", target),
                    )
                    .with_remediation("Invoke a literal script block or call the command directly"),
                );
            }
        }
        findings
    }

    fn check_add_type(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in tree.commands_named(&["Add-Type"]) {
            let definition = node
                .parameter_value(&["TypeDefinition", "MemberDefinition"])
                .or_else(|| node.positional_arguments(&["PassThru", "IgnoreWarnings"]).first().copied());
            let Some(definition) = definition else {
                continue;
            };
            let text = definition.text.trim();
            let dynamic = text.starts_with('$') || (text.starts_with('"') && text.contains('$'));
            if dynamic {
                findings.push(
                    self.finding(
                        &node,
                        Severity::Warning,
                        format!("Add-Type compiles a type definition from {}", text),
                    )
                    .with_remediation("Ship the type as a literal here-string or a signed assembly"),
                );
            }
        }
        findings
    }

    fn check_remote_execution(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in tree.commands_named(REMOTE_COMMANDS) {
            let script_block = node
                .parameter_value(&["ScriptBlock"])
                .or_else(|| node.positional_arguments(INVOKE_COMMAND_SWITCHES).first().copied());
            let Some(script_block) = script_block else {
                continue;
            };
            let text = script_block.text.trim();
            let dynamic = SCRIPTBLOCK_FACTORY.is_match(text)
                || bare_variable(text).is_some_and(|variable| {
                    assigned_values(tree, variable)
                        .iter()
                        .any(|v| !v.trim_start().starts_with('{'))
                });
            if dynamic {
                findings.push(
                    self.finding(
                        &node,
                        Severity::Warning,
                        format!("Invoke-Command runs a dynamically built script block {}", text),
                    )
                    .with_remediation("Pass a literal script block and send data through -ArgumentList"),
                );
            }
        }
        findings
    }

    fn check_encoded_commands(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in tree.commands_named(SHELL_COMMANDS) {
            let elements = node.command_elements();
            let payload = elements.iter().enumerate().find_map(|(i, element)| {
                let name = element.parameter_name()?.to_ascii_lowercase();
                let encoded = name == "ec" || (!name.is_empty() && "encodedcommand".starts_with(&name));
                if !encoded {
                    return None;
                }
                elements.get(i + 1).filter(|e| e.is_argument())
            });
            let Some(payload) = payload else {
                continue;
            };
            let raw = payload.text.trim().trim_matches(|c| c == '"' || c == '\'');
            let mut finding = self
                .finding(
                    &node,
                    Severity::Warning,
                    "PowerShell launched with an encoded command hides the code it runs".to_string(),
                )
                .with_remediation("Run a signed script file instead of an encoded command");
            match decode_encoded_command(raw) {
                Some(decoded) => {
                    let preview: String = decoded.chars().take(PREVIEW_CHARS).collect();
                    finding = finding.with_metadata("decoded_preview", preview);
                }
                None => finding = finding.with_metadata("decoded_preview", "<not valid base64>"),
            }
            findings.push(finding);
        }
        findings
    }

    fn check_download_pipelines(&self, tree: &SyntaxTree) -> Vec<Finding> {
        let mut findings = Vec::new();
        for pipeline in tree.find_all(|n| matches!(n.kind(), NodeKind::Pipeline)) {
            let elements: Vec<_> = pipeline.children().collect();
            let download_then_execute = elements.windows(2).any(|pair| {
                let evaluates = pair[1]
                    .command_name()
                    .is_some_and(|name| EVAL_COMMANDS.iter().any(|c| name.eq_ignore_ascii_case(c)));
                evaluates && NETWORK_FETCH.is_match(pair[0].text())
            });
            if download_then_execute {
                findings.push(
                    self.finding(
                        &pipeline,
                        Severity::Error,
                        "CRITICAL: network content is piped straight into Invoke-Expression (download-then-execute)".to_string(),
                    )
                    .with_remediation("Download to a file, verify its signature, then run it")
                    .with_metadata("source", EvalSource::Network.label()),
                );
            }
        }
        findings
    }
}

impl Default for DynamicExecutionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for DynamicExecutionDetector {
    fn rule_id(&self) -> &'static str {
        DYNAMIC_EXECUTION
    }

    fn title(&self) -> &'static str {
        "Dynamic code execution"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::CodeExecution
    }

    fn analyze(&self, tree: &SyntaxTree, _ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = self.check_invoke_expression(tree);
        findings.extend(self.check_scriptblock_create(tree));
        findings.extend(self.check_scriptblock_invoke(tree));
        findings.extend(self.check_add_type(tree));
        findings.extend(self.check_remote_execution(tree));
        findings.extend(self.check_download_pipelines(tree));
        findings.extend(self.check_encoded_commands(tree));
        findings
    }
}

/// Bare `$name` references inside a piece of text.
fn variables_in(text: &str) -> impl Iterator<Item = &str> {
    static VARIABLE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\$(?:\w+:)?(\w+)").expect("variable pattern must compile"));
    VARIABLE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// `-EncodedCommand` payloads are base64 of UTF-16LE text. Padding is
/// optional since a trailing `=` ends a bareword argument.
fn decode_encoded_command(payload: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(payload.trim().trim_end_matches('='))
        .ok()?;
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Some(String::from_utf16_lossy(&units))
}
