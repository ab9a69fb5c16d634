//! Security rules over the PowerShell syntax tree.
//!
//! Each detector is a pure function of the tree and the settings: it walks
//! the node kinds it cares about and returns its findings in source order.

mod ad_consistency;
mod dynamic_execution;
mod hardcoded_credentials;
mod plaintext_password;

pub use ad_consistency::AdConsistencyDetector;
pub use dynamic_execution::DynamicExecutionDetector;
pub use hardcoded_credentials::HardcodedCredentialsDetector;
pub use plaintext_password::PlaintextPasswordDetector;

use super::config::AnalyzerSettings;
use super::syntax::{Node, NodeKind, SyntaxTree};
use crate::rules::patterns::Whitelist;
use crate::types::{Finding, FindingCategory, Severity};

/// Everything a detector may consult besides the tree itself.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub settings: &'a AnalyzerSettings,
    pub whitelist: &'a Whitelist,
}

/// A rule that analyzes a whole syntax tree.
pub trait Detector: Send + Sync {
    /// Returns the unique rule ID for this detector.
    fn rule_id(&self) -> &'static str;

    /// Returns the human-readable title for findings from this detector.
    fn title(&self) -> &'static str;

    fn category(&self) -> FindingCategory;

    /// Analyze the tree and return findings in a deterministic order.
    fn analyze(&self, tree: &SyntaxTree, ctx: &RuleContext<'_>) -> Vec<Finding>;

    /// A finding of this rule located at `node`.
    fn finding(&self, node: &Node<'_>, severity: Severity, message: String) -> Finding {
        Finding::new(
            self.rule_id(),
            self.title(),
            message,
            severity,
            self.category(),
            node.range(),
            node.text(),
        )
    }
}

/// Ordered collection of detectors.
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorSet {
    /// Create a new detector set with all built-in detectors.
    pub fn new() -> Self {
        Self {
            detectors: vec![
                Box::new(HardcodedCredentialsDetector::new()),
                Box::new(PlaintextPasswordDetector::new()),
                Box::new(DynamicExecutionDetector::new()),
                Box::new(AdConsistencyDetector::new()),
            ],
        }
    }

    pub fn empty() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Append a detector; it runs after the ones already present.
    pub fn with(mut self, detector: impl Detector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    /// Get all detectors.
    pub fn all(&self) -> &[Box<dyn Detector>] {
        &self.detectors
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl Default for DetectorSet {
    fn default() -> Self {
        Self::new()
    }
}

// ---- helpers shared by the detectors ----

/// Right-hand sides of every assignment to `$name` in the tree.
pub(crate) fn assigned_values<'t>(tree: &'t SyntaxTree, variable: &str) -> Vec<&'t str> {
    let wanted = variable.trim().trim_start_matches('$');
    tree.assignments()
        .into_iter()
        .filter_map(|node| match node.kind() {
            NodeKind::Assignment { target, value, .. } => {
                let target = target.trim().trim_start_matches('$');
                let target = target.rsplit_once(':').map_or(target, |(_, n)| n);
                target.eq_ignore_ascii_case(wanted).then_some(value.as_str())
            }
            _ => None,
        })
        .collect()
}

/// The variable name of a bare `$name` reference, without scope prefix.
pub(crate) fn bare_variable(text: &str) -> Option<&str> {
    let name = text.trim().strip_prefix('$')?;
    let name = name
        .strip_prefix('{')
        .and_then(|n| n.strip_suffix('}'))
        .unwrap_or(name);
    let name = name.rsplit_once(':').map_or(name, |(_, n)| n);
    (!name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')).then_some(name)
}

/// Whether an argument is a string literal with no interpolation.
pub(crate) fn is_literal_string(text: &str) -> bool {
    let text = text.trim();
    if text.len() < 2 {
        return false;
    }
    if text.starts_with('\'') && text.ends_with('\'') {
        return true;
    }
    text.starts_with('"') && text.ends_with('"') && !text.contains('$')
}

/// Split `a, (b, c), "d,e"` on top-level commas, dropping one pair of
/// enclosing parentheses.
pub(crate) fn split_arguments(text: &str) -> Vec<&str> {
    let mut text = text.trim();
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        text = inner;
    }
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth -= 1,
            (None, ',') if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// Name of a `[Type]` literal without brackets and namespace, lower-cased.
pub(crate) fn short_type_name(text: &str) -> String {
    let inner = text.trim().trim_start_matches('[').trim_end_matches(']');
    inner
        .rsplit('.')
        .next()
        .unwrap_or(inner)
        .trim()
        .to_ascii_lowercase()
}
