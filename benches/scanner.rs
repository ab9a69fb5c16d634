use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fasguard::{parse_script, AstAnalyzer, ScanConfig, Scanner};
use std::fs;

const DEPLOY_SCRIPT: &str = r#"
<#
.SYNOPSIS
Configures the Federated Authentication Service.
.PARAMETER FASSecurityGroupSID
SID of the group allowed to request certificates.
#>
param(
    [Parameter(Mandatory = $true)]
    [ValidatePattern('^S-1-5-21-\d+-\d+-\d+-\d+$')]
    [string]$FASSecurityGroupSID,
    [string]$UserDomain,
    [string]$FASDomain,
    [PSCredential]$Credential
)

$sid = "S-1-5-21-1234567890-1234567890-1234567890-1234"
$template = '917Citrix_SmartcardLogon'
$server = "fas01.corp.local"

function Set-FasRule {
    param([string]$Name, [string]$Password)
    try {
        $group = Get-ADGroup -Identity $FASSecurityGroupSID
        $secure = ConvertTo-SecureString $Password -AsPlainText -Force
        $cred = New-Object System.Management.Automation.PSCredential('svc_fas', $secure)
        Invoke-Command -ComputerName $server -Credential $cred -ScriptBlock { Get-Service CitrixFederatedAuthenticationService }
    } catch {
        Write-Error $_
    }
}

$apiKey = "abcd1234efgh5678ijkl"
Invoke-Expression "Get-Process"
"#;

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_script", |b| {
        b.iter(|| parse_script(black_box(DEPLOY_SCRIPT)).unwrap())
    });
}

fn bench_analyze(c: &mut Criterion) {
    let analyzer = AstAnalyzer::new();
    let tree = parse_script(DEPLOY_SCRIPT).unwrap();
    c.bench_function("analyze_tree", |b| {
        b.iter(|| analyzer.analyze_tree(black_box(&tree)))
    });
}

fn bench_scan_directory(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    for i in 0..50 {
        fs::write(dir.path().join(format!("deploy_{:02}.ps1", i)), DEPLOY_SCRIPT).unwrap();
    }
    let scanner = Scanner::with_config(ScanConfig {
        show_progress: false,
        ..Default::default()
    })
    .unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("scan_50_files", |b| {
        b.iter(|| runtime.block_on(scanner.scan_path(black_box(dir.path()))).unwrap())
    });
}

criterion_group!(benches, bench_parse, bench_analyze, bench_scan_directory);
criterion_main!(benches);
