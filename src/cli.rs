//! Command-line interface definitions.

use crate::reporters::OutputFormat;
use crate::types::Severity;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fasguard")]
#[command(author, version, about = "Security linter for Citrix FAS deployment PowerShell scripts")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a config file
    #[arg(short, long, global = true, env = "FASGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan PowerShell scripts or directories
    Scan {
        /// Files or directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Minimum severity to report (information, warning, error)
        #[arg(long)]
        min_severity: Option<Severity>,

        /// Exit with code 1 when a finding reaches this severity
        #[arg(long)]
        fail_on: Option<Severity>,

        /// Only run these rules (comma-separated ids)
        #[arg(long, value_delimiter = ',')]
        rules: Vec<String>,

        /// Skip these rules (comma-separated ids)
        #[arg(long, value_delimiter = ',')]
        exclude_rules: Vec<String>,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// List the built-in rules
    Rules {
        /// Show a single rule
        rule: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default config file
    Init {
        #[arg(short, long, default_value = "fasguard.toml")]
        output: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::try_parse_from([
            "fasguard",
            "--format",
            "json",
            "scan",
            "a.ps1",
            "scripts",
            "--fail-on",
            "warning",
            "--exclude-rules",
            "AD-001,EXEC-001",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::Scan {
            paths,
            fail_on,
            exclude_rules,
            ..
        } = cli.command
        else {
            panic!("expected scan");
        };
        assert_eq!(paths.len(), 2);
        assert_eq!(fail_on, Some(Severity::Warning));
        assert_eq!(exclude_rules, vec!["AD-001", "EXEC-001"]);
    }

    #[test]
    fn test_invalid_severity_is_a_usage_error() {
        assert!(Cli::try_parse_from(["fasguard", "scan", "a.ps1", "--min-severity", "critical"]).is_err());
    }
}
