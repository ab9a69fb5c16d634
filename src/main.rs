//! CLI entry point for fasguard.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use fasguard::{
    cli::{Cli, Commands},
    config::{generate_default_config, Config},
    reporters::{report, OutputFormat},
    rules::{builtin_rules, find_rule, RuleInfo},
    Scanner, Severity,
};
use std::io::{self, IsTerminal};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit code for usage and configuration errors.
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let base_config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    let base_config = match base_config {
        Ok(config) => config,
        Err(e) => return Ok(usage_error(&e)),
    };

    match cli.command {
        Commands::Scan {
            paths,
            output,
            min_severity,
            fail_on,
            rules,
            exclude_rules,
            no_progress,
        } => {
            // CLI rule selection replaces the config file's
            let mut config = base_config;
            if !rules.is_empty() {
                config.analysis.include_rules = rules;
            }
            if !exclude_rules.is_empty() {
                config.analysis.exclude_rules = exclude_rules;
            }
            if let Some(severity) = min_severity {
                config.analysis.min_severity = severity;
            }

            let scan_config = match config.to_scan_config() {
                Ok(mut scan_config) => {
                    scan_config.show_progress = !no_progress;
                    scan_config
                }
                Err(e) => return Ok(usage_error(&e)),
            };
            let scanner = match Scanner::with_config(scan_config) {
                Ok(scanner) => scanner,
                Err(e) => return Ok(usage_error(&e)),
            };
            // only path discovery fails the whole scan
            let scan_report = match scanner.scan_paths(&paths).await {
                Ok(scan_report) => scan_report,
                Err(e) => return Ok(usage_error(&e)),
            };

            if let Some(output_path) = output {
                let mut file = std::fs::File::create(&output_path)?;
                report(&scan_report, cli.format, &mut file)?;
                eprintln!("Report written to: {}", output_path.display());
            } else {
                let mut stdout = io::stdout().lock();
                report(&scan_report, cli.format, &mut stdout)?;
            }

            if let (Some(threshold), Some(max)) = (fail_on, scan_report.max_severity()) {
                if max >= threshold {
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Commands::Rules { rule, json } => {
            let json = json || cli.format == OutputFormat::Json;
            if let Some(rule_id) = rule {
                let Some(r) = find_rule(&rule_id) else {
                    eprintln!("Rule not found: {}", rule_id);
                    return Ok(ExitCode::FAILURE);
                };
                if json {
                    println!("{}", serde_json::to_string_pretty(r)?);
                } else {
                    print_rule(r);
                }
            } else if json {
                println!("{}", serde_json::to_string_pretty(builtin_rules())?);
            } else {
                print_rule_list(builtin_rules());
            }
        }

        Commands::Init { output } => {
            if output.exists() {
                eprintln!(
                    "{}",
                    format!("Config file already exists: {}", output.display()).yellow()
                );
                eprintln!("Use a different path or remove the existing file.");
                return Ok(ExitCode::FAILURE);
            }

            std::fs::write(&output, generate_default_config())?;
            println!(
                "{}",
                format!("Created config file: {}", output.display()).green()
            );
            println!("Edit this file to select rules and add whitelist patterns.");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn usage_error(error: &fasguard::Error) -> ExitCode {
    eprintln!("{} {}", "error:".red().bold(), error);
    ExitCode::from(EXIT_USAGE)
}

fn print_rule(r: &RuleInfo) {
    println!("{}", format!("Rule: {}", r.id).bold());
    println!("Title:       {}", r.title);
    println!("Severity:    {}", r.severity);
    println!("Category:    {}", r.category);
    println!("Description: {}", r.description);
    println!("Remediation: {}", r.remediation);
}

fn print_rule_list(rules: &[RuleInfo]) {
    println!("{}", "Available Rules".bold().underline());

    let mut sorted: Vec<&RuleInfo> = rules.iter().collect();
    sorted.sort_by_key(|r| (r.category, r.id));

    let mut current_category = None;
    for r in sorted {
        if current_category != Some(r.category) {
            println!("\n{}", r.category.to_string().bold());
            current_category = Some(r.category);
        }

        let severity = match r.severity {
            Severity::Error => r.severity.to_string().red(),
            Severity::Warning => r.severity.to_string().yellow(),
            Severity::Information => r.severity.to_string().blue(),
        };

        println!("  {} [{}] - {}", r.id.bright_cyan(), severity, r.title);
    }
    println!();
    println!("Total: {} rules", rules.len());
}
