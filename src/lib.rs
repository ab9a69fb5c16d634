//! fasguard: a security linter for the PowerShell scripts that deploy and
//! configure Citrix Federated Authentication Service.
//!
//! A script is parsed once into a [`SyntaxTree`](analyzers::ast::SyntaxTree)
//! and four rules run over it:
//!
//! - `CRED-001` hardcoded credentials
//! - `CRED-002` plain-text password parameters and conversions
//! - `EXEC-001` dynamic code execution
//! - `AD-001` Active Directory and SID consistency
//!
//! ```no_run
//! use fasguard::AstAnalyzer;
//!
//! let findings = AstAnalyzer::new()
//!     .analyze_source("$password = \"MyPassword123\"")
//!     .unwrap();
//! assert_eq!(findings[0].rule_id, "CRED-001");
//! ```

pub mod analyzers;
pub mod cli;
pub mod config;
pub mod error;
pub mod reporters;
pub mod rules;
pub mod scanner;
pub mod scope;
pub mod types;

pub use analyzers::ast::{parse_script, AnalyzerSettings, AstAnalyzer, SyntaxTree};
pub use error::{Error, Result};
pub use scanner::{ScanConfig, Scanner};
pub use types::{FileError, FileReport, Finding, FindingCategory, ScanReport, Severity, SourceRange};
