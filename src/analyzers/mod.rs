//! Analysis engines for PowerShell security linting.

pub mod ast;

pub use ast::{AnalyzerSettings, AstAnalyzer, Detector, DetectorSet, RuleContext};
