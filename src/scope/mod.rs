//! Path scoping for directory scans.
//!
//! Decides which files under a scan root are PowerShell sources worth
//! analyzing: extension filter plus exclude globs matched against the path
//! relative to the root.

use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Directories that never hold deployable scripts.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/.svn/**", "**/node_modules/**"];

/// Build a pre-compiled GlobSet from user exclude patterns.
///
/// Unlike the built-in list, an invalid user pattern is an error.
pub fn build_exclude_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// GlobSet for the built-in excludes.
pub fn default_exclude_globs() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in DEFAULT_EXCLUDES {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

pub fn default_exclude_patterns() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect()
}

/// Path filter for a single scan.
#[derive(Debug, Clone)]
pub struct PathScope {
    extensions: Vec<String>,
    excludes: GlobSet,
}

impl PathScope {
    pub fn new(extensions: &[String], excludes: &[String]) -> Result<Self> {
        let excludes = if excludes.is_empty() {
            default_exclude_globs()
        } else {
            build_exclude_globs(excludes)?
        };
        Ok(Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            excludes,
        })
    }

    /// Whether the file extension is one of the scanned ones (case-insensitive).
    pub fn has_script_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }

    /// Whether `relative` (relative to the scan root) is excluded.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        self.excludes.is_match(relative)
    }

    pub fn includes(&self, relative: &Path) -> bool {
        self.has_script_extension(relative) && !self.is_excluded(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(excludes: &[&str]) -> PathScope {
        let extensions = vec!["ps1".to_string(), ".psm1".to_string()];
        let excludes: Vec<String> = excludes.iter().map(|s| s.to_string()).collect();
        PathScope::new(&extensions, &excludes).unwrap()
    }

    #[test]
    fn test_extension_filter() {
        let scope = scope(&[]);
        assert!(scope.includes(Path::new("Deploy-FAS.ps1")));
        assert!(scope.includes(Path::new("modules/FasTools.PSM1")));
        assert!(!scope.includes(Path::new("README.md")));
        assert!(!scope.includes(Path::new("Makefile")));
    }

    #[test]
    fn test_default_excludes() {
        let scope = scope(&[]);
        assert!(scope.is_excluded(Path::new("repo/.git/hooks/pre-commit.ps1")));
        assert!(scope.is_excluded(Path::new(".git/hooks/pre-commit.ps1")));
        assert!(!scope.is_excluded(Path::new("scripts/Install.ps1")));
    }

    #[test]
    fn test_user_excludes_replace_defaults() {
        let scope = scope(&["archive/**"]);
        assert!(scope.is_excluded(Path::new("archive/old.ps1")));
        assert!(!scope.is_excluded(Path::new("scripts/Install.ps1")));
    }

    #[test]
    fn test_invalid_glob_is_an_error() {
        assert!(build_exclude_globs(&["a[".to_string()]).is_err());
    }
}
