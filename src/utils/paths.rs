//! Pattern matching utilities for rule evaluation.
//!
//! Path globs are compiled once at policy load time via [`CompiledMatcher`]
//! and reused for every request. Command signatures use a deliberately simple
//! `*` wildcard syntax so that non-technical users can write them.

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};

/// A pre-compiled set of glob patterns.
/// Built once when a rule set is loaded, reused for every action check.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    patterns: Vec<(String, GlobMatcher)>,
}

impl CompiledMatcher {
    /// Compile a list of glob pattern strings into matchers.
    /// Returns an error if any pattern is malformed.
    pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
        let compiled = patterns
            .iter()
            .map(|p| {
                let glob = Glob::new(p)?;
                Ok((p.clone(), glob.compile_matcher()))
            })
            .collect::<Result<Vec<_>, globset::Error>>()?;
        Ok(Self { patterns: compiled })
    }

    /// Returns true if the given path matches any of the compiled patterns.
    pub fn matches(&self, path: &str) -> bool {
        let path = Path::new(path);
        self.patterns
            .iter()
            .any(|(_, matcher)| matcher.is_match(path))
    }

    /// Specificity of the most specific pattern matching `path`, if any.
    /// Used by the precedence comparator: among several matching rules,
    /// the one whose matched pattern has the highest specificity wins.
    pub fn best_match_specificity(&self, path: &str) -> Option<usize> {
        let p = Path::new(path);
        self.patterns
            .iter()
            .filter(|(_, matcher)| matcher.is_match(p))
            .map(|(raw, _)| pattern_specificity(raw))
            .max()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Specificity score for a glob pattern: the number of literal (non-wildcard)
/// characters. `src/secret.rs` scores higher than `src/**`, which scores
/// higher than `**`. An unconditioned rule scores zero.
pub fn pattern_specificity(pattern: &str) -> usize {
    pattern
        .chars()
        .filter(|c| !matches!(c, '*' | '?' | '[' | ']' | '{' | '}'))
        .count()
}

/// Check if a command string matches any of the given command signatures.
/// Uses simple glob-style matching where `*` matches any character sequence.
pub fn command_matches(command: &str, signatures: &[String]) -> bool {
    signatures
        .iter()
        .any(|sig| wildcard_match(command.trim(), sig.trim()))
}

/// Simple wildcard matching for command strings.
/// `*` matches any sequence of characters; everything else is literal.
fn wildcard_match(text: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return text == pattern;
    }

    let prefix = parts[0];
    let suffix = parts[parts.len() - 1];

    // Prefix and suffix must fit without overlapping each other.
    if text.len() < prefix.len() + suffix.len() {
        return false;
    }
    if !text.starts_with(prefix) || !text.ends_with(suffix) {
        return false;
    }

    // Middle parts must land, in order, strictly between prefix and suffix.
    let mut pos = prefix.len();
    let end = text.len() - suffix.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..end].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }

    true
}

/// Normalize a path for consistent matching.
/// Removes leading `./` and collapses `//`.
pub fn normalize_path(path: &str) -> String {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.replace("//", "/")
}

/// Per-user state directory (~/.agentgate/) for sockets and audit logs.
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".agentgate"))
}
