//! YAML rule-set parser.
//!
//! Parses human-friendly YAML policy files into the internal [`RuleSet`].
//!
//! # Example policy file:
//! ```yaml
//! policy: standard-dev-v1
//! rules:
//!   - deny: write
//!     if_path_matches: [".env*", ".ssh/*"]
//!   - allow: write
//!     if_path_matches: ["src/**", "tests/**"]
//!   - require_approval: git_push
//! dangerous_commands:
//!   - "rm -rf *"
//!   - "curl * | bash"
//! ```

use crate::policy::types::*;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Raw YAML representation before conversion to internal types.
/// This intermediate form handles the flexible YAML syntax.
#[derive(Debug, Deserialize)]
struct RawRuleSet {
    policy: String,
    #[serde(default)]
    description: Option<String>,
    rules: Vec<RawRule>,
    #[serde(default)]
    dangerous_commands: Vec<String>,
}

/// A rule as it appears in the YAML file.
/// Supports three forms: deny, allow, require_approval.
#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    deny: Option<String>,
    #[serde(default)]
    allow: Option<String>,
    #[serde(default)]
    require_approval: Option<String>,

    // Conditions — all optional
    #[serde(default)]
    if_path_matches: Option<StringOrVec>,
    #[serde(default)]
    if_matches: Option<StringOrVec>,
    #[serde(default)]
    max_payload_lines: Option<usize>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// Allows YAML fields to be either a single string or a list of strings:
/// ```yaml
/// if_path_matches: "src/**"          # single string — works
/// if_path_matches: ["src/**", "lib/**"]  # list — also works
/// ```
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrVec {
    Single(String),
    Multiple(Vec<String>),
}

impl StringOrVec {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrVec::Single(s) => vec![s],
            StringOrVec::Multiple(v) => v,
        }
    }
}

/// Parse a YAML rule-set file from a file path.
pub fn parse_ruleset_file(path: impl AsRef<Path>) -> Result<RuleSet> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file: {}", path.display()))?;
    parse_ruleset_str(&content)
        .with_context(|| format!("Failed to parse policy file: {}", path.display()))
}

/// Parse a YAML rule-set string into a [`RuleSet`].
pub fn parse_ruleset_str(yaml: &str) -> Result<RuleSet> {
    let raw: RawRuleSet =
        serde_yaml::from_str(yaml).context("Invalid YAML syntax in policy file")?;

    if raw.policy.trim().is_empty() {
        bail!("Rule set must have a non-empty 'policy' name");
    }

    let mut rules = Vec::with_capacity(raw.rules.len());
    for (i, raw_rule) in raw.rules.into_iter().enumerate() {
        let rule = convert_rule(raw_rule, i)
            .with_context(|| format!("Invalid rule at position {} (0-indexed)", i))?;
        rules.push(rule);
    }

    if rules.is_empty() {
        bail!("Rule set must have at least one rule");
    }

    Ok(RuleSet {
        name: raw.policy,
        description: raw.description,
        rules,
        dangerous_commands: raw.dangerous_commands,
    })
}

/// Convert a raw YAML rule into a typed [`Rule`].
fn convert_rule(raw: RawRule, index: usize) -> Result<Rule> {
    // Exactly one of deny/allow/require_approval must be set
    let set_count = [
        raw.deny.is_some(),
        raw.allow.is_some(),
        raw.require_approval.is_some(),
    ]
    .iter()
    .filter(|&&b| b)
    .count();

    if set_count == 0 {
        bail!(
            "Rule {} must specify one of: deny, allow, or require_approval",
            index
        );
    }
    if set_count > 1 {
        bail!(
            "Rule {} specifies multiple rule types (deny/allow/require_approval) — pick one",
            index
        );
    }

    let conditions = Conditions {
        if_path_matches: raw
            .if_path_matches
            .map(|s| s.into_vec())
            .unwrap_or_default(),
        if_matches: raw.if_matches.map(|s| s.into_vec()).unwrap_or_default(),
        max_payload_lines: raw.max_payload_lines,
    };

    if let Some(action_str) = raw.deny {
        let action = Action::from_str_loose(&action_str)
            .ok_or_else(|| anyhow::anyhow!("Unknown action '{}' in deny rule", action_str))?;
        validate_conditions_for_action(&action, &conditions, index)?;
        Ok(Rule::Deny {
            action,
            conditions,
            reason: raw.reason,
        })
    } else if let Some(action_str) = raw.allow {
        let action = Action::from_str_loose(&action_str)
            .ok_or_else(|| anyhow::anyhow!("Unknown action '{}' in allow rule", action_str))?;
        validate_conditions_for_action(&action, &conditions, index)?;
        Ok(Rule::Allow { action, conditions })
    } else if let Some(action_str) = raw.require_approval {
        let action = Action::from_str_loose(&action_str).ok_or_else(|| {
            anyhow::anyhow!("Unknown action '{}' in require_approval rule", action_str)
        })?;
        validate_conditions_for_action(&action, &conditions, index)?;
        Ok(Rule::RequireApproval {
            action,
            conditions,
            prompt: raw.prompt,
        })
    } else {
        unreachable!()
    }
}

/// Validate that conditions make sense for the given action type.
/// For example, `if_path_matches` doesn't make sense for `run_cmd`.
fn validate_conditions_for_action(
    action: &Action,
    conditions: &Conditions,
    index: usize,
) -> Result<()> {
    match action {
        Action::RunCmd => {
            if !conditions.if_path_matches.is_empty() {
                bail!(
                    "Rule {}: 'if_path_matches' doesn't apply to run_cmd actions. \
                     Use 'if_matches' for command pattern matching.",
                    index
                );
            }
        }
        Action::GitPush => {
            if !conditions.if_matches.is_empty() {
                bail!(
                    "Rule {}: 'if_matches' doesn't apply to git_push. \
                     Use 'if_path_matches' for branch patterns.",
                    index
                );
            }
        }
        Action::Write | Action::Delete => {
            if !conditions.if_matches.is_empty() {
                bail!(
                    "Rule {}: 'if_matches' only applies to run_cmd actions.",
                    index
                );
            }
        }
    }

    if conditions.max_payload_lines.is_some() && *action != Action::Write {
        bail!(
            "Rule {}: 'max_payload_lines' only applies to write actions.",
            index
        );
    }

    // Validate glob patterns are well-formed
    for pattern in &conditions.if_path_matches {
        globset::Glob::new(pattern)
            .with_context(|| format!("Rule {}: invalid glob pattern '{}'", index, pattern))?;
    }

    Ok(())
}
