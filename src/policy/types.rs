//! Core types for the policy engine.
//!
//! These types define the structure of rule sets, rules, actions, and the
//! evaluation intents that drive the gateway's decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An action an AI agent is attempting to perform.
/// Every mediated tool call maps to one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Writing content to a file (includes creating new files)
    Write,
    /// Deleting a file or directory
    Delete,
    /// Running a shell command
    RunCmd,
    /// Pushing to a git remote
    GitPush,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Write => write!(f, "write"),
            Action::Delete => write!(f, "delete"),
            Action::RunCmd => write!(f, "run_cmd"),
            Action::GitPush => write!(f, "git_push"),
        }
    }
}

impl Action {
    /// Parse an action from a string (used during YAML parsing).
    /// Accepts aliases so policy files feel natural to write.
    pub fn from_str_loose(s: &str) -> Option<Action> {
        match s.to_lowercase().trim() {
            "write" | "write_file" | "file_write" => Some(Action::Write),
            "delete" | "delete_file" | "file_delete" | "rm" => Some(Action::Delete),
            "run_cmd" | "shell" | "exec" | "command" | "cmd" => Some(Action::RunCmd),
            "git_push" | "push" => Some(Action::GitPush),
            _ => None,
        }
    }

    /// Whether this action is irreversible or remote-affecting.
    /// Such actions fall back to require-approval instead of the configured
    /// default when no rule matches them.
    pub fn is_irreversible(&self) -> bool {
        matches!(self, Action::GitPush)
    }
}

/// Conditions that narrow when a rule applies.
/// All specified conditions must match for the rule to apply (AND logic).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions {
    /// Rule applies only when the target path matches these glob patterns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub if_path_matches: Vec<String>,

    /// For run_cmd: rule applies when the command matches these signatures.
    /// Supports `*` wildcards: "git push *", "npm publish*"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub if_matches: Vec<String>,

    /// Maximum number of payload lines allowed for file writes.
    /// Prevents agents from rewriting entire files in one shot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload_lines: Option<usize>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.if_path_matches.is_empty()
            && self.if_matches.is_empty()
            && self.max_payload_lines.is_none()
    }
}

/// The outcome a rule maps to when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Lowest severity: proceed without asking.
    Allow,
    /// Suspend and ask a human before a terminal verdict.
    RequireApproval,
    /// Highest severity: refuse outright.
    Deny,
}

/// A single rule in a rule set.
///
/// Rule order in the file does not decide precedence; the engine ranks
/// matching rules with an explicit comparator (deny first, then pattern
/// specificity, then outcome severity).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Rule {
    /// Block this action (optionally with conditions).
    Deny {
        action: Action,
        #[serde(default)]
        conditions: Conditions,
        /// Human-readable reason returned to the agent when denied.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Explicitly allow this action (optionally with conditions).
    Allow {
        action: Action,
        #[serde(default)]
        conditions: Conditions,
    },
    /// Suspend and ask the human for approval.
    RequireApproval {
        action: Action,
        #[serde(default)]
        conditions: Conditions,
        /// What to show the human in the approval prompt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
}

impl Rule {
    pub fn action(&self) -> &Action {
        match self {
            Rule::Deny { action, .. } => action,
            Rule::Allow { action, .. } => action,
            Rule::RequireApproval { action, .. } => action,
        }
    }

    pub fn conditions(&self) -> &Conditions {
        match self {
            Rule::Deny { conditions, .. } => conditions,
            Rule::Allow { conditions, .. } => conditions,
            Rule::RequireApproval { conditions, .. } => conditions,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            Rule::Deny { .. } => Outcome::Deny,
            Rule::Allow { .. } => Outcome::Allow,
            Rule::RequireApproval { .. } => Outcome::RequireApproval,
        }
    }

    /// Human-readable description of this rule (used in logs and reasons).
    pub fn describe(&self) -> String {
        let mut desc = match self.outcome() {
            Outcome::Deny => format!("deny:{}", self.action()),
            Outcome::Allow => format!("allow:{}", self.action()),
            Outcome::RequireApproval => format!("require_approval:{}", self.action()),
        };
        let conditions = self.conditions();
        if !conditions.if_path_matches.is_empty() {
            desc.push_str(&format!(
                ":if_path_matches:{}",
                conditions.if_path_matches.join(",")
            ));
        }
        if !conditions.if_matches.is_empty() {
            desc.push_str(&format!(":if_matches:{}", conditions.if_matches.join(",")));
        }
        if let Some(max) = conditions.max_payload_lines {
            desc.push_str(&format!(":max_payload_lines:{}", max));
        }
        desc
    }
}

/// A complete rule set — a named collection of rules plus the
/// dangerous-command signatures that override everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rule set name/identifier (e.g., "standard-dev-v1")
    pub name: String,

    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The rules. Precedence comes from the engine's comparator, not order.
    pub rules: Vec<Rule>,

    /// Command signatures that force a deny for run_cmd, regardless of
    /// any allow rule. Empty means "use the shipped defaults".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dangerous_commands: Vec<String>,
}

/// The verdict applied when no rule matches a request.
/// Configuration, not policy — lives in the gateway config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultVerdict {
    #[default]
    Deny,
    Allow,
}

/// The engine's ruling on a single request.
///
/// This is an intent, not yet a terminal decision: `RequireApproval` still
/// has to be resolved through the approval coordinator before the wire
/// response (which only knows allow/deny) can be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Action is permitted.
    Allow {
        /// Which rule allowed it (None = default allow)
        #[serde(skip_serializing_if = "Option::is_none")]
        matched_rule: Option<String>,
    },
    /// Action is refused.
    Deny {
        /// Why it was denied (surfaced to the agent)
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        matched_rule: Option<String>,
    },
    /// Action needs a human verdict before proceeding.
    RequireApproval {
        /// What to show the human
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        matched_rule: Option<String>,
    },
}

impl Intent {
    pub fn is_allow(&self) -> bool {
        matches!(self, Intent::Allow { .. })
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Intent::Deny { .. })
    }

    pub fn is_require_approval(&self) -> bool {
        matches!(self, Intent::RequireApproval { .. })
    }

    pub fn matched_rule(&self) -> Option<&str> {
        match self {
            Intent::Allow { matched_rule }
            | Intent::Deny { matched_rule, .. }
            | Intent::RequireApproval { matched_rule, .. } => matched_rule.as_deref(),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Allow { .. } => write!(f, "allow"),
            Intent::Deny { reason, .. } => write!(f, "deny: {}", reason),
            Intent::RequireApproval { reason, .. } => {
                write!(f, "require approval: {}", reason)
            }
        }
    }
}

/// Request context passed to the engine alongside the action.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// The target path, branch name, or command namespace.
    pub target: String,
    /// For run_cmd: the full command line. For write: the file contents.
    pub payload: Option<String>,
    /// Number of payload lines (computed when the payload is set).
    pub payload_lines: Option<usize>,
}

impl ActionContext {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        let p = payload.into();
        self.payload_lines = Some(p.lines().count());
        self.payload = Some(p);
        self
    }
}
