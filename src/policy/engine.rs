//! Policy evaluation engine.
//!
//! Evaluates agent actions against a compiled rule-set snapshot and returns
//! an [`Intent`]: allow, deny, or require-approval. Evaluation is pure — the
//! same request against the same snapshot always yields the same intent, and
//! nothing here blocks or touches the approval registry.
//!
//! Precedence is an explicit comparator, not list order:
//! 1. A dangerous-command signature match on a run_cmd payload forces deny,
//!    regardless of any rule.
//! 2. Any matching deny rule wins — a target matched by a deny rule is never
//!    allowed, however specific a co-matching allow rule is.
//! 3. Among the remaining matches, the most specific pattern wins;
//!    require_approval beats allow on equal specificity.
//! 4. No match: irreversible actions (git_push) fall back to
//!    require_approval; everything else gets the configured default verdict,
//!    which defaults to deny.
//!
//! Glob patterns are pre-compiled at load time, not per-request.

use crate::policy::defaults::DEFAULT_DANGEROUS_COMMANDS;
use crate::policy::types::*;
use crate::utils::paths::{
    command_matches, normalize_path, pattern_specificity, CompiledMatcher,
};
use anyhow::Result;

/// A rule-set compiled for fast evaluation. Immutable once built; the policy
/// store swaps whole snapshots on reload.
pub struct CompiledRuleSet {
    ruleset: RuleSet,
    compiled_rules: Vec<CompiledRule>,
    /// Effective dangerous-command signatures (shipped defaults when the
    /// rule set doesn't carry its own).
    dangerous_commands: Vec<String>,
}

/// A rule with pre-compiled glob patterns.
struct CompiledRule {
    rule: Rule,
    path_matcher: Option<CompiledMatcher>,
}

/// How strongly a matched rule binds, for precedence ranking.
/// Ordered comparison: higher specificity wins; on a tie, the more severe
/// outcome wins (require_approval beats allow). Deny is handled before
/// ranking and never loses to either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MatchRank {
    pub specificity: usize,
    pub severity: Outcome,
}

struct MatchCandidate<'a> {
    rule: &'a Rule,
    rank: MatchRank,
}

impl CompiledRuleSet {
    /// Compile a parsed rule set. Glob errors surface here, at load time.
    pub fn new(ruleset: RuleSet) -> Result<Self> {
        let compiled_rules = ruleset
            .rules
            .iter()
            .map(|rule| {
                let conditions = rule.conditions();
                let path_matcher = if !conditions.if_path_matches.is_empty() {
                    Some(CompiledMatcher::new(&conditions.if_path_matches)?)
                } else {
                    None
                };
                Ok(CompiledRule {
                    rule: rule.clone(),
                    path_matcher,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let dangerous_commands = if ruleset.dangerous_commands.is_empty() {
            DEFAULT_DANGEROUS_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            ruleset.dangerous_commands.clone()
        };

        Ok(Self {
            ruleset,
            compiled_rules,
            dangerous_commands,
        })
    }

    /// Evaluate an action against this snapshot.
    pub fn evaluate(
        &self,
        action: &Action,
        context: &ActionContext,
        default_verdict: DefaultVerdict,
    ) -> Intent {
        let target = normalize_path(&context.target);

        // Dangerous-command classification comes first and is absolute.
        if *action == Action::RunCmd {
            if let Some(ref cmd) = context.payload {
                if let Some(signature) = self.matching_dangerous_signature(cmd) {
                    return Intent::Deny {
                        reason: format!(
                            "Command matches dangerous signature '{}'",
                            signature
                        ),
                        matched_rule: Some(format!("dangerous_commands:{}", signature)),
                    };
                }
            }
        }

        let candidates: Vec<MatchCandidate<'_>> = self
            .compiled_rules
            .iter()
            .filter(|c| c.rule.action() == action)
            .filter_map(|c| self.match_rule(c, action, &target, context))
            .collect();

        // Deny precedence: any matching deny rule wins outright. Among
        // several, report the most specific one's reason.
        if let Some(denied) = candidates
            .iter()
            .filter(|c| c.rank.severity == Outcome::Deny)
            .max_by_key(|c| c.rank)
        {
            return self.rule_to_intent(denied.rule);
        }

        // Most specific wins; require_approval beats allow on a tie.
        if let Some(winner) = candidates.iter().max_by_key(|c| c.rank) {
            return self.rule_to_intent(winner.rule);
        }

        self.default_intent(action, default_verdict)
    }

    /// The first dangerous-command signature matching `cmd`, if any.
    fn matching_dangerous_signature(&self, cmd: &str) -> Option<&str> {
        self.dangerous_commands
            .iter()
            .find(|sig| command_matches(cmd, std::slice::from_ref(*sig)))
            .map(|s| s.as_str())
    }

    /// Check whether a rule's conditions match, and rank the match.
    fn match_rule<'a>(
        &self,
        compiled: &'a CompiledRule,
        action: &Action,
        target: &str,
        context: &ActionContext,
    ) -> Option<MatchCandidate<'a>> {
        let conditions = compiled.rule.conditions();
        let mut specificity = 0;

        if let Some(ref matcher) = compiled.path_matcher {
            specificity = matcher.best_match_specificity(target)?;
        }

        if !conditions.if_matches.is_empty() && *action == Action::RunCmd {
            let cmd = context.payload.as_deref()?;
            let best = conditions
                .if_matches
                .iter()
                .filter(|sig| command_matches(cmd, std::slice::from_ref(*sig)))
                .map(|sig| pattern_specificity(sig))
                .max()?;
            specificity = specificity.max(best);
        }

        if let Some(max_lines) = conditions.max_payload_lines {
            if let Some(actual_lines) = context.payload_lines {
                if actual_lines > max_lines {
                    return None;
                }
            }
        }

        Some(MatchCandidate {
            rule: &compiled.rule,
            rank: MatchRank {
                specificity,
                severity: compiled.rule.outcome(),
            },
        })
    }

    /// Convert a winning rule into an intent.
    fn rule_to_intent(&self, rule: &Rule) -> Intent {
        match rule {
            Rule::Deny {
                reason,
                action,
                conditions,
            } => {
                let default_reason = if !conditions.if_path_matches.is_empty() {
                    format!(
                        "Policy '{}' denies {} for paths matching: {}",
                        self.ruleset.name,
                        action,
                        conditions.if_path_matches.join(", ")
                    )
                } else if !conditions.if_matches.is_empty() {
                    format!(
                        "Policy '{}' denies {} matching blocked command patterns",
                        self.ruleset.name, action
                    )
                } else {
                    format!("Policy '{}' denies {}", self.ruleset.name, action)
                };

                Intent::Deny {
                    reason: reason.clone().unwrap_or(default_reason),
                    matched_rule: Some(rule.describe()),
                }
            }
            Rule::Allow { .. } => Intent::Allow {
                matched_rule: Some(rule.describe()),
            },
            Rule::RequireApproval { prompt, action, .. } => {
                let default_reason = format!(
                    "Policy '{}' requires approval for {}",
                    self.ruleset.name, action
                );
                Intent::RequireApproval {
                    reason: prompt.clone().unwrap_or(default_reason),
                    matched_rule: Some(rule.describe()),
                }
            }
        }
    }

    /// Intent when no rule matches: irreversible actions suspend for
    /// approval, everything else gets the configured default. Fail closed.
    fn default_intent(&self, action: &Action, default_verdict: DefaultVerdict) -> Intent {
        if action.is_irreversible() {
            return Intent::RequireApproval {
                reason: format!(
                    "{} is irreversible and has no explicit allow rule",
                    action
                ),
                matched_rule: None,
            };
        }
        match default_verdict {
            DefaultVerdict::Deny => Intent::Deny {
                reason: "no matching rule".to_string(),
                matched_rule: None,
            },
            DefaultVerdict::Allow => Intent::Allow { matched_rule: None },
        }
    }

    pub fn name(&self) -> &str {
        &self.ruleset.name
    }

    pub fn ruleset(&self) -> &RuleSet {
        &self.ruleset
    }
}
