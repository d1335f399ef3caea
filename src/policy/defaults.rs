//! Built-in policy templates and the shipped dangerous-command signatures.
//!
//! Templates provide starting points:
//! - `standard`: everyday development — protects secrets, asks before pushes
//! - `permissive`: allow everything but log it all — for trust-building

/// Command signatures that force a deny for run_cmd actions unless the
/// rule set overrides the list. These cover irreversible destructive
/// operations, privilege escalation, and pipe-to-shell installs.
pub const DEFAULT_DANGEROUS_COMMANDS: &[&str] = &[
    "rm -rf /*",
    "rm -rf /",
    "rm -rf ~*",
    "rm -rf .*",
    "sudo *",
    "curl * | bash",
    "curl * | sh",
    "wget * | bash",
    "wget * | sh",
    "chmod -R 777 *",
    "chmod 777 /*",
    "dd if=*",
    "mkfs.*",
    "> /dev/*",
    "git push --force*",
    ":(){:|:&};:",
];

/// Default development policy.
/// Protects secrets, keeps deletions inside scratch dirs, requires approval
/// for git push, and allows writes to common source directories.
pub const STANDARD_YAML: &str = r#"# agentgate policy: standard
# A sensible default for everyday development.
# Protects your secrets, limits deletions, and asks before pushing code.

policy: standard-dev-v1

description: >
  Default safety policy for development. Protects secrets, prevents
  accidental deletions, and requires your approval before pushing code.

rules:
  # -- Protect secrets --
  - deny: write
    if_path_matches: [".env*", ".ssh/*", "*.pem", "*.key", "*.p12", "*.keystore"]
    reason: "Protected file — agents cannot modify secrets or credentials"

  # -- Keep deletions inside scratch and build output --
  # Anything else falls through to the default verdict (deny).
  - allow: delete
    if_path_matches: ["tmp/**", "dist/**", "build/**", "target/**", "node_modules/**"]

  # -- Ask before pushing --
  - require_approval: git_push
    prompt: "The agent wants to push code. Review the changes before approving."

  # -- Allow writes to common source directories --
  - allow: write
    if_path_matches: ["src/**", "lib/**", "app/**", "tests/**", "test/**", "docs/**"]
    max_payload_lines: 500

  # -- Allow common safe commands --
  - allow: run_cmd
    if_matches:
      - "cargo *"
      - "npm *"
      - "pnpm *"
      - "yarn *"
      - "pip *"
      - "python *"
      - "node *"
      - "go *"
      - "make *"
      - "ls *"
      - "cat *"
      - "grep *"
      - "git status*"
      - "git diff*"
      - "git log*"
      - "git add*"
      - "git commit*"
"#;

/// Permissive policy — allow everything but log it all.
/// Useful for auditing what an agent does before tightening the policy.
pub const PERMISSIVE_YAML: &str = r#"# agentgate policy: permissive
# Allows everything, but logs every action.
#
# WARNING: This provides almost no protection. It's a monitoring policy.
# Switch to the standard template once you're comfortable.

policy: permissive-v1

description: >
  Allow all actions with full logging. Use this to audit what an agent
  does before creating a tighter policy.

rules:
  - allow: write
  - allow: delete
  - allow: run_cmd

  # -- Even in permissive mode, pushes need a human --
  - require_approval: git_push
    prompt: "Even in permissive mode, git push requires your OK."
"#;

/// Get the YAML content for a named policy template.
pub fn get_template(name: &str) -> Option<&'static str> {
    match name.to_lowercase().as_str() {
        "standard" | "dev" | "default" => Some(STANDARD_YAML),
        "permissive" | "allow-all" => Some(PERMISSIVE_YAML),
        _ => None,
    }
}

/// List all available policy template names.
pub fn available_templates() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "standard",
            "Sensible defaults for development — protects secrets, asks before pushes",
        ),
        (
            "permissive",
            "Allow everything with logging — for auditing and trust-building",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::engine::CompiledRuleSet;
    use crate::policy::parser::parse_ruleset_str;

    #[test]
    fn test_templates_parse_and_compile() {
        for (name, _) in available_templates() {
            let yaml = get_template(name).unwrap();
            let ruleset = parse_ruleset_str(yaml)
                .unwrap_or_else(|e| panic!("template '{}' failed to parse: {}", name, e));
            CompiledRuleSet::new(ruleset)
                .unwrap_or_else(|e| panic!("template '{}' failed to compile: {}", name, e));
        }
    }

    #[test]
    fn test_unknown_template() {
        assert!(get_template("does-not-exist").is_none());
    }
}
