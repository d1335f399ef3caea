//! agentgate — action mediation gateway for AI coding agents.
//!
//! Quick start:
//!   agentgate init           # write a starter policy file
//!   agentgate check          # validate the policy
//!   agentgate serve          # run the gateway

use agentgate::approval::{ApprovalChannel, ApprovalCoordinator};
use agentgate::audit::AuditLogger;
use agentgate::config::{GatewayConfig, DEFAULT_POLICY_FILE};
use agentgate::gateway::GatewayServer;
use agentgate::policy::{self, PolicyEngine, PolicyStore};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How often the policy store polls its backing file for changes.
const POLICY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// agentgate — rules on every filesystem and shell action your AI agent
/// takes: allow, deny, or ask you first.
#[derive(Parser)]
#[command(
    name = "agentgate",
    version,
    about = "Mediate your AI agent's actions: allow, deny, or ask a human"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (request socket + approval channel)
    Serve {
        /// Path to the gateway config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Path to the policy file (overrides the config)
        #[arg(short, long)]
        policy: Option<PathBuf>,
    },

    /// Validate a policy file
    Check {
        /// Path to policy file
        #[arg(default_value = DEFAULT_POLICY_FILE)]
        policy: PathBuf,
    },

    /// Create a policy file from a template
    Init {
        #[arg(short, long, default_value = "standard")]
        template: String,
        #[arg(short, long, default_value = DEFAULT_POLICY_FILE)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agentgate=info".parse().expect("valid directive")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config, policy } => run_serve(config, policy).await,
        Commands::Check { policy } => run_check(&policy),
        Commands::Init { template, output } => run_init(&template, &output),
    };

    if let Err(e) = result {
        eprintln!();
        eprintln!("  error: {}", e);
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
        eprintln!();
        std::process::exit(1);
    }
}

/// Bring up the gateway socket and the approval channel and serve forever.
async fn run_serve(config_path: Option<PathBuf>, policy_path: Option<PathBuf>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => GatewayConfig::load(&path)?,
        None => GatewayConfig::default(),
    };
    if let Some(path) = policy_path {
        config.policy_path = path;
    }
    config.validate()?;

    let store = Arc::new(
        PolicyStore::load(&config.policy_path).with_context(|| {
            format!("Failed to load policy from {}", config.policy_path.display())
        })?,
    );
    store.spawn_reload_task(POLICY_POLL_INTERVAL);

    let engine = PolicyEngine::new(Arc::clone(&store), config.default_verdict);
    let coordinator = ApprovalCoordinator::new();

    let session_id = Uuid::new_v4().to_string();
    let logger = AuditLogger::new(&session_id)?;

    let socket_path = config.socket_path()?;
    let approval_socket_path = config.approval_socket_path()?;
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = approval_socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    println!("agentgate session {}", session_id);
    println!("  policy:    {} ({})", config.policy_path.display(), store.current_rules().name());
    println!("  gateway:   {}", socket_path.display());
    println!("  approvals: {}", approval_socket_path.display());
    println!("  audit log: {}", logger.log_path().display());

    let server = GatewayServer::new(
        &socket_path,
        engine,
        Arc::clone(&coordinator),
        logger,
        session_id,
        config.approval_timeout(),
    );
    let channel = ApprovalChannel::new(&approval_socket_path, coordinator);

    tokio::try_join!(server.run(), channel.run())?;
    Ok(())
}

/// Parse and compile a policy file, then print its rules.
fn run_check(policy_path: &std::path::Path) -> Result<()> {
    let ruleset = policy::parser::parse_ruleset_file(policy_path)?;
    let compiled = policy::CompiledRuleSet::new(ruleset.clone())
        .context("Policy parsed but has invalid glob patterns")?;

    println!();
    println!("  Policy is valid: {}", compiled.name());
    if let Some(ref description) = ruleset.description {
        println!("  {}", description.trim());
    }
    println!("  Rules: {}", ruleset.rules.len());
    println!();
    for (i, rule) in ruleset.rules.iter().enumerate() {
        println!("  {}. {}", i + 1, rule.describe());
    }
    if !ruleset.dangerous_commands.is_empty() {
        println!();
        println!(
            "  Dangerous-command signatures: {} (overriding shipped defaults)",
            ruleset.dangerous_commands.len()
        );
    }
    println!();
    Ok(())
}

/// Write a starter policy file from a named template.
fn run_init(template: &str, output: &std::path::Path) -> Result<()> {
    let Some(yaml) = policy::defaults::get_template(template) else {
        let available = policy::defaults::available_templates()
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        bail!("Unknown template '{}'. Available: {}", template, available);
    };

    if output.exists() {
        bail!(
            "{} already exists — remove it first or pick another output path",
            output.display()
        );
    }

    std::fs::write(output, yaml)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {} ({} template)", output.display(), template);
    println!("Validate it with: agentgate check {}", output.display());
    Ok(())
}
