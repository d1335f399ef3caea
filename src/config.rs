//! Gateway configuration.
//!
//! Separate from the policy file: the policy says what agents may do, the
//! config says how the gateway itself runs (sockets, default verdict,
//! approval timeout). Loaded from YAML; every field has a fail-closed
//! default.

use crate::policy::types::DefaultVerdict;
use crate::utils::paths::state_dir;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLICY_FILE: &str = ".agentgate.yaml";
const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Rule-set source location
    #[serde(default = "default_policy_path")]
    pub policy_path: PathBuf,

    /// Verdict applied when no rule matches (fail closed: deny)
    #[serde(default)]
    pub default_verdict: DefaultVerdict,

    /// How long a pending approval waits before it becomes a terminal deny
    #[serde(default = "default_approval_timeout_seconds")]
    pub approval_timeout_seconds: u64,

    /// Gateway request socket; defaults to ~/.agentgate/gateway.sock
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Approval channel socket; defaults to ~/.agentgate/approvals.sock
    #[serde(default)]
    pub approval_socket_path: Option<PathBuf>,
}

fn default_policy_path() -> PathBuf {
    PathBuf::from(DEFAULT_POLICY_FILE)
}

fn default_approval_timeout_seconds() -> u64 {
    DEFAULT_APPROVAL_TIMEOUT_SECS
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            policy_path: default_policy_path(),
            default_verdict: DefaultVerdict::default(),
            approval_timeout_seconds: default_approval_timeout_seconds(),
            socket_path: None,
            approval_socket_path: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: GatewayConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.approval_timeout_seconds == 0 {
            bail!("approval_timeout_seconds must be greater than zero");
        }
        Ok(())
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_seconds)
    }

    pub fn socket_path(&self) -> Result<PathBuf> {
        match self.socket_path {
            Some(ref path) => Ok(path.clone()),
            None => Ok(state_dir()?.join("gateway.sock")),
        }
    }

    pub fn approval_socket_path(&self) -> Result<PathBuf> {
        match self.approval_socket_path {
            Some(ref path) => Ok(path.clone()),
            None => Ok(state_dir()?.join("approvals.sock")),
        }
    }
}
