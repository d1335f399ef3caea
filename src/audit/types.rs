//! Types for the audit log.
//!
//! Every request the gateway rules on gets logged — allowed or denied.

use crate::gateway::protocol::WireVerdict;
use crate::policy::types::Action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in the audit log. One entry per ruled-on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the decision was made
    pub timestamp: DateTime<Utc>,

    /// Gateway session identifier (UUID, generated at startup)
    pub session_id: String,

    /// The request this entry rules on
    pub request_id: String,

    /// What action was attempted (None when the request line didn't parse)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,

    /// Target of the action (file path, branch name, command namespace)
    pub target: String,

    /// The terminal verdict
    pub verdict: WireVerdict,

    /// Why it was denied, if it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Which policy rule matched (None = default verdict or classifier)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,

    /// How long the policy evaluation took (microseconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_duration_us: Option<u64>,
}
