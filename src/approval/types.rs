//! Types for the asynchronous approval flow.

use crate::policy::types::Action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pending approval as announced to external approvers.
/// One JSON line per announcement on the approval channel socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    /// The gateway request waiting on this approval
    pub request_id: String,
    /// What the agent wants to do
    pub action: Action,
    /// Target of the action
    pub target: String,
    /// Truncated payload (diff, command line) for review
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_preview: Option<String>,
    /// Why approval is needed (from the policy rule)
    pub reason: String,
    /// When the approval was requested
    pub created_at: DateTime<Utc>,
    /// When it expires and becomes a terminal deny
    pub deadline: DateTime<Utc>,
}

/// Terminal state of a pending approval. Only `Approved` maps to an
/// allow on the wire; silence (timeout) is never consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approved,
    Denied,
    TimedOut,
}

impl Resolution {
    pub fn is_approved(&self) -> bool {
        matches!(self, Resolution::Approved)
    }
}

/// A verdict line written by an approver on the approval channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalVerdict {
    pub request_id: String,
    pub approved: bool,
}
