//! Gateway IPC protocol types.
//!
//! Defines the JSON messages exchanged between an agent-side shim and the
//! gateway over a Unix domain socket: one JSON object per line, requests in,
//! decisions out.
//!
//! The wire response only ever says allow or deny. A request that suspends
//! for human approval simply answers later — pending is never a terminal
//! wire state.

use crate::policy::types::Action;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request from the agent to perform an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// Caller-supplied id, unique among the session's in-flight requests.
    /// Responses correlate by this id, not by arrival order.
    pub request_id: String,

    /// What the agent wants to do
    pub action: Action,

    /// Target of the action:
    /// - For file operations: the file path
    /// - For git_push: the branch name
    /// - For run_cmd: a command namespace (the command itself is the payload)
    pub target: String,

    /// Additional payload:
    /// - For write: the file contents or diff
    /// - For run_cmd: the full command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Terminal verdict on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireVerdict {
    Allow,
    Deny,
}

/// The gateway's ruling, written back to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Matches the request_id from the request
    pub request_id: String,

    /// The terminal verdict
    pub decision: WireVerdict,

    /// Why the action was denied. Always present for deny.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GatewayResponse {
    pub fn allow(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            decision: WireVerdict::Allow,
            reason: None,
        }
    }

    pub fn deny(request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            decision: WireVerdict::Deny,
            reason: Some(reason.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == WireVerdict::Allow
    }
}

/// Request-level protocol violations. Each resolves to a deny response on
/// the offending request; the connection itself stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid request JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Duplicate in-flight request_id '{0}'")]
    DuplicateRequestId(String),
}
