//! Gateway session server — the mediation boundary between agent and host.
//!
//! Listens on a Unix domain socket. For every connection it reads JSON-line
//! requests, evaluates each against the policy, suspends on require-approval
//! intents, and writes one decision per request. Requests are handled as
//! independent tasks: a request waiting on a human never blocks later
//! requests on the same connection, so responses correlate by request_id
//! rather than arrival order.
//!
//! Every internal failure is absorbed into a deny response. Nothing that
//! goes wrong in here ever escalates into an allow.

use crate::approval::{ApprovalCoordinator, Resolution};
use crate::audit::{AuditLogger, LogEntry};
use crate::gateway::protocol::{GatewayRequest, GatewayResponse, ProtocolError, WireVerdict};
use crate::policy::types::{Action, ActionContext, Intent};
use crate::policy::PolicyEngine;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, Mutex};

/// The gateway server that mediates all agent actions.
pub struct GatewayServer {
    socket_path: PathBuf,
    shared: Arc<Shared>,
}

/// State shared by every connection: the read-mostly policy engine, the
/// approval registry, and the audit log.
struct Shared {
    engine: PolicyEngine,
    coordinator: Arc<ApprovalCoordinator>,
    logger: Mutex<AuditLogger>,
    session_id: String,
    approval_timeout: Duration,
}

impl GatewayServer {
    pub fn new(
        socket_path: impl AsRef<Path>,
        engine: PolicyEngine,
        coordinator: Arc<ApprovalCoordinator>,
        logger: AuditLogger,
        session_id: String,
        approval_timeout: Duration,
    ) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            shared: Arc::new(Shared {
                engine,
                coordinator,
                logger: Mutex::new(logger),
                session_id,
                approval_timeout,
            }),
        }
    }

    /// Start the gateway. Accepts connections until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind socket: {}", self.socket_path.display()))?;

        tracing::info!("Gateway listening on {}", self.socket_path.display());

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, shared).await {
                            tracing::error!("Connection handler error: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Handle a single agent connection.
///
/// Requests fan out to per-request tasks; their responses funnel through an
/// mpsc channel into one writer task, since decisions can complete out of
/// order once an approval suspends a request.
async fn handle_connection(stream: tokio::net::UnixStream, shared: Arc<Shared>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<GatewayResponse>();

    let writer_task = tokio::spawn(async move {
        while let Some(response) = response_rx.recv().await {
            let json = match serde_json::to_string(&response) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize response: {}", e);
                    continue;
                }
            };
            if writer.write_all(json.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                // Client gone. Keep draining so in-flight tasks can finish;
                // their pending approvals expire via their deadlines.
                tracing::debug!("Client disconnected before response delivery");
            }
        }
    });

    let in_flight: Arc<StdMutex<HashSet<String>>> = Arc::default();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: GatewayRequest = match serde_json::from_str(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                let request_id = salvage_request_id(&line);
                let target = salvage_str_field(&line, "target").unwrap_or_default();
                let reason = ProtocolError::Malformed(e).to_string();
                log_protocol_deny(&shared, &request_id, None, &target, &reason).await;
                let _ = response_tx.send(GatewayResponse::deny(request_id, reason));
                continue;
            }
        };

        // A request_id may not be reused while its first use is in flight.
        let is_duplicate = {
            let mut ids = in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            !ids.insert(request.request_id.clone())
        };
        if is_duplicate {
            let reason =
                ProtocolError::DuplicateRequestId(request.request_id.clone()).to_string();
            log_protocol_deny(
                &shared,
                &request.request_id,
                Some(request.action.clone()),
                &request.target,
                &reason,
            )
            .await;
            let _ = response_tx.send(GatewayResponse::deny(&request.request_id, reason));
            continue;
        }

        let shared = Arc::clone(&shared);
        let response_tx = response_tx.clone();
        let in_flight = Arc::clone(&in_flight);
        tokio::spawn(async move {
            let response = process_request(&request, &shared).await;
            in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&request.request_id);
            // Send failure means the connection went away; nothing to do.
            let _ = response_tx.send(response);
        });
    }

    drop(response_tx);
    let _ = writer_task.await;
    Ok(())
}

/// Evaluate one request to a terminal decision, suspending on approval.
async fn process_request(request: &GatewayRequest, shared: &Shared) -> GatewayResponse {
    let mut context = ActionContext::new(&request.target);
    if let Some(ref payload) = request.payload {
        context = context.with_payload(payload.clone());
    }

    let start = std::time::Instant::now();
    let intent = shared.engine.evaluate(&request.action, &context);
    let eval_duration_us = start.elapsed().as_micros() as u64;

    let matched_rule = intent.matched_rule().map(|r| r.to_string());
    let response = match intent {
        Intent::Allow { .. } => GatewayResponse::allow(&request.request_id),
        Intent::Deny { reason, .. } => GatewayResponse::deny(&request.request_id, reason),
        Intent::RequireApproval { reason, .. } => {
            await_approval(request, shared, &reason).await
        }
    };

    let entry = LogEntry {
        timestamp: Utc::now(),
        session_id: shared.session_id.clone(),
        request_id: request.request_id.clone(),
        action: Some(request.action.clone()),
        target: request.target.clone(),
        verdict: response.decision,
        reason: response.reason.clone(),
        matched_rule,
        eval_duration_us: Some(eval_duration_us),
    };
    if let Err(e) = shared.logger.lock().await.log(&entry) {
        tracing::error!("Failed to write audit log: {}", e);
    }

    response
}

/// Register with the coordinator and suspend until a human rules or the
/// deadline passes. Every non-approved outcome is a deny.
async fn await_approval(
    request: &GatewayRequest,
    shared: &Shared,
    reason: &str,
) -> GatewayResponse {
    let ticket = match shared.coordinator.register(
        &request.request_id,
        request.action.clone(),
        &request.target,
        request.payload.as_deref(),
        reason,
        shared.approval_timeout,
    ) {
        Ok(ticket) => ticket,
        Err(e) => {
            // Same id already pending (e.g. from another connection):
            // a protocol error for this request, resolved as deny.
            return GatewayResponse::deny(&request.request_id, e.to_string());
        }
    };

    match ticket.await_resolution().await {
        Resolution::Approved => GatewayResponse::allow(&request.request_id),
        Resolution::Denied => {
            GatewayResponse::deny(&request.request_id, "Denied by human reviewer")
        }
        Resolution::TimedOut => GatewayResponse::deny(
            &request.request_id,
            "Approval request timed out — denied by default",
        ),
    }
}

/// Audit a request rejected before evaluation (malformed line, duplicate
/// in-flight id). Rejected attempts are part of the record too.
async fn log_protocol_deny(
    shared: &Shared,
    request_id: &str,
    action: Option<Action>,
    target: &str,
    reason: &str,
) {
    let entry = LogEntry {
        timestamp: Utc::now(),
        session_id: shared.session_id.clone(),
        request_id: request_id.to_string(),
        action,
        target: target.to_string(),
        verdict: WireVerdict::Deny,
        reason: Some(reason.to_string()),
        matched_rule: None,
        eval_duration_us: None,
    };
    if let Err(e) = shared.logger.lock().await.log(&entry) {
        tracing::error!("Failed to write audit log: {}", e);
    }
}

/// Pull a request_id out of an unparseable request line, if possible, so
/// the deny response still correlates. Falls back to "unknown".
fn salvage_request_id(line: &str) -> String {
    salvage_str_field(line, "request_id").unwrap_or_else(|| "unknown".to_string())
}

fn salvage_str_field(line: &str, field: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(line.trim())
        .ok()
        .and_then(|v| v.get(field).and_then(|f| f.as_str()).map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salvage_request_id_from_bad_action() {
        let line = r#"{"request_id":"r7","action":"format_disk","target":"/"}"#;
        assert_eq!(salvage_request_id(line), "r7");
        assert_eq!(salvage_str_field(line, "target").as_deref(), Some("/"));
    }

    #[test]
    fn test_salvage_request_id_from_garbage() {
        assert_eq!(salvage_request_id("not json at all"), "unknown");
        assert_eq!(salvage_request_id(r#"{"no_id": true}"#), "unknown");
    }

    #[test]
    fn test_verdict_on_log_entry_matches_response() {
        let response = GatewayResponse::deny("r1", "nope");
        assert_eq!(response.decision, WireVerdict::Deny);
        assert_eq!(response.reason.as_deref(), Some("nope"));
    }
}
