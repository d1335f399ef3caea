//! Approval coordinator — the registry of pending human approvals.
//!
//! A request whose policy intent is require-approval registers here and gets
//! an [`ApprovalTicket`]. The ticket suspends until an external approver
//! resolves the request by id, or the deadline expires. Expiry always maps
//! to a terminal deny: approval absence is never consent.
//!
//! The pending map is the only mutable state shared between request tasks.
//! Commit discipline: whoever removes an entry from the map commits the
//! terminal outcome, so a resolve racing a timeout agrees on exactly one
//! result and the loser is a no-op.

use crate::approval::types::{PendingApproval, Resolution};
use crate::policy::types::Action;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

/// Approval payload previews are truncated to this many characters.
const PREVIEW_MAX_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("request '{0}' already has a pending approval")]
    DuplicatePending(String),
}

#[derive(Debug)]
struct PendingEntry {
    info: PendingApproval,
    /// Taken on resolve; sending while the map lock is held makes the
    /// removal and the verdict delivery a single commit.
    verdict_tx: oneshot::Sender<bool>,
}

#[derive(Debug)]
pub struct ApprovalCoordinator {
    pending: Mutex<HashMap<String, PendingEntry>>,
    announce_tx: broadcast::Sender<PendingApproval>,
}

impl ApprovalCoordinator {
    pub fn new() -> Arc<Self> {
        let (announce_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            announce_tx,
        })
    }

    /// Register a pending approval and get a ticket to await its resolution.
    /// The request id must be unique among currently pending entries.
    pub fn register(
        self: &Arc<Self>,
        request_id: &str,
        action: Action,
        target: &str,
        payload: Option<&str>,
        reason: &str,
        timeout: Duration,
    ) -> Result<ApprovalTicket, RegistrationError> {
        let now = Utc::now();
        let info = PendingApproval {
            request_id: request_id.to_string(),
            action,
            target: target.to_string(),
            payload_preview: payload.map(|p| truncate_preview(p, PREVIEW_MAX_CHARS)),
            reason: reason.to_string(),
            created_at: now,
            deadline: now
                + ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::seconds(300)),
        };

        let (verdict_tx, verdict_rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            if pending.contains_key(request_id) {
                return Err(RegistrationError::DuplicatePending(request_id.to_string()));
            }
            pending.insert(
                request_id.to_string(),
                PendingEntry {
                    info: info.clone(),
                    verdict_tx,
                },
            );
        }

        // No receivers is fine — nobody is watching the approval channel.
        let _ = self.announce_tx.send(info);

        Ok(ApprovalTicket {
            request_id: request_id.to_string(),
            timeout,
            verdict_rx,
            coordinator: Arc::clone(self),
        })
    }

    /// Resolve a pending approval. Returns true if this call committed the
    /// outcome. Unknown or already-resolved ids are a warned no-op so that
    /// late or duplicate resolutions from the human side are tolerated.
    pub fn resolve(&self, request_id: &str, approved: bool) -> bool {
        let mut pending = self.lock_pending();
        match pending.remove(request_id) {
            Some(entry) => {
                // Receiver gone means the requester abandoned the wait;
                // the removal above already reclaimed the entry.
                let _ = entry.verdict_tx.send(approved);
                tracing::info!(request_id, approved, "Pending approval resolved");
                true
            }
            None => {
                tracing::warn!(
                    request_id,
                    "Resolution for unknown or already-resolved request ignored"
                );
                false
            }
        }
    }

    /// Snapshot of currently pending approvals, oldest first.
    pub fn pending(&self) -> Vec<PendingApproval> {
        let mut entries: Vec<PendingApproval> =
            self.lock_pending().values().map(|e| e.info.clone()).collect();
        entries.sort_by_key(|p| p.created_at);
        entries
    }

    /// Subscribe to announcements of newly registered pending approvals.
    pub fn subscribe(&self) -> broadcast::Receiver<PendingApproval> {
        self.announce_tx.subscribe()
    }

    /// Remove an entry on deadline expiry. Returns true if the entry was
    /// still pending, i.e. this expiry committed the timeout outcome.
    fn expire(&self, request_id: &str) -> bool {
        self.lock_pending().remove(request_id).is_some()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A handle for one registered approval. Awaiting it suspends the owning
/// request task until a verdict arrives or the deadline passes.
#[derive(Debug)]
pub struct ApprovalTicket {
    request_id: String,
    timeout: Duration,
    verdict_rx: oneshot::Receiver<bool>,
    coordinator: Arc<ApprovalCoordinator>,
}

impl ApprovalTicket {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Suspend until the approval resolves or times out.
    pub async fn await_resolution(mut self) -> Resolution {
        match tokio::time::timeout(self.timeout, &mut self.verdict_rx).await {
            Ok(Ok(true)) => Resolution::Approved,
            Ok(Ok(false)) => Resolution::Denied,
            // Sender dropped without a verdict (coordinator torn down):
            // fail closed.
            Ok(Err(_)) => Resolution::TimedOut,
            Err(_elapsed) => {
                // Deadline hit. A resolve may have raced us; whoever removes
                // the map entry commits. If the entry is already gone, the
                // verdict was sent before removal completed and is readable.
                if self.coordinator.expire(&self.request_id) {
                    Resolution::TimedOut
                } else {
                    match self.verdict_rx.try_recv() {
                        Ok(true) => Resolution::Approved,
                        Ok(false) => Resolution::Denied,
                        Err(_) => Resolution::TimedOut,
                    }
                }
            }
        }
    }
}

fn truncate_preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars total)", head, s.chars().count())
    }
}
