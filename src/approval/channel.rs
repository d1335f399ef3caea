//! Approval channel — the attachment point for external approvers.
//!
//! Listens on its own Unix socket, separate from the gateway socket. A
//! connected approver receives the currently pending approvals and every
//! new announcement as JSON lines, and writes verdict lines
//! (`{"request_id": "...", "approved": true}`) back. The human-facing UI
//! behind this socket is out of scope; this is only the transport.

use crate::approval::coordinator::ApprovalCoordinator;
use crate::approval::types::{ApprovalVerdict, PendingApproval};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

pub struct ApprovalChannel {
    socket_path: PathBuf,
    coordinator: Arc<ApprovalCoordinator>,
}

impl ApprovalChannel {
    pub fn new(socket_path: impl AsRef<Path>, coordinator: Arc<ApprovalCoordinator>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            coordinator,
        }
    }

    /// Accept approver connections until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path).with_context(|| {
            format!(
                "Failed to bind approval socket: {}",
                self.socket_path.display()
            )
        })?;

        tracing::info!(
            "Approval channel listening on {}",
            self.socket_path.display()
        );

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let coordinator = Arc::clone(&self.coordinator);
                    tokio::spawn(async move {
                        if let Err(e) = handle_approver(stream, coordinator).await {
                            tracing::warn!("Approver connection error: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept approver connection: {}", e);
                }
            }
        }
    }
}

/// Serve one connected approver: stream announcements out, read verdicts in.
async fn handle_approver(
    stream: UnixStream,
    coordinator: Arc<ApprovalCoordinator>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // Subscribe before the backlog snapshot so nothing is missed between.
    // An approval registered in that window shows up twice (snapshot and
    // broadcast); the dedup drops the broadcast copy.
    let mut announcements = coordinator.subscribe();
    let mut dedup = BacklogDedup::new();
    for pending in coordinator.pending() {
        dedup.record(&pending);
        write_announcement(&mut writer, &pending).await?;
    }

    loop {
        tokio::select! {
            announced = announcements.recv() => match announced {
                Ok(pending) => {
                    if !dedup.is_replayed(&pending) {
                        write_announcement(&mut writer, &pending).await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Approver connection lagged behind announcements");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match serde_json::from_str::<ApprovalVerdict>(line.trim()) {
                    Ok(verdict) => {
                        coordinator.resolve(&verdict.request_id, verdict.approved);
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring malformed approver verdict: {}", e);
                    }
                },
                None => break, // approver disconnected
            },
        }
    }

    Ok(())
}

/// Tracks which pending entries a connection already replayed from the
/// backlog snapshot, so their broadcast copies are not sent again.
struct BacklogDedup {
    replayed: HashMap<String, DateTime<Utc>>,
}

impl BacklogDedup {
    fn new() -> Self {
        Self {
            replayed: HashMap::new(),
        }
    }

    fn record(&mut self, pending: &PendingApproval) {
        self.replayed
            .insert(pending.request_id.clone(), pending.created_at);
    }

    /// True only for the broadcast copy of an entry already replayed from
    /// the backlog. A later re-registration under the same id carries a new
    /// created_at and passes through.
    fn is_replayed(&mut self, pending: &PendingApproval) -> bool {
        self.replayed.remove(&pending.request_id) == Some(pending.created_at)
    }
}

async fn write_announcement(
    writer: &mut (impl AsyncWriteExt + Unpin),
    pending: &PendingApproval,
) -> Result<()> {
    let json = serde_json::to_string(pending)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::Action;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_approver_resolves_over_socket() {
        let tmp = TempDir::new().unwrap();
        let socket = tmp.path().join("approvals.sock");

        let coordinator = ApprovalCoordinator::new();
        let channel = ApprovalChannel::new(&socket, Arc::clone(&coordinator));
        tokio::spawn(async move { channel.run().await });

        // Wait for the socket to appear
        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let ticket = coordinator
            .register(
                "req-42",
                Action::GitPush,
                "main",
                None,
                "review",
                Duration::from_secs(30),
            )
            .unwrap();

        let stream = UnixStream::connect(&socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // The pre-existing pending entry arrives as the backlog
        let line = lines.next_line().await.unwrap().unwrap();
        let announced: PendingApproval = serde_json::from_str(&line).unwrap();
        assert_eq!(announced.request_id, "req-42");

        let verdict = serde_json::to_string(&ApprovalVerdict {
            request_id: "req-42".to_string(),
            approved: true,
        })
        .unwrap();
        writer.write_all(verdict.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        writer.flush().await.unwrap();

        assert!(ticket.await_resolution().await.is_approved());
    }

    fn pending_entry(id: &str) -> PendingApproval {
        let now = Utc::now();
        PendingApproval {
            request_id: id.to_string(),
            action: Action::GitPush,
            target: "main".to_string(),
            payload_preview: None,
            reason: "review".to_string(),
            created_at: now,
            deadline: now,
        }
    }

    #[test]
    fn test_backlog_dedup_drops_single_broadcast_copy() {
        let mut dedup = BacklogDedup::new();
        let entry = pending_entry("req-1");
        dedup.record(&entry);

        assert!(dedup.is_replayed(&entry));
        // Only the one broadcast copy is suppressed
        assert!(!dedup.is_replayed(&entry));
    }

    #[test]
    fn test_backlog_dedup_passes_reregistration() {
        let mut dedup = BacklogDedup::new();
        let first = pending_entry("req-1");
        dedup.record(&first);

        // Same id registered again after the first resolved: new created_at,
        // must be announced
        let mut second = pending_entry("req-1");
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        assert!(!dedup.is_replayed(&second));
    }

    #[test]
    fn test_backlog_dedup_ignores_unrelated_ids() {
        let mut dedup = BacklogDedup::new();
        dedup.record(&pending_entry("req-1"));
        assert!(!dedup.is_replayed(&pending_entry("req-2")));
    }
}
