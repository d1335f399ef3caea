//! Integration tests for the gateway server: wire protocol, per-request
//! concurrency, protocol-error handling, and the approval flow end to end.

use agentgate::approval::ApprovalCoordinator;
use agentgate::audit::AuditLogger;
use agentgate::gateway::protocol::{GatewayRequest, GatewayResponse, WireVerdict};
use agentgate::gateway::{GatewayClient, GatewayServer};
use agentgate::policy::parser::parse_ruleset_str;
use agentgate::policy::types::{Action, DefaultVerdict};
use agentgate::policy::{PolicyEngine, PolicyStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

const TEST_RULES: &str = r#"
policy: gateway-test
rules:
  - deny: write
    if_path_matches: [".env*"]
    reason: "Protected file"
  - allow: write
    if_path_matches: ["src/**"]
  - allow: run_cmd
    if_matches: ["cargo *"]
"#;

struct TestGateway {
    /// Keeps the socket directory alive for the test's duration
    _tmp: TempDir,
    socket: PathBuf,
    coordinator: Arc<ApprovalCoordinator>,
    audit_log: PathBuf,
}

async fn start_gateway(approval_timeout: Duration) -> TestGateway {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("gateway.sock");
    let audit_log = tmp.path().join("audit.jsonl");

    let ruleset = parse_ruleset_str(TEST_RULES).unwrap();
    let store = Arc::new(PolicyStore::from_ruleset(ruleset).unwrap());
    let engine = PolicyEngine::new(store, DefaultVerdict::Deny);
    let coordinator = ApprovalCoordinator::new();
    let logger = AuditLogger::with_path(&audit_log).unwrap();

    let server = GatewayServer::new(
        &socket,
        engine,
        Arc::clone(&coordinator),
        logger,
        "test-session".to_string(),
        approval_timeout,
    );
    tokio::spawn(async move { server.run().await });

    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    TestGateway {
        _tmp: tmp,
        socket,
        coordinator,
        audit_log,
    }
}

struct Session {
    lines: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl Session {
    async fn connect(socket: &Path) -> Self {
        let stream = UnixStream::connect(socket).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, request: &GatewayRequest) {
        self.send_raw(&serde_json::to_string(request).unwrap()).await;
    }

    async fn recv(&mut self) -> GatewayResponse {
        let line = self.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

fn request(id: &str, action: Action, target: &str, payload: Option<&str>) -> GatewayRequest {
    GatewayRequest {
        request_id: id.to_string(),
        action,
        target: target.to_string(),
        payload: payload.map(|p| p.to_string()),
    }
}

#[tokio::test]
async fn test_allow_and_deny_over_the_wire() {
    let gateway = start_gateway(Duration::from_secs(30)).await;
    let mut session = Session::connect(&gateway.socket).await;

    session
        .send(&request("w1", Action::Write, "src/main.rs", Some("fn main() {}")))
        .await;
    let response = session.recv().await;
    assert_eq!(response.request_id, "w1");
    assert!(response.is_allowed());
    assert!(response.reason.is_none());

    session
        .send(&request("w2", Action::Write, ".env", Some("SECRET=1")))
        .await;
    let response = session.recv().await;
    assert_eq!(response.request_id, "w2");
    assert!(!response.is_allowed());
    assert_eq!(response.reason.as_deref(), Some("Protected file"));
}

#[tokio::test]
async fn test_malformed_request_denies_but_connection_survives() {
    let gateway = start_gateway(Duration::from_secs(30)).await;
    let mut session = Session::connect(&gateway.socket).await;

    session.send_raw("this is not json").await;
    let response = session.recv().await;
    assert_eq!(response.request_id, "unknown");
    assert!(!response.is_allowed());
    assert!(response.reason.unwrap().contains("Invalid request JSON"));

    // Unknown action still salvages the id for correlation
    session
        .send_raw(r#"{"request_id":"u1","action":"format_disk","target":"/"}"#)
        .await;
    let response = session.recv().await;
    assert_eq!(response.request_id, "u1");
    assert!(!response.is_allowed());

    // The same connection keeps working
    session
        .send(&request("w3", Action::Write, "src/lib.rs", Some("")))
        .await;
    let response = session.recv().await;
    assert_eq!(response.request_id, "w3");
    assert!(response.is_allowed());
}

#[tokio::test]
async fn test_duplicate_in_flight_id_denied() {
    let gateway = start_gateway(Duration::from_secs(30)).await;
    let mut session = Session::connect(&gateway.socket).await;

    // First use suspends on approval, keeping the id in flight
    session
        .send(&request("dup", Action::GitPush, "main", None))
        .await;

    // Wait until the pending approval is registered
    for _ in 0..100 {
        if !gateway.coordinator.pending().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Reuse while in flight is a protocol error
    session
        .send(&request("dup", Action::Write, "src/main.rs", Some("x")))
        .await;
    let response = session.recv().await;
    assert_eq!(response.request_id, "dup");
    assert!(!response.is_allowed());
    assert!(response.reason.unwrap().contains("Duplicate in-flight"));

    // The original request is unaffected and resolves normally
    assert!(gateway.coordinator.resolve("dup", true));
    let response = session.recv().await;
    assert_eq!(response.request_id, "dup");
    assert!(response.is_allowed());
}

#[tokio::test]
async fn test_pending_request_does_not_block_later_ones() {
    let gateway = start_gateway(Duration::from_secs(30)).await;
    let mut session = Session::connect(&gateway.socket).await;

    // git_push suspends for approval; the write behind it must not wait
    session
        .send(&request("push", Action::GitPush, "main", None))
        .await;
    session
        .send(&request("write", Action::Write, "src/main.rs", Some("x")))
        .await;

    // The later request answers first
    let response = session.recv().await;
    assert_eq!(response.request_id, "write");
    assert!(response.is_allowed());

    // Approve the suspended one; its response arrives out of order
    for _ in 0..100 {
        if gateway.coordinator.resolve("push", true) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let response = session.recv().await;
    assert_eq!(response.request_id, "push");
    assert!(response.is_allowed());
}

#[tokio::test]
async fn test_approval_timeout_is_a_wire_deny() {
    let gateway = start_gateway(Duration::from_millis(100)).await;
    let mut session = Session::connect(&gateway.socket).await;

    session
        .send(&request("push", Action::GitPush, "main", None))
        .await;
    let response = session.recv().await;
    assert_eq!(response.request_id, "push");
    assert!(!response.is_allowed());
    assert!(response.reason.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_human_denial_is_a_wire_deny() {
    let gateway = start_gateway(Duration::from_secs(30)).await;
    let mut session = Session::connect(&gateway.socket).await;

    session
        .send(&request("push", Action::GitPush, "main", None))
        .await;

    for _ in 0..100 {
        if gateway.coordinator.resolve("push", false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = session.recv().await;
    assert!(!response.is_allowed());
    assert!(response.reason.unwrap().contains("Denied by human reviewer"));
}

#[tokio::test]
async fn test_concurrent_connections_are_independent() {
    let gateway = start_gateway(Duration::from_secs(30)).await;
    let mut first = Session::connect(&gateway.socket).await;
    let mut second = Session::connect(&gateway.socket).await;

    // The same request_id may be in flight on different connections, as
    // long as neither holds a pending approval under it
    first
        .send(&request("r1", Action::Write, "src/a.rs", Some("a")))
        .await;
    second
        .send(&request("r1", Action::Write, ".env", Some("b")))
        .await;

    assert!(first.recv().await.is_allowed());
    assert!(!second.recv().await.is_allowed());
}

#[tokio::test]
async fn test_sync_client_roundtrip() {
    let gateway = start_gateway(Duration::from_secs(30)).await;
    let socket = gateway.socket.clone();

    let responses = tokio::task::spawn_blocking(move || {
        let client = GatewayClient::new(&socket);
        let allowed = client.run_cmd("cargo build").unwrap();
        let denied = client.run_cmd("python evil.py").unwrap();
        (allowed, denied)
    })
    .await
    .unwrap();

    assert!(responses.0.is_allowed());
    assert!(!responses.1.is_allowed());
    assert_eq!(responses.1.reason.as_deref(), Some("no matching rule"));
}

#[tokio::test]
async fn test_decisions_are_audit_logged() {
    let gateway = start_gateway(Duration::from_secs(30)).await;
    let mut session = Session::connect(&gateway.socket).await;

    session
        .send(&request("w1", Action::Write, "src/main.rs", Some("x")))
        .await;
    session.recv().await;
    session
        .send(&request("w2", Action::Write, ".env", Some("y")))
        .await;
    session.recv().await;

    let content = std::fs::read_to_string(&gateway.audit_log).unwrap();
    let entries: Vec<agentgate::audit::LogEntry> = content
        .trim()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.request_id == "w1"));
    assert!(entries.iter().any(|e| e.request_id == "w2"));
}

#[tokio::test]
async fn test_protocol_errors_are_audit_logged() {
    let gateway = start_gateway(Duration::from_secs(30)).await;
    let mut session = Session::connect(&gateway.socket).await;

    // Rejected before evaluation: unparseable line, unknown action
    session.send_raw("not json at all").await;
    session.recv().await;
    session
        .send_raw(r#"{"request_id":"u1","action":"format_disk","target":"/"}"#)
        .await;
    session.recv().await;

    // Rejected before evaluation: duplicate in-flight id
    session
        .send(&request("dup", Action::GitPush, "main", None))
        .await;
    for _ in 0..100 {
        if !gateway.coordinator.pending().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    session
        .send(&request("dup", Action::Write, "src/x.rs", Some("x")))
        .await;
    session.recv().await;
    gateway.coordinator.resolve("dup", true);
    session.recv().await;

    let content = std::fs::read_to_string(&gateway.audit_log).unwrap();
    let entries: Vec<agentgate::audit::LogEntry> = content
        .trim()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    // Three pre-evaluation denies plus the resolved original
    assert_eq!(entries.len(), 4);
    let denied: Vec<_> = entries
        .iter()
        .filter(|e| e.verdict == WireVerdict::Deny)
        .collect();
    assert_eq!(denied.len(), 3);
    assert!(denied
        .iter()
        .any(|e| e.request_id == "unknown" && e.action.is_none()));
    assert!(denied.iter().any(|e| e.request_id == "u1" && e.target == "/"));
    assert!(denied.iter().any(|e| {
        e.request_id == "dup" && e.reason.as_deref().unwrap_or("").contains("Duplicate")
    }));
}
