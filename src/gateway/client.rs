//! Gateway client — sends requests to the gateway over a Unix socket.
//!
//! Used by agent-side shims (which live outside this crate) and by the
//! integration tests. Synchronous on purpose: a shim translates one tool
//! invocation into one request and turns the decision into an exit code.

use crate::gateway::protocol::{GatewayRequest, GatewayResponse};
use crate::policy::types::Action;
use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct GatewayClient {
    socket_path: PathBuf,
}

impl GatewayClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Create a client using the AGENTGATE_SOCKET environment variable.
    pub fn from_env() -> Result<Self> {
        let socket_path = std::env::var("AGENTGATE_SOCKET").context(
            "AGENTGATE_SOCKET environment variable not set. Is the gateway running?",
        )?;
        Ok(Self::new(socket_path))
    }

    /// Send a request and wait for its decision.
    /// Each call opens a new connection — simple and reliable.
    pub fn send(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).with_context(|| {
            format!(
                "Failed to connect to gateway at {}. Is it running?",
                self.socket_path.display()
            )
        })?;

        let json = serde_json::to_string(request)?;
        stream.write_all(json.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line)?;

        let response: GatewayResponse = serde_json::from_str(response_line.trim())
            .context("Failed to parse gateway response")?;

        Ok(response)
    }

    /// Convenience: ask to write a file.
    pub fn write_file(&self, path: &str, content: &str) -> Result<GatewayResponse> {
        self.send(&GatewayRequest {
            request_id: Uuid::new_v4().to_string(),
            action: Action::Write,
            target: path.to_string(),
            payload: Some(content.to_string()),
        })
    }

    /// Convenience: ask to delete a file.
    pub fn delete_file(&self, path: &str) -> Result<GatewayResponse> {
        self.send(&GatewayRequest {
            request_id: Uuid::new_v4().to_string(),
            action: Action::Delete,
            target: path.to_string(),
            payload: None,
        })
    }

    /// Convenience: ask to run a shell command.
    pub fn run_cmd(&self, command: &str) -> Result<GatewayResponse> {
        self.send(&GatewayRequest {
            request_id: Uuid::new_v4().to_string(),
            action: Action::RunCmd,
            target: "shell".to_string(),
            payload: Some(command.to_string()),
        })
    }

    /// Convenience: ask to push a branch.
    pub fn git_push(&self, branch: &str) -> Result<GatewayResponse> {
        self.send(&GatewayRequest {
            request_id: Uuid::new_v4().to_string(),
            action: Action::GitPush,
            target: branch.to_string(),
            payload: None,
        })
    }
}
