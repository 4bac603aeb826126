use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{forward, Inbound, InboundSender, Transport};
use crate::errors::McpError;

const EXIT_GRACE: Duration = Duration::from_millis(500);

/// A server running as a child process, speaking newline delimited JSON on stdio.
pub struct StdioTransport {
    command: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<(Self, Inbound), McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Transport(format!("failed to spawn '{command}': {e}")))?;

        let missing = || McpError::Transport(format!("'{command}' was spawned without pipes"));
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        let stderr = child.stderr.take().ok_or_else(missing)?;

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(read_stdout(stdout, inbound_tx));
        tokio::spawn(forward_stderr(command.to_string(), stderr));

        Ok((
            Self {
                command: command.to_string(),
                stdin: Mutex::new(Some(stdin)),
                child: Mutex::new(child),
            },
            inbound,
        ))
    }
}

async fn read_stdout(stdout: ChildStdout, inbound: InboundSender) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => forward(&line, &inbound),
            Ok(None) => {
                let _ = inbound.send(Err(McpError::Disconnected(
                    "server closed its output".to_string(),
                )));
                break;
            }
            Err(e) => {
                let _ = inbound.send(Err(McpError::from_io(e)));
                break;
            }
        }
    }
}

async fn forward_stderr(command: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(command = %command, "{line}");
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: Value) -> Result<(), McpError> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or_else(|| McpError::Disconnected(format!("stdin of '{}' is closed", self.command)))?;
        stdin.write_all(&line).await.map_err(McpError::from_io)?;
        stdin.flush().await.map_err(McpError::from_io)
    }

    async fn close(&self) -> Result<(), McpError> {
        // Closing stdin asks the server to exit.
        drop(self.stdin.lock().await.take());

        let mut child = self.child.lock().await;
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(command = %self.command, %status, "MCP server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(McpError::from_io(e)),
            Err(_) => {
                debug!(command = %self.command, "MCP server did not exit in time, killing it");
                child.kill().await.map_err(McpError::from_io)
            }
        }
    }
}
