//! Stdio transport: the MCP server is a child process speaking
//! newline-delimited JSON-RPC over stdin/stdout.

use crate::protocol::{InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::server::{StdioConfig, TransportKind};
use crate::transport::{Transport, TransportError, TransportResult};
use async_trait::async_trait;
use mcpvisor_util::expand_env;
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Stdio transport for local MCP servers.
pub struct StdioTransport {
    name: String,
    config: StdioConfig,
    /// How long `disconnect` waits for the process to exit after SIGTERM.
    exit_timeout: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stderr_task: Option<JoinHandle<()>>,
    initialized: bool,
    next_id: u64,
    server_info: Vec<(String, String)>,
}

impl StdioTransport {
    pub fn new(name: &str, config: &StdioConfig, exit_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            config: config.clone(),
            exit_timeout,
            child: None,
            stdin: None,
            stdout: None,
            stderr_task: None,
            initialized: false,
            next_id: 1,
            server_info: Vec::new(),
        }
    }

    /// Environment overrides with `$VAR` references resolved.
    pub fn resolved_env(&self) -> HashMap<String, String> {
        self.config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env(v)))
            .collect()
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn spawn(&mut self) -> TransportResult<()> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(self.resolved_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(server = %self.name, command = %self.config.command, args = ?self.config.args, "Starting MCP server process");

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::new(format!("Failed to start '{}': {e}", self.config.command))
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Keep the child before anything else can fail so teardown can reap it.
        self.child = Some(child);

        let stdin = stdin.ok_or_else(|| TransportError::new("Failed to get stdin"))?;
        let stdout = stdout.ok_or_else(|| TransportError::new("Failed to get stdout"))?;
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout).lines());

        if let Some(stderr) = stderr {
            let name = self.name.clone();
            self.stderr_task = Some(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "stderr: {line}");
                }
            }));
        }

        Ok(())
    }

    async fn send<T: Serialize>(&mut self, message: &T) -> TransportResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TransportError::new("Transport closed"))?;
        let mut line = serde_json::to_string(message)?;
        trace!(message = %line, "Sending stdio message");
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read lines until the response to `id` arrives, skipping logs,
    /// notifications and server-initiated requests.
    async fn read_response(&mut self, id: u64) -> TransportResult<JsonRpcResponse> {
        loop {
            let stdout = self
                .stdout
                .as_mut()
                .ok_or_else(|| TransportError::new("Transport closed"))?;

            let Some(line) = stdout.next_line().await? else {
                return Err(self.closed_error());
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(line) {
                Ok(response) if response.answers(id) => return Ok(response),
                Ok(_) => trace!(server = %self.name, "Skipping unrelated message"),
                Err(_) => debug!(server = %self.name, "Ignoring non-protocol output: {line}"),
            }
        }
    }

    async fn request(&mut self, request: JsonRpcRequest) -> TransportResult<JsonRpcResponse> {
        let id = request.id;
        self.send(&request).await?;
        self.read_response(id).await
    }

    fn closed_error(&mut self) -> TransportError {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(Some(status))) => {
                TransportError::new(format!("Server process exited ({status})"))
            }
            _ => TransportError::new("Server closed stdout"),
        }
    }

    async fn handshake(&mut self) -> TransportResult<()> {
        let id = self.next_request_id();
        let response = self.request(JsonRpcRequest::initialize(id)).await?;
        let result = response
            .into_result()
            .map_err(|e| TransportError::new(format!("Initialization failed: {e}")))?;
        let init: InitializeResult = serde_json::from_value(result).unwrap_or_default();
        self.server_info = init.metadata();

        self.send(&JsonRpcNotification::initialized()).await?;
        self.initialized = true;
        debug!(server = %self.name, "MCP server initialized");
        Ok(())
    }

    fn release_pipes(&mut self) {
        self.stdin = None;
        self.stdout = None;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.initialized = false;
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: the pid belongs to a child we spawned and have not reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.child.is_some() {
            return Err(TransportError::new("Already connected"));
        }
        self.spawn()?;

        if self.config.handshake {
            self.handshake().await
        } else {
            match self.child.as_mut().map(|c| c.try_wait()) {
                Some(Ok(None)) => Ok(()),
                Some(Ok(Some(status))) => Err(TransportError::new(format!(
                    "Server process exited immediately ({status})"
                ))),
                Some(Err(e)) => Err(e.into()),
                None => Err(TransportError::new("Server process missing")),
            }
        }
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.release_pipes();
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(server = %self.name, %status, "Server process already exited");
            return Ok(());
        }

        terminate(&mut child);
        match tokio::time::timeout(self.exit_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = %self.name, %status, "Server process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(server = %self.name, "Server ignored SIGTERM, killing");
                child.kill().await?;
                Ok(())
            }
        }
    }

    async fn healthcheck(&mut self) -> TransportResult<()> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| TransportError::new("Not connected"))?;

        if let Some(status) = child.try_wait()? {
            return Err(TransportError::new(format!(
                "Server process exited ({status})"
            )));
        }

        if self.initialized {
            let id = self.next_request_id();
            // Any answer, even a JSON-RPC error, proves the session is alive.
            self.request(JsonRpcRequest::ping(id)).await?;
        }
        Ok(())
    }

    async fn force_terminate(&mut self) {
        self.release_pipes();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(server = %self.name, error = %e, "Failed to kill server process");
            }
        }
    }

    fn metadata(&self) -> Vec<(String, String)> {
        let mut meta = vec![
            ("transport".to_string(), "stdio".to_string()),
            ("command".to_string(), self.config.command.clone()),
        ];
        if let Some(pid) = self.child.as_ref().and_then(|c| c.id()) {
            meta.push(("pid".to_string(), pid.to_string()));
        }
        meta.extend(self.server_info.iter().cloned());
        meta
    }
}
