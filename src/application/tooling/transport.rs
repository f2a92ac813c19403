//! Subprocess JSON-RPC transport.
//!
//! One transport owns one child process and exchanges newline-framed
//! JSON-RPC 2.0 over its stdin/stdout. stderr is inherited from the parent
//! so server diagnostics stay visible to the operator. The tokio runtime
//! takes care of the platform differences the pipe polling would otherwise
//! branch on.

use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::error::TransportError;
use crate::config::ServerLaunchConfig;

const SPAWN_PROBE_DELAY: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct StdioTransport {
    server: String,
    config: ServerLaunchConfig,
    state: Option<Pipes>,
    next_request_id: u64,
}

struct Pipes {
    child: Child,
    writer: BufWriter<ChildStdin>,
    reader: BufReader<ChildStdout>,
}

impl StdioTransport {
    pub fn new(server: impl Into<String>, config: ServerLaunchConfig) -> Self {
        Self {
            server: server.into(),
            config,
            state: None,
            next_request_id: 0,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server
    }

    pub fn config(&self) -> &ServerLaunchConfig {
        &self.config
    }

    /// Spawn the server process. Idempotent while the child is running.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.state.is_some() {
            return Ok(());
        }

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.workdir {
            command.current_dir(dir);
        }

        debug!(
            server = %self.server,
            command = %self.config.command.display(),
            "starting tool server"
        );
        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            server: self.server.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.io_error("failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.io_error("failed to capture server stdout"))?;

        // Catch servers that crash immediately (bad command, missing deps).
        sleep(SPAWN_PROBE_DELAY).await;
        if let Ok(Some(status)) = child.try_wait() {
            warn!(server = %self.server, %status, "tool server exited during startup");
            return Err(TransportError::ServerDied {
                server: self.server.clone(),
            });
        }

        self.state = Some(Pipes {
            child,
            writer: BufWriter::new(stdin),
            reader: BufReader::new(stdout),
        });
        Ok(())
    }

    pub fn is_connected(&mut self) -> bool {
        match self.state.as_mut() {
            Some(pipes) => !matches!(pipes.child.try_wait(), Ok(Some(_))),
            None => false,
        }
    }

    /// Send one request and wait for the matching response line.
    ///
    /// Returns the whole response object, `error` field included, so the
    /// caller can interpret JSON-RPC errors itself.
    pub async fn send_request(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        if self.state.is_none() {
            return Err(TransportError::NotConnected {
                server: self.server.clone(),
            });
        }
        if !self.is_connected() {
            self.state = None;
            return Err(TransportError::ServerDied {
                server: self.server.clone(),
            });
        }

        let id = self.next_request_id;
        self.next_request_id += 1;
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(server = %self.server, method, id, "sending request");

        let deadline = self.config.request_timeout();
        let server = self.server.clone();
        let Some(pipes) = self.state.as_mut() else {
            return Err(TransportError::NotConnected { server });
        };

        let mut line = request.to_string();
        line.push('\n');
        pipes
            .writer
            .write_all(line.as_bytes())
            .await
            .map_err(|source| TransportError::Io {
                server: server.clone(),
                source,
            })?;
        pipes
            .writer
            .flush()
            .await
            .map_err(|source| TransportError::Io {
                server: server.clone(),
                source,
            })?;

        let mut response_line = String::new();
        let bytes_read = match timeout(deadline, pipes.reader.read_line(&mut response_line)).await
        {
            Err(_) => {
                warn!(server = %server, method, "request timed out");
                return Err(TransportError::Timeout {
                    server,
                    timeout: deadline,
                });
            }
            Ok(Err(source)) => return Err(TransportError::Io { server, source }),
            Ok(Ok(n)) => n,
        };

        if bytes_read == 0 {
            let died = matches!(pipes.child.try_wait(), Ok(Some(_)));
            self.state = None;
            return Err(if died {
                TransportError::ServerDied { server }
            } else {
                TransportError::ConnectionClosed { server }
            });
        }

        while response_line.ends_with('\n') || response_line.ends_with('\r') {
            response_line.pop();
        }
        serde_json::from_str(&response_line)
            .map_err(|source| TransportError::MalformedResponse { server, source })
    }

    /// Close the pipes and stop the child. Waits up to five seconds for a
    /// graceful exit after stdin closes, then kills. Idempotent.
    pub async fn disconnect(&mut self) {
        let Some(pipes) = self.state.take() else {
            return;
        };
        let Pipes {
            mut child,
            writer,
            reader,
        } = pipes;
        drop(writer);
        drop(reader);

        match timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = %self.server, %status, "tool server exited");
            }
            Ok(Err(source)) => {
                warn!(server = %self.server, %source, "failed waiting for tool server");
            }
            Err(_) => {
                warn!(server = %self.server, "tool server did not exit in time, killing");
                if let Err(source) = child.kill().await {
                    debug!(
                        server = %self.server,
                        %source,
                        "kill failed (process may have already exited)"
                    );
                }
            }
        }
    }

    fn io_error(&self, message: &str) -> TransportError {
        TransportError::Io {
            server: self.server.clone(),
            source: std::io::Error::other(message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_without_connect_is_not_connected() {
        let mut transport =
            StdioTransport::new("test", ServerLaunchConfig::new("does-not-matter"));
        let err = transport
            .send_request("initialize", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn connect_reports_missing_command() {
        let mut transport = StdioTransport::new(
            "test",
            ServerLaunchConfig::new("/nonexistent/agentry-test-binary"),
        );
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut transport =
            StdioTransport::new("test", ServerLaunchConfig::new("does-not-matter"));
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(!transport.is_connected());
    }
}
