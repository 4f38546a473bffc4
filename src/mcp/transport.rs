//! stdio transport to an MCP server subprocess.
//!
//! This module implements the client side of the MCP stdio transport:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - child stdin: receives messages from the client
//! - child stdout: sends messages to the client
//! - child stderr: inherited, so server logs reach the user's terminal
//!
//! The transport is split into a [`FrameReader`], a [`FrameWriter`] and an
//! optional [`ProcessHandle`] so the session can hand the reader to its
//! dispatch task while callers share the writer.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::mcp::error::{SessionError, SessionResult};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The program and arguments used to launch a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    /// Executable to run.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
}

impl ServerCommand {
    /// Builds the command for a server entry point.
    ///
    /// The server path is always the single positional argument. When no
    /// launcher is given, one is inferred from the file extension: `.py`
    /// runs under `python3`, `.js`/`.mjs` under `node`, anything else is
    /// executed directly.
    #[must_use]
    pub fn for_entry_point(server_path: &Path, launcher: Option<&str>) -> Self {
        let path = server_path.to_string_lossy().into_owned();

        let inferred = match server_path.extension().and_then(|e| e.to_str()) {
            Some("py") => Some("python3"),
            Some("js" | "mjs") => Some("node"),
            _ => None,
        };

        match launcher.or(inferred) {
            Some(program) => Self {
                program: program.to_string(),
                args: vec![path],
            },
            None => Self {
                program: path,
                args: Vec::new(),
            },
        }
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Reads newline-delimited frames from the server.
pub struct FrameReader {
    reader: BufReader<BoxedReader>,
    closed: bool,
}

impl FrameReader {
    /// Wraps an async byte stream.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: BufReader::new(Box::new(reader)),
            closed: false,
        }
    }

    /// Reads the next non-empty frame.
    ///
    /// Returns `None` once the stream has reached EOF. Invalid UTF-8 is
    /// replaced rather than treated as a read error, so a garbled frame
    /// reaches the codec and is counted as a decode failure.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the stream fails.
    pub async fn receive(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();

        while !self.closed {
            buf.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut buf).await?;

            if bytes_read == 0 {
                self.closed = true;
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            let frame = line.trim_end_matches(['\n', '\r']);
            if frame.trim().is_empty() {
                continue;
            }

            return Ok(Some(frame.to_string()));
        }

        Ok(None)
    }
}

/// Writes newline-delimited frames to the server.
pub struct FrameWriter {
    writer: Option<BoxedWriter>,
}

impl FrameWriter {
    /// Wraps an async byte sink.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Some(Box::new(writer)),
        }
    }

    /// Writes one frame followed by a newline and flushes.
    ///
    /// A failed write closes the writer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Transport` if the writer is closed or the
    /// write fails (for example a broken pipe after the server exited).
    pub async fn send(&mut self, frame: &str) -> SessionResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(SessionError::transport("outbound stream already closed"));
        };

        let result = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        result.map_err(|e| {
            self.writer = None;
            SessionError::transport(format!("failed to write to server: {e}"))
        })
    }

    /// Shuts down and drops the outbound stream. The server sees EOF on its
    /// stdin.
    pub async fn close(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Error closing outbound stream");
        }
    }

    /// Whether the writer has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

/// Owns the server child process.
pub struct ProcessHandle {
    child: Child,
    command: String,
}

impl ProcessHandle {
    /// The command line the process was started with.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id, if the process has not been reaped yet.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits for the process to exit, killing it once `timeout` elapses.
    ///
    /// Always returns; `None` means the exit status could not be collected.
    pub async fn shutdown(mut self, timeout: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(command = %self.command, %status, "Server process exited");
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(command = %self.command, error = %e, "Failed to wait for server process");
                self.force_kill().await
            }
            Err(_) => {
                warn!(
                    command = %self.command,
                    timeout_ms = timeout.as_millis(),
                    "Server did not exit in time, killing it"
                );
                self.force_kill().await
            }
        }
    }

    async fn force_kill(&mut self) -> Option<ExitStatus> {
        if let Err(e) = self.child.kill().await {
            warn!(command = %self.command, error = %e, "Failed to kill server process");
        }
        self.child.try_wait().ok().flatten()
    }
}

/// A bidirectional frame transport, optionally backed by a child process.
pub struct StdioTransport {
    reader: FrameReader,
    writer: FrameWriter,
    process: Option<ProcessHandle>,
}

impl StdioTransport {
    /// Spawns the server and wires its stdin/stdout.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Spawn` carrying the attempted command if the
    /// process cannot be started or its pipes cannot be captured.
    pub fn spawn(command: &ServerCommand) -> SessionResult<Self> {
        let command_line = command.to_string();
        debug!(command = %command_line, "Spawning MCP server");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| SessionError::Spawn {
            command: command_line.clone(),
            source: io::Error::other("failed to capture stdin"),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| SessionError::Spawn {
            command: command_line.clone(),
            source: io::Error::other("failed to capture stdout"),
        })?;

        info!(command = %command_line, pid = ?child.id(), "MCP server started");

        Ok(Self {
            reader: FrameReader::new(stdout),
            writer: FrameWriter::new(stdin),
            process: Some(ProcessHandle {
                child,
                command: command_line,
            }),
        })
    }

    /// Builds a transport over arbitrary streams, with no child process.
    pub fn from_streams(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            process: None,
        }
    }

    /// Splits the transport into its reader, writer and process handle.
    #[must_use]
    pub fn into_parts(self) -> (FrameReader, FrameWriter, Option<ProcessHandle>) {
        (self.reader, self.writer, self.process)
    }
}
