//! SafeCommandExecutor: subprocess execution with redaction and cancellation
//!
//! # Security Features
//!
//! - **Whitelist-based validation**: Only the configured aptly binary can execute
//! - **Injection prevention**: Arguments are passed as a vector, never through a shell
//! - **Working directory validation**: Validates existence before execution
//! - **Redaction**: Sensitive argument values are replaced by `****` in every
//!   line streamed to the sinks and in the logged command line
//! - **Cancellation**: The child is killed and reaped once the token fires
//!
//! # Example
//!
//! ```rust,no_run
//! use aptly_publisher::{CancelToken, CaptureSink, Invocation, NullSink, ProcessInvoker};
//! use aptly_publisher::security::SafeCommandExecutor;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = SafeCommandExecutor::new(std::env::temp_dir(), "aptly")?;
//! let mut stdout = CaptureSink::new();
//!
//! let status = executor
//!     .run(
//!         &Invocation::new("aptly").arg("repo").arg("list").arg("-raw"),
//!         &mut stdout,
//!         &mut NullSink,
//!         &CancelToken::new(),
//!     )
//!     .await?;
//! println!("{}: {}", status, stdout.contents());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::{Child, Command};

use super::redaction::Redactor;
use crate::core::cancel::CancelToken;
use crate::core::error::CommandError;
use crate::core::traits::{
    CommandArg, Invocation, InvocationStatus, OutputSink, ProcessInvoker,
};

/// Exit code reported when the child ended without one (killed by a signal)
const NO_EXIT_CODE: i32 = -1;

/// Safe command executor with security controls
#[derive(Debug, Clone)]
pub struct SafeCommandExecutor {
    /// Working directory where commands will be executed
    working_dir: PathBuf,
    /// Programs allowed to run
    allowed_commands: Vec<String>,
}

impl SafeCommandExecutor {
    /// Create an executor that only runs `binary`.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::InvalidWorkingDirectory` if the directory does not exist.
    pub fn new<P: AsRef<Path>>(
        working_dir: P,
        binary: impl Into<String>,
    ) -> Result<Self, CommandError> {
        let working_dir = working_dir.as_ref().to_path_buf();

        if !working_dir.is_dir() {
            return Err(CommandError::InvalidWorkingDirectory(working_dir));
        }

        Ok(Self {
            working_dir,
            allowed_commands: vec![binary.into()],
        })
    }

    /// Allow one more program
    pub fn allow(mut self, program: impl Into<String>) -> Self {
        self.allowed_commands.push(program.into());
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Child, CommandError> {
        if !self
            .allowed_commands
            .iter()
            .any(|allowed| allowed == &invocation.program)
        {
            return Err(CommandError::CommandNotAllowed(invocation.program.clone()));
        }

        Command::new(&invocation.program)
            .args(invocation.args.iter().map(CommandArg::expose))
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::ExecutionFailed(e.to_string()))
    }
}

/// Line reader over one output pipe
struct Lines<R> {
    segments: Split<BufReader<R>>,
    open: bool,
}

impl<R: AsyncRead + Unpin> Lines<R> {
    fn new(reader: R) -> Self {
        Self {
            segments: BufReader::new(reader).split(b'\n'),
            open: true,
        }
    }

    /// Forward one segment, closing the reader at end of stream
    fn forward(
        &mut self,
        segment: std::io::Result<Option<Vec<u8>>>,
        redactor: &Redactor,
        sink: &mut dyn OutputSink,
    ) -> Result<(), CommandError> {
        match segment {
            Ok(Some(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                let line = text.strip_suffix('\r').unwrap_or(&text);
                sink.write_line(&redactor.redact(line));
                Ok(())
            }
            Ok(None) => {
                self.open = false;
                Ok(())
            }
            Err(e) => Err(CommandError::ExecutionFailed(e.to_string())),
        }
    }
}

async fn terminate(child: &mut Child, command: &str) -> InvocationStatus {
    if let Err(e) = child.kill().await {
        tracing::warn!(op = "process.kill.failed", command = %command, error = %e);
    }
    tracing::warn!(op = "process.cancelled", command = %command);
    InvocationStatus::Cancelled
}

#[async_trait]
impl ProcessInvoker for SafeCommandExecutor {
    async fn run(
        &self,
        invocation: &Invocation,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<InvocationStatus, CommandError> {
        let command = invocation.display_masked();

        if cancel.is_cancelled() {
            tracing::debug!(op = "process.skipped", command = %command);
            return Ok(InvocationStatus::Cancelled);
        }

        let redactor = Redactor::for_invocation(invocation);
        tracing::info!(op = "process.spawn", command = %command);

        let mut child = self.spawn(invocation)?;
        let out_pipe = child
            .stdout
            .take()
            .ok_or_else(|| CommandError::ExecutionFailed("stdout not captured".to_string()))?;
        let err_pipe = child
            .stderr
            .take()
            .ok_or_else(|| CommandError::ExecutionFailed("stderr not captured".to_string()))?;

        let mut out_lines = Lines::new(out_pipe);
        let mut err_lines = Lines::new(err_pipe);

        while out_lines.open || err_lines.open {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(terminate(&mut child, &command).await);
                }
                segment = out_lines.segments.next_segment(), if out_lines.open => {
                    out_lines.forward(segment, &redactor, stdout)?;
                }
                segment = err_lines.segments.next_segment(), if err_lines.open => {
                    err_lines.forward(segment, &redactor, stderr)?;
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(terminate(&mut child, &command).await);
            }
            status = child.wait() => {
                status.map_err(|e| CommandError::ExecutionFailed(e.to_string()))?
            }
        };

        let code = status.code().unwrap_or(NO_EXIT_CODE);
        tracing::debug!(op = "process.exit", command = %command, code);

        Ok(InvocationStatus::Exited(code))
    }
}

/// Forwards each line to the log, tagged with its stream
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    stream: &'static str,
}

impl TracingSink {
    pub fn stdout() -> Self {
        Self { stream: "stdout" }
    }

    pub fn stderr() -> Self {
        Self { stream: "stderr" }
    }
}

impl OutputSink for TracingSink {
    fn write_line(&mut self, line: &str) {
        tracing::info!(op = "process.output", stream = self.stream, "{}", line);
    }
}
