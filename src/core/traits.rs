//! Core traits and types for repository publishing
//!
//! This module defines the collaborator boundaries the pipeline is written
//! against: running an external command, resolving a signing credential, and
//! the output sinks a command streams into.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use uuid::Uuid;

use super::cancel::CancelToken;
use super::error::CommandError;

/// Replacement text for sensitive values in every rendered trace
pub const MASK: &str = "****";

// ============================================================================
// Command invocation
// ============================================================================

/// A single command-line argument
///
/// Sensitive arguments keep their secret part inside a `SecretString` so that
/// `Debug`, `Display`, and command traces never show it.
pub enum CommandArg {
    Plain(String),
    Sensitive {
        /// Non-secret prefix, e.g. `-passphrase=`
        prefix: String,
        secret: SecretString,
    },
}

impl CommandArg {
    pub fn plain(value: impl Into<String>) -> Self {
        Self::Plain(value.into())
    }

    pub fn sensitive(prefix: impl Into<String>, secret: SecretString) -> Self {
        Self::Sensitive {
            prefix: prefix.into(),
            secret,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, Self::Sensitive { .. })
    }

    /// Value handed to the operating system
    pub fn expose(&self) -> String {
        match self {
            Self::Plain(value) => value.clone(),
            Self::Sensitive { prefix, secret } => {
                format!("{}{}", prefix, secret.expose_secret())
            }
        }
    }

    /// Value safe to show in logs
    pub fn masked(&self) -> String {
        match self {
            Self::Plain(value) => value.clone(),
            Self::Sensitive { prefix, .. } => format!("{}{}", prefix, MASK),
        }
    }
}

impl fmt::Debug for CommandArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.masked())
    }
}

/// A program plus its ordered arguments
#[derive(Debug)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<CommandArg>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(CommandArg::plain(value));
        self
    }

    pub fn sensitive_arg(mut self, prefix: impl Into<String>, secret: SecretString) -> Self {
        self.args.push(CommandArg::sensitive(prefix, secret));
        self
    }

    /// Sensitivity flags parallel to `args`
    pub fn sensitivity(&self) -> Vec<bool> {
        self.args.iter().map(CommandArg::is_sensitive).collect()
    }

    /// Secret values that must be scrubbed from any output of this command
    pub fn secrets(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter_map(|arg| match arg {
                CommandArg::Sensitive { secret, .. } => Some(secret.expose_secret()),
                CommandArg::Plain(_) => None,
            })
            .filter(|secret| !secret.is_empty())
            .collect()
    }

    /// Masked command line, e.g. `aptly publish repo -passphrase=**** r1 r1`
    pub fn display_masked(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(CommandArg::masked))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Exited(i32),
    /// The run was cancelled and the subprocess killed
    Cancelled,
}

impl InvocationStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status {}", code),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

// ============================================================================
// Output sinks
// ============================================================================

/// Destination for one output stream of a command, fed line by line
pub trait OutputSink: Send {
    fn write_line(&mut self, line: &str);
}

/// Keeps every line in memory
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    pub lines: Vec<String>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.lines.join("\n")
    }
}

impl OutputSink for CaptureSink {
    fn write_line(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write_line(&mut self, _line: &str) {}
}

// ============================================================================
// Process invoker
// ============================================================================

/// Runs external commands on behalf of the pipeline
///
/// Implementations must redact every sensitive argument from the data they
/// write to the sinks and from any trace they log, and must kill the
/// subprocess and return [`InvocationStatus::Cancelled`] once `cancel` fires.
#[async_trait]
pub trait ProcessInvoker: Send + Sync {
    async fn run(
        &self,
        invocation: &Invocation,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<InvocationStatus, CommandError>;
}

// ============================================================================
// Credentials
// ============================================================================

/// GPG signing identity and its passphrase
pub struct SigningCredential {
    pub identity: SecretString,
    pub secret: SecretString,
}

impl SigningCredential {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: SecretString::new(identity.into().into()),
            secret: SecretString::new(secret.into().into()),
        }
    }
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("identity", &MASK)
            .field("secret", &MASK)
            .finish()
    }
}

/// Per-run information handed to collaborators
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub repository: String,
}

impl RunContext {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            repository: repository.into(),
        }
    }
}

/// Looks up a signing credential by its reference ID
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, credential_ref: &str, context: &RunContext)
    -> Option<SigningCredential>;
}
