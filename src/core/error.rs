//! Error handling for repository publishing
//!
//! Every fatal condition of a run maps to one `PublishError` variant carrying a
//! machine-readable [`AbortReason`], an error code, and recovery guidance.
//! Invoker-level failures (spawning, whitelisting) are `CommandError`s and
//! are folded into the step that issued the command.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Machine-distinguishable reason attached to an aborted run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortReason {
    ConfigurationError,
    RepoSetupFailed,
    AddFailed,
    CredentialNotFound,
    PublishFailed,
    Cancelled,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigurationError => "configuration-error",
            Self::RepoSetupFailed => "repo-setup-failed",
            Self::AddFailed => "add-failed",
            Self::CredentialNotFound => "credential-not-found",
            Self::PublishFailed => "publish-failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for publishing operations
#[derive(Error, Debug)]
pub enum PublishError {
    // Configuration errors
    #[error("Unable to find repository with name {repository}: check your configuration")]
    RepositoryNotConfigured { repository: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Pipeline errors
    #[error("[{repository}] Unable to set up repository: {message}")]
    RepoSetupFailed { repository: String, message: String },

    #[error("[{repository}] Unable to add package {artifact}: {message}")]
    PackageAddFailed {
        repository: String,
        artifact: String,
        message: String,
    },

    #[error("[{repository}] Can't find credentials with ID {credential_ref}")]
    CredentialNotFound {
        repository: String,
        credential_ref: String,
    },

    #[error("[{repository}] Can't publish repository: {message}")]
    PublishFailed { repository: String, message: String },

    #[error("[{repository}] Run cancelled during {step}")]
    Cancelled { repository: String, step: String },
}

impl PublishError {
    /// Repository the error refers to, if the failure happened inside a run
    pub fn repository(&self) -> Option<&str> {
        match self {
            Self::InvalidConfiguration { .. } => None,
            Self::RepositoryNotConfigured { repository }
            | Self::RepoSetupFailed { repository, .. }
            | Self::PackageAddFailed { repository, .. }
            | Self::CredentialNotFound { repository, .. }
            | Self::PublishFailed { repository, .. }
            | Self::Cancelled { repository, .. } => Some(repository),
        }
    }

    /// Reason recorded in the `Aborted` state
    pub fn reason(&self) -> AbortReason {
        match self {
            Self::RepositoryNotConfigured { .. } | Self::InvalidConfiguration { .. } => {
                AbortReason::ConfigurationError
            }
            Self::RepoSetupFailed { .. } => AbortReason::RepoSetupFailed,
            Self::PackageAddFailed { .. } => AbortReason::AddFailed,
            Self::CredentialNotFound { .. } => AbortReason::CredentialNotFound,
            Self::PublishFailed { .. } => AbortReason::PublishFailed,
            Self::Cancelled { .. } => AbortReason::Cancelled,
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::RepositoryNotConfigured { .. } | Self::InvalidConfiguration { .. } => {
                "CONFIGURATION_ERROR"
            }
            Self::RepoSetupFailed { .. } => "REPO_SETUP_FAILED",
            Self::PackageAddFailed { .. } => "PACKAGE_ADD_FAILED",
            Self::CredentialNotFound { .. } => "CREDENTIAL_NOT_FOUND",
            Self::PublishFailed { .. } => "PUBLISH_FAILED",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::RepositoryNotConfigured { .. } => vec![
                "Check the repository name passed with --repository",
                "Run `aptly-publisher repos` to list configured repositories",
            ],
            Self::InvalidConfiguration { .. } => vec![
                "Run `aptly-publisher check` to see every configuration error",
            ],
            Self::RepoSetupFailed { .. } => vec![
                "Check that aptly is installed and its rootDir is writable",
                "Run `aptly repo list` manually to inspect the error",
            ],
            Self::PackageAddFailed { .. } => vec![
                "See the aptly output above for the rejected package",
                "Packages added before the failure stay in the repository; re-run after fixing the cause",
            ],
            Self::CredentialNotFound { .. } => vec![
                "Check the credentialRef of the repository",
                "Export the identity and secret environment variables for that credential",
            ],
            Self::PublishFailed { .. } => vec![
                "Check that the GPG key is present in the keyring used by aptly",
                "Check the passphrase of the signing credential",
            ],
            Self::Cancelled { .. } => vec!["Re-run the publish once the build is resumed"],
        }
    }
}

/// Errors that can occur while invoking an external command
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command is not the configured aptly binary
    #[error("Command '{0}' is not in the allowed whitelist")]
    CommandNotAllowed(String),

    /// Working directory does not exist or is not accessible
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    /// Binary not found, permission denied, or broken output pipe
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),
}
