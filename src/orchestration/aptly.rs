//! Command lines understood by the aptly binary
//!
//! Argument order and flag spelling are part of aptly's CLI contract.


use crate::core::config::DEFAULT_APTLY_BINARY;
use crate::core::traits::{Invocation, SigningCredential};

/// Builds aptly invocations for one binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptlyCommands {
    binary: String,
}

impl Default for AptlyCommands {
    fn default() -> Self {
        Self::new(DEFAULT_APTLY_BINARY)
    }
}

impl AptlyCommands {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.binary)
    }

    /// `repo list -raw`: one repository name per line
    pub fn repo_list(&self) -> Invocation {
        self.command().arg("repo").arg("list").arg("-raw")
    }

    pub fn repo_create(&self, name: &str, comment: &str, distribution: &str) -> Invocation {
        self.command()
            .arg("repo")
            .arg("create")
            .arg(format!("-comment={}", comment))
            .arg(format!("-distribution={}", distribution))
            .arg(name)
    }

    /// `identity` is `name` or `name{arch}`
    pub fn repo_remove(&self, name: &str, identity: &str) -> Invocation {
        self.command()
            .arg("repo")
            .arg("remove")
            .arg(name)
            .arg(identity)
    }

    pub fn repo_add(&self, name: &str, path: &str) -> Invocation {
        self.command()
            .arg("repo")
            .arg("add")
            .arg(name)
            .arg(path)
    }

    pub fn publish_drop(&self, distribution: &str, name: &str) -> Invocation {
        self.command()
            .arg("publish")
            .arg("drop")
            .arg(distribution)
            .arg(name)
    }

    /// Signed, non-interactive publish of a local repository under its own name
    ///
    /// The credential moves into the invocation and is dropped with it.
    pub fn publish_repo(&self, name: &str, credential: SigningCredential) -> Invocation {
        self.command()
            .arg("publish")
            .arg("repo")
            .arg("-batch")
            .sensitive_arg("-gpg-key=", credential.identity)
            .sensitive_arg("-passphrase=", credential.secret)
            .arg(name)
            .arg(name)
    }
}
