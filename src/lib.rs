//! Publish Debian build artifacts into an aptly-managed repository.
//!
//! A run drives the `aptly` binary through a fixed lifecycle: ensure the
//! repository exists, prune stale package versions, add the new packages,
//! drop the current publish snapshot, and publish again with a GPG signature.
//!
//! Runs against the same repository must be serialized by the caller. No
//! locking is performed around aptly's on-disk state.

pub mod artifact;
pub mod core;
pub mod orchestration;
pub mod security;

pub use artifact::{
    Artifact, ArtifactError, ArtifactStore, FsArtifactStore, PackageIdentity, classify,
    is_eligible, is_prunable,
};
pub use crate::core::*;
pub use orchestration::{AptlyCommands, DryRunInvoker, PublishOrchestrator, PublishReport};
pub use security::{EnvCredentialResolver, Redactor, SafeCommandExecutor, TracingSink};
