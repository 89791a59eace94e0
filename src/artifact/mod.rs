//! Artifact handling: identity inference and storage lookup

pub mod classifier;
pub mod store;

pub use classifier::{
    DEB_EXTENSION, DEBUG_MARKER, DSC_EXTENSION, PackageIdentity, TAR_XZ_EXTENSION,
    accepted_extensions, classify, is_eligible, is_prunable,
};
pub use store::{Artifact, ArtifactError, ArtifactStore, FsArtifactStore};
