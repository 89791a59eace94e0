//! Build artifacts and the storage they are resolved from

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors raised while collecting or resolving artifacts
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Artifact directory does not exist: {0}")]
    InvalidRoot(PathBuf),

    #[error("Artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read artifacts: {0}")]
    Io(String),
}

/// One file produced by the build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Bare file name, e.g. `foo_1.0_amd64.deb`
    pub filename: String,

    /// Location relative to the artifact store root
    #[serde(rename = "relativePath")]
    pub relative_path: PathBuf,
}

impl Artifact {
    pub fn new<P: AsRef<Path>>(relative_path: P) -> Self {
        let relative_path = relative_path.as_ref().to_path_buf();
        let filename = relative_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            filename,
            relative_path,
        }
    }
}

/// Resolves artifacts to absolute filesystem paths
pub trait ArtifactStore: Send + Sync {
    fn resolve(&self, artifact: &Artifact) -> Result<PathBuf, ArtifactError>;
}

/// Artifacts stored below a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at an existing directory
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, ArtifactError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ArtifactError::InvalidRoot(root.to_path_buf()));
        }

        let root = std::path::absolute(root).map_err(|e| ArtifactError::Io(e.to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every regular file below the root, sorted by relative path
    pub fn collect(&self) -> Result<Vec<Artifact>, ArtifactError> {
        let mut artifacts = Vec::new();

        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|e| ArtifactError::Io(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative_path = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| ArtifactError::Io(e.to_string()))?;
            artifacts.push(Artifact::new(relative_path));
        }

        artifacts.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(artifacts)
    }

    /// Artifacts for explicitly named files, in the given order
    ///
    /// Paths below the root are stored relative to it; others are kept as
    /// given.
    pub fn from_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<Artifact> {
        paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                let relative = std::path::absolute(path)
                    .ok()
                    .and_then(|absolute| {
                        absolute
                            .strip_prefix(&self.root)
                            .ok()
                            .map(Path::to_path_buf)
                    })
                    .unwrap_or_else(|| path.to_path_buf());
                Artifact::new(relative)
            })
            .collect()
    }
}

impl ArtifactStore for FsArtifactStore {
    fn resolve(&self, artifact: &Artifact) -> Result<PathBuf, ArtifactError> {
        let path = self.root.join(&artifact.relative_path);
        if !path.is_file() {
            return Err(ArtifactError::NotFound(path));
        }

        std::path::absolute(&path).map_err(|e| ArtifactError::Io(e.to_string()))
    }
}
