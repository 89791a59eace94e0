//! Package identity inference from artifact filenames
//!
//! Debian archives are named `<name>_<version>_<arch>.deb`. aptly addresses a
//! package independently of its version as `name` or `name{arch}`, which is
//! what removal needs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::config::PipelineOptions;

/// Binary package extension
pub const DEB_EXTENSION: &str = ".deb";

/// Source control file extension
pub const DSC_EXTENSION: &str = ".dsc";

/// Secondary archive extension, only considered when pruning
pub const TAR_XZ_EXTENSION: &str = ".tar.xz";

/// Marker of debug symbol packages
pub const DEBUG_MARKER: &str = "-dbg";

/// Name and optional architecture of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

impl PackageIdentity {
    /// Identity string understood by `aptly repo remove`
    pub fn removal_identity(&self) -> String {
        match &self.architecture {
            Some(architecture) => format!("{}{{{}}}", self.name, architecture),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.removal_identity())
    }
}

/// Derive the package identity of an artifact
///
/// Returns `None` when the filename has no underscore. The architecture is
/// only derived for `.deb` files; an empty architecture counts as absent.
///
/// ```
/// use aptly_publisher::artifact::classify;
///
/// let identity = classify("foo_1.0_amd64.deb").unwrap();
/// assert_eq!(identity.name, "foo");
/// assert_eq!(identity.architecture.as_deref(), Some("amd64"));
/// ```
pub fn classify(filename: &str) -> Option<PackageIdentity> {
    let (name, _) = filename.split_once('_')?;

    let architecture = filename
        .strip_suffix(DEB_EXTENSION)
        .and_then(|stem| stem.rsplit_once('_'))
        .map(|(_, architecture)| architecture)
        .filter(|architecture| !architecture.is_empty())
        .map(str::to_string);

    Some(PackageIdentity {
        name: name.to_string(),
        architecture,
    })
}

/// Extensions accepted by the add step
pub fn accepted_extensions(options: &PipelineOptions) -> Vec<&'static str> {
    let mut extensions = vec![DEB_EXTENSION];
    if options.include_source_packages {
        extensions.push(DSC_EXTENSION);
    }
    extensions
}

/// Whether an artifact is added to the repository
pub fn is_eligible(filename: &str, options: &PipelineOptions) -> bool {
    let accepted = accepted_extensions(options)
        .iter()
        .any(|extension| filename.ends_with(extension));

    accepted && !(options.ignore_debug_packages && filename.contains(DEBUG_MARKER))
}

/// Whether an artifact's previous version is removed by the prune step
pub fn is_prunable(filename: &str) -> bool {
    filename.ends_with(DEB_EXTENSION) || filename.ends_with(TAR_XZ_EXTENSION)
}
