//! Configuration structures and types for aptly-publisher
//!
//! This module provides type-safe configuration management with serde support.
//! Keys are camelCase in both YAML and TOML files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::PublishError;

/// Default aptly executable
pub const DEFAULT_APTLY_BINARY: &str = "aptly";

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    /// Schema version (required)
    pub version: String,

    /// How to run aptly
    #[serde(default)]
    pub aptly: AptlyConfig,

    /// Target repositories, unique by name
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,

    /// Credential reference → environment variable mapping (optional)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub credentials: HashMap<String, CredentialSource>,

    /// Security settings (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,
}

/// aptly invocation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AptlyConfig {
    /// Executable name or full path (default: "aptly")
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Directory aptly runs in (default: current directory)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "workingDirectory"
    )]
    pub working_directory: Option<String>,
}

fn default_binary() -> String {
    DEFAULT_APTLY_BINARY.to_string()
}

impl Default for AptlyConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            working_directory: None,
        }
    }
}

/// A target aptly repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub name: String,

    #[serde(default)]
    pub comment: String,

    #[serde(rename = "defaultDistribution")]
    pub default_distribution: String,

    /// Reference ID of the GPG signing credential
    #[serde(rename = "credentialRef")]
    pub credential_ref: String,
}

impl RepositoryConfig {
    pub fn new(
        name: impl Into<String>,
        comment: impl Into<String>,
        default_distribution: impl Into<String>,
        credential_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            comment: comment.into(),
            default_distribution: default_distribution.into(),
            credential_ref: credential_ref.into(),
        }
    }
}

/// Environment variables holding a credential's identity and secret
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialSource {
    #[serde(rename = "identityEnv")]
    pub identity_env: String,

    #[serde(rename = "secretEnv")]
    pub secret_env: String,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// Environment variable expansion settings
    #[serde(skip_serializing_if = "Option::is_none", rename = "envVarExpansion")]
    pub env_var_expansion: Option<EnvVarExpansionConfig>,
}

/// Environment variable expansion configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvVarExpansionConfig {
    /// Enable environment variable expansion (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Allowed environment variable prefixes (default: all)
    #[serde(skip_serializing_if = "Option::is_none", rename = "allowedPrefixes")]
    pub allowed_prefixes: Option<Vec<String>>,
}

/// Per-run switches supplied by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Accepted for compatibility; artifact selection does not depend on it
    #[serde(rename = "uploadAllFiles")]
    pub upload_all_files: bool,

    /// Skip artifacts whose filename contains `-dbg`
    #[serde(rename = "ignoreDebugPackages")]
    pub ignore_debug_packages: bool,

    /// Remove the previous version of every package before adding
    #[serde(rename = "removeOldPackages")]
    pub remove_old_packages: bool,

    /// Also add `.dsc` source packages
    #[serde(rename = "includeSourcePackages")]
    pub include_source_packages: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            aptly: AptlyConfig::default(),
            repositories: Vec::new(),
            credentials: HashMap::new(),
            security: Some(SecurityConfig::default()),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            env_var_expansion: Some(EnvVarExpansionConfig {
                enabled: Some(true),
                allowed_prefixes: None,
            }),
        }
    }
}

impl PublisherConfig {
    /// Find the repository record a run targets
    pub fn find_repository(&self, name: &str) -> Result<&RepositoryConfig, PublishError> {
        self.repositories
            .iter()
            .find(|repository| repository.name == name)
            .ok_or_else(|| PublishError::RepositoryNotConfigured {
                repository: name.to_string(),
            })
    }

    pub fn repository_names(&self) -> Vec<&str> {
        self.repositories
            .iter()
            .map(|repository| repository.name.as_str())
            .collect()
    }
}
