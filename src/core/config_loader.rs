//! Configuration file loader for aptly-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::error::PublishError;
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".aptly-publisher.yaml";

/// Environment variable overriding `aptly.binary`
pub const ENV_BINARY: &str = "APTLY_PUBLISHER_BINARY";

/// Environment variable supplying the default target repository
pub const ENV_REPOSITORY: &str = "APTLY_PUBLISHER_REPOSITORY";

/// Environment variable pattern (${VAR_NAME})
const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

/// Configuration load options
#[derive(Debug, Clone)]
pub struct ConfigLoadOptions {
    /// Project path to load config from
    pub project_path: PathBuf,

    /// Explicit config file; replaces the project file lookup and must exist
    pub config_file: Option<PathBuf>,

    /// Also read `$HOME/.aptly-publisher.yaml`
    pub include_global: bool,

    /// Environment variables
    pub env: HashMap<String, String>,
}

impl ConfigLoadOptions {
    pub fn new<P: AsRef<Path>>(project_path: P) -> Self {
        Self {
            project_path: project_path.as_ref().to_path_buf(),
            config_file: None,
            include_global: true,
            env: std::env::vars().collect(),
        }
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    /// Is configuration valid?
    pub valid: bool,

    /// Validation errors
    pub errors: Vec<ConfigValidationError>,

    /// Validation warnings
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "repositories[0].name")
    pub field: String,

    /// Error message
    pub message: String,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    /// Field path
    pub field: String,

    /// Warning message
    pub message: String,

    /// Suggestion
    pub suggestion: Option<String>,
}

/// One configuration source and the optional settings it actually wrote
#[derive(Debug, Clone, Default)]
struct ConfigLayer {
    config: PublisherConfig,

    /// `aptly.binary` when this source sets it, even to the default value
    binary: Option<String>,
}

/// Optional view of a config file, read next to the full config
#[derive(Debug, Default, Deserialize)]
struct LayerOverrides {
    #[serde(default)]
    aptly: AptlyOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct AptlyOverrides {
    binary: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. Environment variables
    /// 2. Project config (./.aptly-publisher.yaml) or the explicit config file
    /// 3. Global config (~/.aptly-publisher.yaml)
    /// 4. Default values
    ///
    /// The merged result is expanded and validated; an invalid configuration
    /// is rejected here so a run never starts from one.
    pub async fn load(options: ConfigLoadOptions) -> Result<PublisherConfig, PublishError> {
        let config = Self::load_unvalidated(options).await?;

        let validation = Self::validate(&config);
        for warning in &validation.warnings {
            warn!(
                op = "config.validate.warning",
                field = %warning.field,
                "{}",
                warning.message
            );
        }
        if !validation.valid {
            let message = validation
                .errors
                .iter()
                .map(|error| format!("[{}] {}", error.field, error.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PublishError::InvalidConfiguration { message });
        }

        Ok(config)
    }

    /// Load, merge and expand every source without the validation gate
    ///
    /// Only unreadable or unparsable sources fail here; callers that report
    /// on the configuration run [`ConfigLoader::validate`] themselves.
    pub async fn load_unvalidated(
        options: ConfigLoadOptions,
    ) -> Result<PublisherConfig, PublishError> {
        let mut layers: Vec<ConfigLayer> = Vec::new();

        // 4. Default values (lowest priority)
        layers.push(ConfigLayer::default());

        // 3. Global config
        if options.include_global
            && let Some(global_layer) = Self::load_global_config(&options.env).await?
        {
            layers.push(global_layer);
        }

        // 2. Project or explicit config
        match &options.config_file {
            Some(path) => match Self::load_config_file(path).await? {
                Some(layer) => layers.push(layer),
                None => {
                    return Err(PublishError::InvalidConfiguration {
                        message: format!("Config file not found: {}", path.display()),
                    });
                }
            },
            None => {
                let project_config_path = options.project_path.join(CONFIG_FILENAME);
                if let Some(project_layer) = Self::load_config_file(&project_config_path).await? {
                    layers.push(project_layer);
                }
            }
        }

        // 1. Environment variables
        if let Some(env_layer) = Self::load_env_config(&options.env) {
            layers.push(env_layer);
        }

        let merged_config = Self::merge_configs(layers);
        Self::expand_env_vars(merged_config, &options.env)
    }

    /// Repository named by the environment, if any
    pub fn default_repository(env: &HashMap<String, String>) -> Option<String> {
        env.get(ENV_REPOSITORY)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    /// Load global configuration from ~/.aptly-publisher.yaml
    async fn load_global_config(
        env: &HashMap<String, String>,
    ) -> Result<Option<ConfigLayer>, PublishError> {
        let Some(home_dir) = env.get("HOME") else {
            debug!(op = "config.global.skip", "HOME not set, skipping global config");
            return Ok(None);
        };
        let global_config_path = PathBuf::from(home_dir).join(CONFIG_FILENAME);

        Self::load_config_file(&global_config_path).await
    }

    /// Load configuration from a YAML or TOML file
    async fn load_config_file(file_path: &Path) -> Result<Option<ConfigLayer>, PublishError> {
        if !file_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(file_path).await.map_err(|e| {
            PublishError::InvalidConfiguration {
                message: format!("Failed to read config file {}: {}", file_path.display(), e),
            }
        })?;

        let is_toml = file_path
            .extension()
            .is_some_and(|extension| extension == "toml");

        let (config, overrides): (PublisherConfig, LayerOverrides) = if is_toml {
            let parse_error = |e: toml::de::Error| PublishError::InvalidConfiguration {
                message: format!("Failed to parse TOML config {}: {}", file_path.display(), e),
            };
            (
                toml::from_str(&content).map_err(parse_error)?,
                toml::from_str(&content).map_err(parse_error)?,
            )
        } else {
            let parse_error = |e: serde_yaml::Error| PublishError::InvalidConfiguration {
                message: format!("Failed to parse YAML config {}: {}", file_path.display(), e),
            };
            (
                serde_yaml::from_str(&content).map_err(parse_error)?,
                serde_yaml::from_str(&content).map_err(parse_error)?,
            )
        };

        debug!(
            op = "config.file.loaded",
            path = %file_path.display(),
            repositories = config.repositories.len(),
            "Loaded config file"
        );

        Ok(Some(ConfigLayer {
            config,
            binary: overrides.aptly.binary,
        }))
    }

    /// Load configuration from environment variables
    fn load_env_config(env: &HashMap<String, String>) -> Option<ConfigLayer> {
        let binary = env.get(ENV_BINARY).filter(|binary| !binary.is_empty())?;

        Some(ConfigLayer {
            config: PublisherConfig::default(),
            binary: Some(binary.clone()),
        })
    }

    /// Merge multiple configurations with priority
    fn merge_configs(layers: Vec<ConfigLayer>) -> PublisherConfig {
        let mut result = PublisherConfig::default();

        for layer in layers {
            Self::merge_into(&mut result, layer);
        }

        result
    }

    /// Merge one source layer into target
    fn merge_into(target: &mut PublisherConfig, layer: ConfigLayer) {
        let ConfigLayer {
            config: source,
            binary,
        } = layer;

        // Version
        if !source.version.is_empty() {
            target.version = source.version;
        }

        // aptly
        if let Some(binary) = binary {
            target.aptly.binary = binary;
        }
        if source.aptly.working_directory.is_some() {
            target.aptly.working_directory = source.aptly.working_directory;
        }

        // Repositories replace a lower layer's record of the same name; a
        // name repeated within this layer is kept twice for validation
        let inherited = target.repositories.len();
        let mut replaced = HashSet::new();
        for repository in source.repositories {
            let existing = target.repositories[..inherited]
                .iter()
                .position(|existing| existing.name == repository.name);
            match existing {
                Some(index) if replaced.insert(index) => target.repositories[index] = repository,
                _ => target.repositories.push(repository),
            }
        }

        // Credentials
        target.credentials.extend(source.credentials);

        // Security
        if source.security.is_some() {
            target.security = source.security;
        }
    }

    /// Expand environment variables in configuration
    ///
    /// Only `${VAR_NAME}` references in the aptly binary and in each
    /// repository's comment and distribution are expanded, subject to
    /// `allowedPrefixes` when configured.
    fn expand_env_vars(
        mut config: PublisherConfig,
        env: &HashMap<String, String>,
    ) -> Result<PublisherConfig, PublishError> {
        let expansion = config
            .security
            .as_ref()
            .and_then(|s| s.env_var_expansion.as_ref());

        let enabled = expansion.and_then(|e| e.enabled).unwrap_or(true);
        if !enabled {
            return Ok(config);
        }

        let allowed_prefixes = expansion.and_then(|e| e.allowed_prefixes.clone());

        config.aptly.binary = Self::expand_string(&config.aptly.binary, env, &allowed_prefixes)?;

        for repository in &mut config.repositories {
            repository.comment = Self::expand_string(&repository.comment, env, &allowed_prefixes)?;
            repository.default_distribution =
                Self::expand_string(&repository.default_distribution, env, &allowed_prefixes)?;
        }

        Ok(config)
    }

    /// Expand environment variables in a single string
    fn expand_string(
        input: &str,
        env: &HashMap<String, String>,
        allowed_prefixes: &Option<Vec<String>>,
    ) -> Result<String, PublishError> {
        let env_var_regex =
            Regex::new(ENV_VAR_PATTERN).map_err(|e| PublishError::InvalidConfiguration {
                message: format!("Invalid expansion pattern: {}", e),
            })?;

        let mut result = input.to_string();
        for cap in env_var_regex.captures_iter(input) {
            let var_name = &cap[1];

            if let Some(prefixes) = allowed_prefixes {
                let allowed = prefixes.iter().any(|prefix| var_name.starts_with(prefix));
                if !allowed {
                    warn!(
                        op = "config.expand.skipped",
                        variable = var_name,
                        "Environment variable not allowed by prefix whitelist, skipping"
                    );
                    continue;
                }
            }

            if let Some(value) = env.get(var_name) {
                result = result.replace(&format!("${{{}}}", var_name), value);
            } else {
                warn!(
                    op = "config.expand.missing",
                    variable = var_name,
                    "Environment variable not found"
                );
            }
        }

        Ok(result)
    }

    /// Validate configuration
    pub fn validate(config: &PublisherConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Check version (required)
        if config.version.is_empty() {
            errors.push(ConfigValidationError {
                field: "version".to_string(),
                message: "Version is required".to_string(),
            });
        } else if config.version != "1.0" {
            warnings.push(ConfigValidationWarning {
                field: "version".to_string(),
                message: format!("Unknown version: {}", config.version),
                suggestion: Some("Currently supported version is \"1.0\" only".to_string()),
            });
        }

        // 2. aptly settings
        if config.aptly.binary.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "aptly.binary".to_string(),
                message: "binary must not be empty".to_string(),
            });
        }

        // 3. Repositories
        Self::validate_repositories(config, &mut errors, &mut warnings);

        // 4. Credential mappings
        for (credential_ref, source) in &config.credentials {
            if source.identity_env.is_empty() || source.secret_env.is_empty() {
                errors.push(ConfigValidationError {
                    field: format!("credentials.{}", credential_ref),
                    message: "identityEnv and secretEnv are required".to_string(),
                });
            }
        }

        // 5. Credential references
        Self::validate_credential_refs(config, &mut warnings);

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Validate repository records
    fn validate_repositories(
        config: &PublisherConfig,
        errors: &mut Vec<ConfigValidationError>,
        warnings: &mut Vec<ConfigValidationWarning>,
    ) {
        let mut seen = HashSet::new();

        for (i, repository) in config.repositories.iter().enumerate() {
            let field = |name: &str| format!("repositories[{}].{}", i, name);

            if repository.name.is_empty() {
                errors.push(ConfigValidationError {
                    field: field("name"),
                    message: "name is required".to_string(),
                });
            } else if repository.name.chars().any(char::is_whitespace) {
                errors.push(ConfigValidationError {
                    field: field("name"),
                    message: format!("name must not contain whitespace: {:?}", repository.name),
                });
            } else if !seen.insert(repository.name.as_str()) {
                errors.push(ConfigValidationError {
                    field: field("name"),
                    message: format!("duplicate repository name: {}", repository.name),
                });
            }

            if repository.default_distribution.trim().is_empty() {
                errors.push(ConfigValidationError {
                    field: field("defaultDistribution"),
                    message: "defaultDistribution is required".to_string(),
                });
            }

            if repository.credential_ref.is_empty() {
                errors.push(ConfigValidationError {
                    field: field("credentialRef"),
                    message: "credentialRef is required".to_string(),
                });
            }

            if repository.comment.is_empty() {
                warnings.push(ConfigValidationWarning {
                    field: field("comment"),
                    message: "comment is empty".to_string(),
                    suggestion: Some(
                        "The comment is only used when the repository is created".to_string(),
                    ),
                });
            }
        }
    }

    /// Warn about references without a mapping and mappings nothing uses
    fn validate_credential_refs(
        config: &PublisherConfig,
        warnings: &mut Vec<ConfigValidationWarning>,
    ) {
        let mut referenced = HashSet::new();

        for (i, repository) in config.repositories.iter().enumerate() {
            if repository.credential_ref.is_empty() {
                continue;
            }
            referenced.insert(repository.credential_ref.as_str());

            if !config.credentials.contains_key(&repository.credential_ref) {
                warnings.push(ConfigValidationWarning {
                    field: format!("repositories[{}].credentialRef", i),
                    message: format!(
                        "unknown credentialRef mapping: {}",
                        repository.credential_ref
                    ),
                    suggestion: Some(format!(
                        "Add credentials.{} or export the APTLY_CREDENTIAL_*_IDENTITY and _SECRET variables",
                        repository.credential_ref
                    )),
                });
            }
        }

        let mut unused: Vec<&String> = config
            .credentials
            .keys()
            .filter(|credential_ref| !referenced.contains(credential_ref.as_str()))
            .collect();
        unused.sort();
        for credential_ref in unused {
            warnings.push(ConfigValidationWarning {
                field: format!("credentials.{}", credential_ref),
                message: "credential mapping is not referenced by any repository".to_string(),
                suggestion: None,
            });
        }
    }

    /// Format validation result as human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("✅ Configuration validation succeeded".to_string());
        } else {
            lines.push("❌ Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\n🔴 Errors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\n🟡 Warnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
                if let Some(suggestion) = &warning.suggestion {
                    lines.push(format!("    Suggestion: {}", suggestion));
                }
            }
        }

        lines.join("\n")
    }
}
