//! Signing credential lookup from environment variables
//!
//! Credentials never touch the configuration file: a `credentialRef` names a
//! pair of environment variables, either through the `credentials` section or
//! through the `APTLY_CREDENTIAL_<REF>_IDENTITY` / `_SECRET` convention.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::config::CredentialSource;
use crate::core::traits::{CredentialResolver, RunContext, SigningCredential};

/// Prefix of the conventional credential variables
const CREDENTIAL_ENV_PREFIX: &str = "APTLY_CREDENTIAL_";

/// Resolves credentials from an environment snapshot
#[derive(Default)]
pub struct EnvCredentialResolver {
    env: HashMap<String, String>,
    sources: HashMap<String, CredentialSource>,
}

impl EnvCredentialResolver {
    pub fn with_env(
        env: HashMap<String, String>,
        sources: HashMap<String, CredentialSource>,
    ) -> Self {
        Self { env, sources }
    }

    /// Snapshot the process environment
    pub fn from_env(sources: HashMap<String, CredentialSource>) -> Self {
        Self::with_env(std::env::vars().collect(), sources)
    }

    /// Conventional variable names for a reference without a mapping
    ///
    /// ```
    /// use aptly_publisher::security::EnvCredentialResolver;
    ///
    /// let source = EnvCredentialResolver::fallback_source("release-key");
    /// assert_eq!(source.identity_env, "APTLY_CREDENTIAL_RELEASE_KEY_IDENTITY");
    /// assert_eq!(source.secret_env, "APTLY_CREDENTIAL_RELEASE_KEY_SECRET");
    /// ```
    pub fn fallback_source(credential_ref: &str) -> CredentialSource {
        let normalized: String = credential_ref
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();

        CredentialSource {
            identity_env: format!("{}{}_IDENTITY", CREDENTIAL_ENV_PREFIX, normalized),
            secret_env: format!("{}{}_SECRET", CREDENTIAL_ENV_PREFIX, normalized),
        }
    }

    /// Variables consulted for a reference
    pub fn source_for(&self, credential_ref: &str) -> CredentialSource {
        self.sources
            .get(credential_ref)
            .cloned()
            .unwrap_or_else(|| Self::fallback_source(credential_ref))
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.env
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(
        &self,
        credential_ref: &str,
        context: &RunContext,
    ) -> Option<SigningCredential> {
        let source = self.source_for(credential_ref);

        match (
            self.lookup(&source.identity_env),
            self.lookup(&source.secret_env),
        ) {
            (Some(identity), Some(secret)) => {
                tracing::debug!(
                    op = "credential.resolved",
                    run_id = %context.run_id,
                    credential_ref,
                    identity_env = %source.identity_env,
                    secret_env = %source.secret_env,
                );
                Some(SigningCredential::new(identity, secret))
            }
            _ => {
                tracing::warn!(
                    op = "credential.missing",
                    run_id = %context.run_id,
                    credential_ref,
                    identity_env = %source.identity_env,
                    secret_env = %source.secret_env,
                );
                None
            }
        }
    }
}
