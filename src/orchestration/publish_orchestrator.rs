//! Publish Orchestrator - drives one publish run against one repository
//!
//! Steps, in order:
//! 1. ensure the repository exists (list, create when missing)
//! 2. prune the previous version of each package (best effort)
//! 3. add the eligible artifacts (first failure aborts)
//! 4. drop the current publish (status ignored)
//! 5. publish with the signing credential
//!
//! Any fatal failure moves the run to `Aborted(reason)`. There is no retry.

use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use super::aptly::AptlyCommands;
use super::report::PublishReport;
use crate::artifact::{Artifact, ArtifactStore, classify, is_eligible, is_prunable};
use crate::core::cancel::CancelToken;
use crate::core::config::{PipelineOptions, PublisherConfig, RepositoryConfig};
use crate::core::error::PublishError;
use crate::core::state_machine::{PublishState, PublishStateMachine};
use crate::core::traits::{
    CaptureSink, CredentialResolver, Invocation, InvocationStatus, OutputSink, ProcessInvoker,
    RunContext,
};
use crate::security::TracingSink;

const STEP_ENSURE: &str = "ensure-repository";
const STEP_PRUNE: &str = "prune";
const STEP_ADD: &str = "add-packages";
const STEP_DROP: &str = "drop-publish";
const STEP_PUBLISH: &str = "publish";

/// Main publish orchestrator
pub struct PublishOrchestrator {
    repository: RepositoryConfig,
    options: PipelineOptions,
    commands: AptlyCommands,
    invoker: Arc<dyn ProcessInvoker>,
    credentials: Arc<dyn CredentialResolver>,
    store: Arc<dyn ArtifactStore>,
    context: RunContext,
    state_machine: PublishStateMachine,
    added: Vec<String>,
    removed: Vec<String>,
    warnings: Vec<String>,
    error: Option<(String, String)>,
    duration_ms: i64,
}

impl PublishOrchestrator {
    pub fn new(
        repository: RepositoryConfig,
        commands: AptlyCommands,
        invoker: Arc<dyn ProcessInvoker>,
        credentials: Arc<dyn CredentialResolver>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let context = RunContext::new(&repository.name);

        Self {
            repository,
            options: PipelineOptions::default(),
            commands,
            invoker,
            credentials,
            store,
            context,
            state_machine: PublishStateMachine::new(),
            added: Vec::new(),
            removed: Vec::new(),
            warnings: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// Orchestrator for a configured repository
    ///
    /// Fails with `RepositoryNotConfigured` before anything runs when the
    /// name matches no record.
    pub fn for_repository(
        config: &PublisherConfig,
        repository_name: &str,
        invoker: Arc<dyn ProcessInvoker>,
        credentials: Arc<dyn CredentialResolver>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self, PublishError> {
        let repository = config.find_repository(repository_name)?.clone();
        let commands = AptlyCommands::new(&config.aptly.binary);

        Ok(Self::new(repository, commands, invoker, credentials, store))
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn state(&self) -> PublishState {
        self.state_machine.get_state()
    }

    /// Run the whole pipeline once
    pub async fn run(
        &mut self,
        artifacts: &[Artifact],
        cancel: &CancelToken,
    ) -> Result<PublishReport, PublishError> {
        if self.state() != PublishState::Start {
            return Err(PublishError::InvalidConfiguration {
                message: format!(
                    "publish run {} for '{}' has already finished",
                    self.context.run_id, self.repository.name
                ),
            });
        }

        let span = tracing::info_span!(
            "publish",
            run_id = %self.context.run_id,
            repository = %self.repository.name,
        );

        let started = Instant::now();
        let result = self.run_steps(artifacts, cancel).instrument(span.clone()).await;
        self.duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let _entered = span.enter();
        match result {
            Ok(()) => {
                tracing::info!(
                    op = "publish.completed",
                    added = self.added.len(),
                    removed = self.removed.len(),
                    duration_ms = self.duration_ms,
                );
                Ok(self.report())
            }
            Err(error) => {
                self.abort(&error);
                Err(error)
            }
        }
    }

    /// Summary of the run so far
    pub fn report(&self) -> PublishReport {
        let state = self.state();
        let published_at = match state {
            PublishState::Published => self.state_machine.transitions().last().map(|t| t.timestamp),
            _ => None,
        };

        PublishReport {
            run_id: self.context.run_id,
            repository: self.repository.name.clone(),
            distribution: self.repository.default_distribution.clone(),
            state,
            success: state == PublishState::Published,
            options: self.options,
            added: self.added.clone(),
            removed: self.removed.clone(),
            warnings: self.warnings.clone(),
            error_code: self.error.as_ref().map(|(code, _)| code.clone()),
            error: self.error.as_ref().map(|(_, message)| message.clone()),
            transitions: self.state_machine.transitions().to_vec(),
            duration_ms: self.duration_ms,
            published_at,
        }
    }

    async fn run_steps(
        &mut self,
        artifacts: &[Artifact],
        cancel: &CancelToken,
    ) -> Result<(), PublishError> {
        self.ensure_repository(cancel).await?;
        self.advance(PublishState::RepoEnsured)?;

        self.prune_stale(artifacts, cancel).await?;
        self.advance(PublishState::Pruned)?;

        self.add_packages(artifacts, cancel).await?;
        self.advance(PublishState::Packaged)?;

        self.drop_publish(cancel).await?;
        self.advance(PublishState::Dropped)?;

        self.publish(cancel).await?;
        self.advance(PublishState::Published)
    }

    fn advance(&mut self, to: PublishState) -> Result<(), PublishError> {
        self.state_machine
            .transition(to)
            .map_err(|e| PublishError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        tracing::debug!(op = "publish.state", state = %to);
        Ok(())
    }

    fn abort(&mut self, error: &PublishError) {
        let reason = error.reason();
        if let Err(e) = self.state_machine.transition(PublishState::Aborted(reason)) {
            tracing::warn!(op = "publish.state.rejected", error = %e);
        }

        self.error = Some((error.code().to_string(), error.to_string()));
        tracing::error!(
            op = "publish.aborted",
            reason = %reason,
            code = error.code(),
            error = %error,
        );
    }

    fn cancelled(&self, step: &str) -> PublishError {
        PublishError::Cancelled {
            repository: self.repository.name.clone(),
            step: step.to_string(),
        }
    }

    fn check_cancelled(&self, cancel: &CancelToken, step: &str) -> Result<(), PublishError> {
        if cancel.is_cancelled() {
            return Err(self.cancelled(step));
        }
        Ok(())
    }

    /// Run one command, forwarding stderr to the log
    async fn execute(
        &self,
        invocation: &Invocation,
        stdout: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<InvocationStatus, crate::core::error::CommandError> {
        let mut stderr = TracingSink::stderr();
        self.invoker.run(invocation, stdout, &mut stderr, cancel).await
    }

    async fn ensure_repository(&mut self, cancel: &CancelToken) -> Result<(), PublishError> {
        self.check_cancelled(cancel, STEP_ENSURE)?;

        let name = self.repository.name.clone();
        let setup_failed = |message: String| PublishError::RepoSetupFailed {
            repository: name.clone(),
            message,
        };

        let mut listing = CaptureSink::new();
        match self.execute(&self.commands.repo_list(), &mut listing, cancel).await {
            Ok(InvocationStatus::Cancelled) => return Err(self.cancelled(STEP_ENSURE)),
            Ok(status) if !status.success() => {
                return Err(setup_failed(format!("repository listing returned {}", status)));
            }
            Ok(_) => {}
            Err(e) => return Err(setup_failed(e.to_string())),
        }

        if listing.lines.iter().any(|line| line.trim() == name) {
            tracing::info!(op = "publish.repo.exists");
            return Ok(());
        }

        let create = self.commands.repo_create(
            &name,
            &self.repository.comment,
            &self.repository.default_distribution,
        );
        match self.execute(&create, &mut TracingSink::stdout(), cancel).await {
            Ok(InvocationStatus::Cancelled) => Err(self.cancelled(STEP_ENSURE)),
            Ok(status) if !status.success() => Err(setup_failed(format!(
                "repository creation returned {}",
                status
            ))),
            Ok(_) => {
                tracing::info!(
                    op = "publish.repo.created",
                    distribution = %self.repository.default_distribution,
                );
                Ok(())
            }
            Err(e) => Err(setup_failed(e.to_string())),
        }
    }

    async fn prune_stale(
        &mut self,
        artifacts: &[Artifact],
        cancel: &CancelToken,
    ) -> Result<(), PublishError> {
        if !self.options.remove_old_packages {
            return Ok(());
        }

        for artifact in artifacts {
            self.check_cancelled(cancel, STEP_PRUNE)?;

            if !is_prunable(&artifact.filename) {
                continue;
            }
            let Some(identity) = classify(&artifact.filename) else {
                continue;
            };

            let identity = identity.removal_identity();
            let remove = self.commands.repo_remove(&self.repository.name, &identity);

            match self.execute(&remove, &mut TracingSink::stdout(), cancel).await {
                Ok(InvocationStatus::Cancelled) => return Err(self.cancelled(STEP_PRUNE)),
                Ok(status) if status.success() => {
                    tracing::info!(op = "publish.prune.removed", identity = %identity);
                    self.removed.push(identity);
                }
                Ok(status) => {
                    tracing::warn!(op = "publish.prune.failed", identity = %identity, status = %status);
                    self.warnings
                        .push(format!("Removing {} returned {}", identity, status));
                }
                Err(e) => {
                    tracing::warn!(op = "publish.prune.failed", identity = %identity, error = %e);
                    self.warnings.push(format!("Removing {} failed: {}", identity, e));
                }
            }
        }

        Ok(())
    }

    async fn add_packages(
        &mut self,
        artifacts: &[Artifact],
        cancel: &CancelToken,
    ) -> Result<(), PublishError> {
        for artifact in artifacts {
            self.check_cancelled(cancel, STEP_ADD)?;

            if !is_eligible(&artifact.filename, &self.options) {
                tracing::debug!(op = "publish.add.skipped", artifact = %artifact.filename);
                continue;
            }

            let add_failed = |message: String| PublishError::PackageAddFailed {
                repository: self.repository.name.clone(),
                artifact: artifact.filename.clone(),
                message,
            };

            let resolved = self
                .store
                .resolve(artifact)
                .map_err(|e| add_failed(e.to_string()))?;
            // aptly only receives the path as text
            let Some(path) = resolved.to_str() else {
                return Err(add_failed(format!(
                    "artifact path is not valid UTF-8: {}",
                    resolved.display()
                )));
            };
            let add = self.commands.repo_add(&self.repository.name, path);

            match self.execute(&add, &mut TracingSink::stdout(), cancel).await {
                Ok(InvocationStatus::Cancelled) => return Err(self.cancelled(STEP_ADD)),
                Ok(status) if !status.success() => {
                    return Err(add_failed(format!("repo add returned {}", status)));
                }
                Ok(_) => {}
                Err(e) => return Err(add_failed(e.to_string())),
            }

            tracing::info!(op = "publish.add.added", artifact = %artifact.filename);
            self.added.push(artifact.filename.clone());
        }

        Ok(())
    }

    async fn drop_publish(&mut self, cancel: &CancelToken) -> Result<(), PublishError> {
        self.check_cancelled(cancel, STEP_DROP)?;

        let retract = self
            .commands
            .publish_drop(&self.repository.default_distribution, &self.repository.name);

        // A missing publish is the normal first-run case
        match self.execute(&retract, &mut TracingSink::stdout(), cancel).await {
            Ok(InvocationStatus::Cancelled) => Err(self.cancelled(STEP_DROP)),
            Ok(status) => {
                tracing::debug!(op = "publish.drop", status = %status);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(op = "publish.drop.failed", error = %e);
                Ok(())
            }
        }
    }

    async fn publish(&mut self, cancel: &CancelToken) -> Result<(), PublishError> {
        self.check_cancelled(cancel, STEP_PUBLISH)?;

        let credential_ref = self.repository.credential_ref.clone();
        let credential = tokio::select! {
            _ = cancel.cancelled() => return Err(self.cancelled(STEP_PUBLISH)),
            credential = self.credentials.resolve(&credential_ref, &self.context) => credential,
        };

        let Some(credential) = credential else {
            return Err(PublishError::CredentialNotFound {
                repository: self.repository.name.clone(),
                credential_ref,
            });
        };

        let publish_failed = |message: String| PublishError::PublishFailed {
            repository: self.repository.name.clone(),
            message,
        };

        let publish = self.commands.publish_repo(&self.repository.name, credential);
        let status = self
            .execute(&publish, &mut TracingSink::stdout(), cancel)
            .await;
        drop(publish);

        match status {
            Ok(InvocationStatus::Cancelled) => Err(self.cancelled(STEP_PUBLISH)),
            Ok(status) if !status.success() => {
                Err(publish_failed(format!("publish returned {}", status)))
            }
            Ok(_) => {
                tracing::info!(
                    op = "publish.published",
                    distribution = %self.repository.default_distribution,
                );
                Ok(())
            }
            Err(e) => Err(publish_failed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactError;
    use crate::core::error::{AbortReason, CommandError};
    use crate::core::traits::{CommandArg, SigningCredential};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    const ROOT: &str = "/srv/artifacts";

    /// One recorded invocation, without the program name
    #[derive(Debug, Clone)]
    struct Call {
        masked: String,
        exposed: Vec<String>,
    }

    /// Fake invoker: answers by command-line prefix and records every call
    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<Call>>,
        listing: Vec<String>,
        exits: Vec<(String, i32)>,
        cancel_on: Option<(String, CancelToken)>,
    }

    impl RecordingInvoker {
        fn with_listing(lines: &[&str]) -> Self {
            Self {
                listing: lines.iter().map(|l| l.to_string()).collect(),
                ..Default::default()
            }
        }

        fn exit(mut self, prefix: &str, code: i32) -> Self {
            self.exits.push((prefix.to_string(), code));
            self
        }

        fn cancel_on(mut self, prefix: &str, cancel: &CancelToken) -> Self {
            self.cancel_on = Some((prefix.to_string(), cancel.clone()));
            self
        }

        fn commands(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|call| call.masked.clone())
                .collect()
        }

        fn count(&self, prefix: &str) -> usize {
            self.commands()
                .iter()
                .filter(|command| command.starts_with(prefix))
                .count()
        }
    }

    #[async_trait]
    impl ProcessInvoker for RecordingInvoker {
        async fn run(
            &self,
            invocation: &Invocation,
            stdout: &mut dyn OutputSink,
            _stderr: &mut dyn OutputSink,
            _cancel: &CancelToken,
        ) -> Result<InvocationStatus, CommandError> {
            let masked = invocation
                .args
                .iter()
                .map(CommandArg::masked)
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(Call {
                masked: masked.clone(),
                exposed: invocation.args.iter().map(CommandArg::expose).collect(),
            });

            if let Some((prefix, cancel)) = &self.cancel_on
                && masked.starts_with(prefix.as_str())
            {
                cancel.cancel();
                return Ok(InvocationStatus::Cancelled);
            }

            if masked == "repo list -raw" {
                for line in &self.listing {
                    stdout.write_line(line);
                }
            }

            let code = self
                .exits
                .iter()
                .find(|(prefix, _)| masked.starts_with(prefix.as_str()))
                .map(|(_, code)| *code)
                .unwrap_or(0);
            Ok(InvocationStatus::Exited(code))
        }
    }

    struct StaticCredentialResolver {
        credentials: HashMap<String, (String, String)>,
    }

    impl StaticCredentialResolver {
        fn with(credential_ref: &str, identity: &str, secret: &str) -> Self {
            let mut credentials = HashMap::new();
            credentials.insert(
                credential_ref.to_string(),
                (identity.to_string(), secret.to_string()),
            );
            Self { credentials }
        }

        fn empty() -> Self {
            Self {
                credentials: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl CredentialResolver for StaticCredentialResolver {
        async fn resolve(
            &self,
            credential_ref: &str,
            _context: &RunContext,
        ) -> Option<SigningCredential> {
            self.credentials
                .get(credential_ref)
                .map(|(identity, secret)| SigningCredential::new(identity.as_str(), secret.as_str()))
        }
    }

    /// Resolves everything below a fixed root except the listed filenames
    #[derive(Default)]
    struct MemoryStore {
        missing: Vec<String>,
    }

    impl ArtifactStore for MemoryStore {
        fn resolve(&self, artifact: &Artifact) -> Result<PathBuf, ArtifactError> {
            let path = PathBuf::from(ROOT).join(&artifact.relative_path);
            if self.missing.contains(&artifact.filename) {
                return Err(ArtifactError::NotFound(path));
            }
            Ok(path)
        }
    }

    fn repository() -> RepositoryConfig {
        RepositoryConfig::new("r1", "c", "stable", "cred1")
    }

    fn artifacts(names: &[&str]) -> Vec<Artifact> {
        names.iter().map(Artifact::new).collect()
    }

    fn orchestrator(
        invoker: &Arc<RecordingInvoker>,
        credentials: StaticCredentialResolver,
        store: MemoryStore,
        options: PipelineOptions,
    ) -> PublishOrchestrator {
        PublishOrchestrator::new(
            repository(),
            AptlyCommands::default(),
            invoker.clone(),
            Arc::new(credentials),
            Arc::new(store),
        )
        .with_options(options)
    }

    fn default_credentials() -> StaticCredentialResolver {
        StaticCredentialResolver::with("cred1", "ABCDEF12", "hunter2")
    }

    #[tokio::test]
    async fn test_end_to_end_publish() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        let report = publisher
            .run(
                &artifacts(&["a_1.0_amd64.deb", "b.dsc"]),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            invoker.commands(),
            vec![
                "repo list -raw",
                "repo add r1 /srv/artifacts/a_1.0_amd64.deb",
                "publish drop stable r1",
                "publish repo -batch -gpg-key=**** -passphrase=**** r1 r1",
            ]
        );
        assert_eq!(publisher.state(), PublishState::Published);
        assert!(report.success);
        assert_eq!(report.added, vec!["a_1.0_amd64.deb"]);
        assert_eq!(report.transitions.len(), 5);
        assert!(report.published_at.is_some());
        assert!(report.error_code.is_none());
    }

    #[tokio::test]
    async fn test_publish_passes_credential_to_invoker() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        publisher.run(&[], &CancelToken::new()).await.unwrap();

        let calls = invoker.calls.lock().unwrap().clone();
        let publish = calls.last().unwrap();
        assert_eq!(
            publish.exposed,
            vec![
                "publish",
                "repo",
                "-batch",
                "-gpg-key=ABCDEF12",
                "-passphrase=hunter2",
                "r1",
                "r1"
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_repository_with_whitespace_is_not_created() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["other", "  r1  "]));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        publisher.run(&[], &CancelToken::new()).await.unwrap();

        assert_eq!(invoker.count("repo create"), 0);
    }

    #[tokio::test]
    async fn test_missing_repository_is_created() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r10", "xr1"]));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        publisher.run(&[], &CancelToken::new()).await.unwrap();

        assert_eq!(
            invoker.commands()[1],
            "repo create -comment=c -distribution=stable r1"
        );
    }

    #[tokio::test]
    async fn test_listing_failure_aborts() {
        let invoker = Arc::new(RecordingInvoker::default().exit("repo list", 1));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        let error = publisher
            .run(&artifacts(&["a_1.0_amd64.deb"]), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, PublishError::RepoSetupFailed { .. }));
        assert_eq!(
            publisher.state(),
            PublishState::Aborted(AbortReason::RepoSetupFailed)
        );
        assert_eq!(invoker.commands(), vec!["repo list -raw"]);
    }

    #[tokio::test]
    async fn test_create_failure_aborts() {
        let invoker = Arc::new(RecordingInvoker::default().exit("repo create", 2));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        let error = publisher
            .run(&artifacts(&["a_1.0_amd64.deb"]), &CancelToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.reason(), AbortReason::RepoSetupFailed);
        assert_eq!(invoker.count("repo add"), 0);

        let report = publisher.report();
        assert!(!report.success);
        assert_eq!(report.error_code.as_deref(), Some("REPO_SETUP_FAILED"));
    }

    #[tokio::test]
    async fn test_prune_removes_only_prunable_artifacts() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let options = PipelineOptions {
            remove_old_packages: true,
            ..Default::default()
        };
        let mut publisher = orchestrator(&invoker, default_credentials(), MemoryStore::default(), options);

        let report = publisher
            .run(
                &artifacts(&["foo_1.0_amd64.deb", "bar.dsc"]),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(invoker.count("repo remove"), 1);
        assert!(invoker.commands().contains(&"repo remove r1 foo{amd64}".to_string()));
        assert_eq!(report.removed, vec!["foo{amd64}"]);
    }

    #[tokio::test]
    async fn test_prune_disabled_issues_no_removal() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        publisher
            .run(&artifacts(&["foo_1.0_amd64.deb"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(invoker.count("repo remove"), 0);
    }

    #[tokio::test]
    async fn test_prune_failure_is_only_a_warning() {
        let invoker = Arc::new(
            RecordingInvoker::with_listing(&["r1"]).exit("repo remove r1 foo", 1),
        );
        let options = PipelineOptions {
            remove_old_packages: true,
            ..Default::default()
        };
        let mut publisher = orchestrator(&invoker, default_credentials(), MemoryStore::default(), options);

        let report = publisher
            .run(
                &artifacts(&["foo_1.0_amd64.deb", "foo_1.0.orig.tar.xz"]),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(invoker.count("repo remove r1 foo"), 2);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.removed.is_empty());
        assert_eq!(publisher.state(), PublishState::Published);
    }

    #[tokio::test]
    async fn test_add_skips_debug_packages() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let options = PipelineOptions {
            ignore_debug_packages: true,
            ..Default::default()
        };
        let mut publisher = orchestrator(&invoker, default_credentials(), MemoryStore::default(), options);

        publisher
            .run(
                &artifacts(&["a_1.0_amd64.deb", "b_1.0_amd64-dbg.deb"]),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(invoker.count("repo add"), 1);
        assert_eq!(invoker.count("repo add r1 /srv/artifacts/a_1.0_amd64.deb"), 1);
    }

    #[tokio::test]
    async fn test_add_includes_source_packages_when_enabled() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let options = PipelineOptions {
            include_source_packages: true,
            ..Default::default()
        };
        let mut publisher = orchestrator(&invoker, default_credentials(), MemoryStore::default(), options);

        publisher
            .run(&artifacts(&["a_1.0_amd64.deb", "a_1.0.dsc"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(invoker.count("repo add"), 2);
    }

    #[tokio::test]
    async fn test_first_add_failure_stops_remaining_artifacts() {
        let invoker = Arc::new(
            RecordingInvoker::with_listing(&["r1"])
                .exit("repo add r1 /srv/artifacts/a_1.0_amd64.deb", 1),
        );
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        let error = publisher
            .run(
                &artifacts(&["a_1.0_amd64.deb", "b_1.0_amd64.deb"]),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        match &error {
            PublishError::PackageAddFailed { artifact, .. } => {
                assert_eq!(artifact, "a_1.0_amd64.deb")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(invoker.count("repo add"), 1);
        assert_eq!(invoker.count("publish"), 0);
        assert_eq!(publisher.state(), PublishState::Aborted(AbortReason::AddFailed));
    }

    #[tokio::test]
    async fn test_unresolvable_artifact_aborts_add() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let store = MemoryStore {
            missing: vec!["a_1.0_amd64.deb".to_string()],
        };
        let mut publisher = orchestrator(&invoker, default_credentials(), store, PipelineOptions::default());

        let error = publisher
            .run(&artifacts(&["a_1.0_amd64.deb"]), &CancelToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.reason(), AbortReason::AddFailed);
        assert_eq!(invoker.count("repo add"), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_artifact_path_aborts_add() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        struct NonUtf8Store;

        impl ArtifactStore for NonUtf8Store {
            fn resolve(&self, _artifact: &Artifact) -> Result<PathBuf, ArtifactError> {
                Ok(PathBuf::from(OsStr::from_bytes(b"/srv/artifacts/\xffa_1.0_amd64.deb")))
            }
        }

        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let mut publisher = PublishOrchestrator::new(
            repository(),
            AptlyCommands::default(),
            invoker.clone(),
            Arc::new(default_credentials()),
            Arc::new(NonUtf8Store),
        );

        let error = publisher
            .run(&artifacts(&["a_1.0_amd64.deb"]), &CancelToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.reason(), AbortReason::AddFailed);
        assert!(error.to_string().contains("not valid UTF-8"));
        assert_eq!(invoker.count("repo add"), 0);
        assert_eq!(invoker.count("publish"), 0);
        assert_eq!(publisher.state(), PublishState::Aborted(AbortReason::AddFailed));
    }

    #[tokio::test]
    async fn test_drop_failure_is_ignored() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]).exit("publish drop", 1));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        publisher.run(&[], &CancelToken::new()).await.unwrap();

        assert_eq!(publisher.state(), PublishState::Published);
        assert_eq!(invoker.count("publish repo"), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_issues_no_publish() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let mut publisher = orchestrator(
            &invoker,
            StaticCredentialResolver::empty(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        let error = publisher
            .run(&artifacts(&["a_1.0_amd64.deb"]), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            PublishError::CredentialNotFound { ref credential_ref, .. } if credential_ref == "cred1"
        ));
        assert_eq!(invoker.count("publish repo"), 0);
        assert_eq!(
            publisher.state(),
            PublishState::Aborted(AbortReason::CredentialNotFound)
        );
    }

    #[tokio::test]
    async fn test_publish_failure_aborts() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]).exit("publish repo", 1));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        let error = publisher.run(&[], &CancelToken::new()).await.unwrap_err();

        assert_eq!(error.reason(), AbortReason::PublishFailed);
        assert!(!error.to_string().contains("hunter2"));
        assert_eq!(
            publisher.state(),
            PublishState::Aborted(AbortReason::PublishFailed)
        );
    }

    #[tokio::test]
    async fn test_cancel_during_add_stops_the_run() {
        let cancel = CancelToken::new();
        let invoker = Arc::new(
            RecordingInvoker::with_listing(&["r1"]).cancel_on("repo add", &cancel),
        );
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        let error = publisher
            .run(&artifacts(&["a_1.0_amd64.deb", "b_1.0_amd64.deb"]), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(error, PublishError::Cancelled { ref step, .. } if step == "add-packages"));
        assert_eq!(invoker.count("repo add"), 1);
        assert_eq!(invoker.count("publish"), 0);
        assert_eq!(publisher.state(), PublishState::Aborted(AbortReason::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_before_run_spawns_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        let error = publisher.run(&[], &cancel).await.unwrap_err();

        assert_eq!(error.reason(), AbortReason::Cancelled);
        assert!(invoker.commands().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]));
        let mut publisher = orchestrator(
            &invoker,
            default_credentials(),
            MemoryStore::default(),
            PipelineOptions::default(),
        );

        publisher.run(&[], &CancelToken::new()).await.unwrap();
        let calls = invoker.commands().len();

        assert!(publisher.run(&[], &CancelToken::new()).await.is_err());
        assert_eq!(invoker.commands().len(), calls);
        assert_eq!(publisher.state(), PublishState::Published);
    }

    #[test]
    fn test_unknown_repository_is_a_configuration_error() {
        let config = PublisherConfig {
            repositories: vec![repository()],
            ..Default::default()
        };

        let result = PublishOrchestrator::for_repository(
            &config,
            "r2",
            Arc::new(RecordingInvoker::default()),
            Arc::new(StaticCredentialResolver::empty()),
            Arc::new(MemoryStore::default()),
        );

        match result {
            Err(error) => assert_eq!(error.reason(), AbortReason::ConfigurationError),
            Ok(_) => panic!("r2 is not configured"),
        }
    }

    #[test]
    fn test_for_repository_uses_configured_binary() {
        let mut config = PublisherConfig {
            repositories: vec![repository()],
            ..Default::default()
        };
        config.aptly.binary = "/opt/aptly/bin/aptly".to_string();

        let publisher = PublishOrchestrator::for_repository(
            &config,
            "r1",
            Arc::new(RecordingInvoker::default()),
            Arc::new(StaticCredentialResolver::empty()),
            Arc::new(MemoryStore::default()),
        )
        .unwrap();

        assert_eq!(publisher.commands.binary(), "/opt/aptly/bin/aptly");
        assert_eq!(publisher.context().repository, "r1");
    }

    mod logging {
        use super::*;
        use std::io;

        #[derive(Clone, Default)]
        struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

        impl io::Write for SharedBuffer {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        #[tokio::test(flavor = "current_thread")]
        async fn test_secret_never_reaches_the_log() {
            let buffer = SharedBuffer::default();
            let writer = buffer.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::TRACE)
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .finish();
            let _guard = tracing::subscriber::set_default(subscriber);

            let invoker = Arc::new(RecordingInvoker::with_listing(&["r1"]).exit("publish repo", 1));
            let mut publisher = orchestrator(
                &invoker,
                StaticCredentialResolver::with("cred1", "KEYID-0xDEADBEEF", "correct-horse-battery"),
                MemoryStore::default(),
                PipelineOptions::default(),
            );
            let _ = publisher
                .run(&artifacts(&["a_1.0_amd64.deb"]), &CancelToken::new())
                .await;

            let log = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
            assert!(log.contains("publish.aborted"));
            assert!(!log.contains("correct-horse-battery"));
            assert!(!log.contains("KEYID-0xDEADBEEF"));
        }
    }
}
