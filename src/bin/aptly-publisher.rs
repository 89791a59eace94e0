//! aptly-publisher CLI
//!
//! Publishes Debian build artifacts into an aptly repository

use anyhow::{Context, Result, anyhow};
use aptly_publisher::{
    Artifact, ArtifactStore, CancelToken, ConfigLoadOptions, ConfigLoader, CredentialResolver,
    DryRunInvoker, EnvCredentialResolver, FsArtifactStore, PipelineOptions, ProcessInvoker,
    PublishError, PublishOrchestrator, PublisherConfig, SafeCommandExecutor,
};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Default log filter when RUST_LOG is unset
const DEFAULT_LOG_FILTER: &str = "aptly_publisher=info";

/// Debian repository publishing through aptly
#[derive(Parser)]
#[command(name = "aptly-publisher")]
#[command(version = "0.1.0")]
#[command(about = "Publish Debian packages into an aptly repository", long_about = None)]
struct Cli {
    /// Config file (defaults to ./.aptly-publisher.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add artifacts to a repository and publish it
    Publish {
        /// Artifact files (defaults to every file below --artifacts-dir)
        #[arg(value_name = "FILES")]
        files: Vec<PathBuf>,

        /// Target repository (or APTLY_PUBLISHER_REPOSITORY)
        #[arg(short, long)]
        repository: Option<String>,

        /// Directory artifacts are collected from and resolved against
        #[arg(long, default_value = ".")]
        artifacts_dir: PathBuf,

        /// Accepted for compatibility; does not change artifact selection
        #[arg(long)]
        upload_all_files: bool,

        /// Skip packages whose filename contains "-dbg"
        #[arg(long)]
        ignore_debug_packages: bool,

        /// Remove the previous version of each package first
        #[arg(long)]
        remove_old_packages: bool,

        /// Also add .dsc source packages
        #[arg(long)]
        include_source_packages: bool,

        /// Print the aptly commands instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Write a JSON run report to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },

    /// Validate the configuration
    Check {
        /// Also check that this repository is configured
        #[arg(short, long)]
        repository: Option<String>,
    },

    /// List configured repositories
    Repos,
}

#[tokio::main]
async fn main() {
    init_tracing();

    match run().await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Publish {
            files,
            repository,
            artifacts_dir,
            upload_all_files,
            ignore_debug_packages,
            remove_old_packages,
            include_source_packages,
            dry_run,
            report,
        } => {
            let options = PipelineOptions {
                upload_all_files,
                ignore_debug_packages,
                remove_old_packages,
                include_source_packages,
            };
            let request = PublishRequest {
                config_file: cli.config,
                repository,
                artifacts_dir,
                files,
                options,
                dry_run,
                report,
            };
            publish_command(request).await
        }
        Commands::Check { repository } => check_command(cli.config, repository).await,
        Commands::Repos => repos_command(cli.config).await,
    }
}

fn load_options(config_file: Option<PathBuf>) -> ConfigLoadOptions {
    let mut options = ConfigLoadOptions::new(".");
    options.config_file = config_file;
    options
}

async fn load_config(config_file: Option<PathBuf>) -> Result<PublisherConfig, PublishError> {
    ConfigLoader::load(load_options(config_file)).await
}

fn print_failure(error: &PublishError) {
    eprintln!("\n❌ Publishing failed [{}]: {}", error.code(), error);
    eprintln!("\n💡 Suggested actions:");
    for action in error.suggested_actions() {
        eprintln!("  - {}", action);
    }
}

struct PublishRequest {
    config_file: Option<PathBuf>,
    repository: Option<String>,
    artifacts_dir: PathBuf,
    files: Vec<PathBuf>,
    options: PipelineOptions,
    dry_run: bool,
    report: Option<PathBuf>,
}

async fn publish_command(request: PublishRequest) -> Result<i32> {
    println!("\n📦 aptly-publisher\n");

    let config = match load_config(request.config_file).await {
        Ok(config) => config,
        Err(e) => {
            print_failure(&e);
            return Ok(1);
        }
    };

    let env: HashMap<String, String> = std::env::vars().collect();
    let repository_name = request
        .repository
        .or_else(|| ConfigLoader::default_repository(&env))
        .ok_or_else(|| anyhow!("No repository given; pass --repository or set APTLY_PUBLISHER_REPOSITORY"))?;

    let store = FsArtifactStore::new(&request.artifacts_dir)
        .with_context(|| format!("Invalid artifacts directory {}", request.artifacts_dir.display()))?;
    let artifacts: Vec<Artifact> = if request.files.is_empty() {
        store.collect()?
    } else {
        store.from_paths(&request.files)
    };
    println!("🔍 {} artifact(s) found", artifacts.len());

    let working_dir = config
        .aptly
        .working_directory
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let planner = Arc::new(DryRunInvoker::new());
    let invoker: Arc<dyn ProcessInvoker> = if request.dry_run {
        println!("🧪 Dry run: no aptly command will be executed\n");
        planner.clone()
    } else {
        Arc::new(SafeCommandExecutor::new(&working_dir, &config.aptly.binary)?)
    };
    let credentials: Arc<dyn CredentialResolver> =
        Arc::new(EnvCredentialResolver::with_env(env, config.credentials.clone()));
    let store: Arc<dyn ArtifactStore> = Arc::new(store);

    let mut orchestrator =
        match PublishOrchestrator::for_repository(&config, &repository_name, invoker, credentials, store)
        {
            Ok(orchestrator) => orchestrator.with_options(request.options),
            Err(e) => {
                print_failure(&e);
                return Ok(1);
            }
        };

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Interrupted, stopping aptly");
            trigger.cancel();
        }
    });

    println!(
        "🚀 Publishing to {} (run {})",
        repository_name,
        orchestrator.context().run_id
    );
    let result = orchestrator.run(&artifacts, &cancel).await;

    if request.dry_run {
        println!("\n📋 Planned commands:");
        for command in planner.plan().await {
            println!("  $ {}", command);
        }
    }

    if let Some(path) = &request.report {
        write_report(&orchestrator, path).await;
    }

    match result {
        Ok(report) => {
            println!(
                "\n✅ Published {} ({} added, {} removed)",
                report.repository,
                report.added.len(),
                report.removed.len()
            );
            for warning in &report.warnings {
                println!("  ⚠️  {}", warning);
            }
            Ok(0)
        }
        Err(e) => {
            print_failure(&e);
            Ok(1)
        }
    }
}

async fn write_report(orchestrator: &PublishOrchestrator, path: &Path) {
    match orchestrator.report().write_json(path).await {
        Ok(()) => println!("📝 Report written to {}", path.display()),
        Err(e) => eprintln!("⚠️  Failed to write report {}: {}", path.display(), e),
    }
}

async fn check_command(config_file: Option<PathBuf>, repository: Option<String>) -> Result<i32> {
    println!("\n🔍 Configuration Check\n");

    // Validation errors are reported below rather than as a load failure
    let config = match ConfigLoader::load_unvalidated(load_options(config_file)).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return Ok(1);
        }
    };

    let validation = ConfigLoader::validate(&config);
    println!("{}", ConfigLoader::format_validation_result(&validation));

    if let Some(name) = repository {
        match config.find_repository(&name) {
            Ok(found) => println!(
                "\n✅ Repository {} → distribution {}",
                found.name, found.default_distribution
            ),
            Err(e) => {
                eprintln!("\n❌ {}", e);
                return Ok(1);
            }
        }
    }

    Ok(if validation.valid { 0 } else { 1 })
}

async fn repos_command(config_file: Option<PathBuf>) -> Result<i32> {
    let config = match load_config(config_file).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return Ok(1);
        }
    };

    if config.repositories.is_empty() {
        println!("⚠️  No repositories configured");
        return Ok(0);
    }

    println!("\n📚 Configured repositories\n");
    for repository in &config.repositories {
        println!(
            "  {} ({}) {}",
            repository.name, repository.default_distribution, repository.comment
        );
    }

    Ok(0)
}
