//! Orchestration layer for repository publishing
//!
//! This module provides the publish pipeline, the aptly command builders it
//! drives, and the run report it produces.

pub mod aptly;
pub mod dry_run;
pub mod publish_orchestrator;
pub mod report;

// Re-export main types for convenience
pub use aptly::AptlyCommands;
pub use dry_run::DryRunInvoker;
pub use publish_orchestrator::PublishOrchestrator;
pub use report::PublishReport;
