//! Invoker that plans commands instead of running them

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::cancel::CancelToken;
use crate::core::error::CommandError;
use crate::core::traits::{Invocation, InvocationStatus, OutputSink, ProcessInvoker};

/// Records the masked command line of every invocation and reports success
///
/// Listings come back empty, so a dry run always plans repository creation.
#[derive(Debug, Default)]
pub struct DryRunInvoker {
    plan: Mutex<Vec<String>>,
}

impl DryRunInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Masked command lines in invocation order
    pub async fn plan(&self) -> Vec<String> {
        self.plan.lock().await.clone()
    }
}

#[async_trait]
impl ProcessInvoker for DryRunInvoker {
    async fn run(
        &self,
        invocation: &Invocation,
        _stdout: &mut dyn OutputSink,
        _stderr: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<InvocationStatus, CommandError> {
        if cancel.is_cancelled() {
            return Ok(InvocationStatus::Cancelled);
        }

        let command = invocation.display_masked();
        tracing::info!(op = "dry_run.plan", command = %command);
        self.plan.lock().await.push(command);

        Ok(InvocationStatus::Exited(0))
    }
}
