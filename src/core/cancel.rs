//! Cancellation signal shared between the host and a running pipeline

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation flag
///
/// The host keeps one clone and calls [`CancelToken::cancel`]; the pipeline
/// and the process invoker wait on [`CancelToken::cancelled`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone of the token, so the only way
        // out of `wait_for` is the flag turning true.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}
