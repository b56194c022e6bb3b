//! Cancellable request context.
//!
//! A context is a [`CancellationToken`] that remembers *why* it was
//! cancelled. Derived contexts are cancelled with their parent and report the
//! parent's cause unless they were cancelled first for their own reason.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{CancelCause, CmdError};

#[derive(Debug)]
struct Node {
    token: CancellationToken,
    cause: OnceLock<CancelCause>,
    parent: Option<Arc<Node>>,
}

/// Cancellation scope shared by a request's producer and consumer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    node: Arc<Node>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Create a root context.
    pub fn new() -> Self {
        Self {
            node: Arc::new(Node {
                token: CancellationToken::new(),
                cause: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// Derive a context that is cancelled whenever this one is.
    pub fn child(&self) -> Self {
        Self {
            node: Arc::new(Node {
                token: self.node.token.child_token(),
                cause: OnceLock::new(),
                parent: Some(self.node.clone()),
            }),
        }
    }

    /// Derive a context that cancels itself with [`CancelCause::Timeout`]
    /// after `timeout`. Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let child = self.child();
        let timer = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => timer.cancel_with(CancelCause::Timeout),
                _ = timer.cancelled() => {}
            }
        });
        child
    }

    /// Cancel on behalf of the caller.
    pub fn cancel(&self) {
        self.cancel_with(CancelCause::Caller);
    }

    /// Cancel with an explicit cause. The first cause recorded wins.
    pub fn cancel_with(&self, cause: CancelCause) {
        if !self.node.token.is_cancelled() {
            let _ = self.node.cause.set(cause);
        }
        self.node.token.cancel();
    }

    /// Whether this context (or an ancestor) was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.node.token.is_cancelled()
    }

    /// Cause of cancellation, if cancelled.
    pub fn cause(&self) -> Option<CancelCause> {
        if !self.is_cancelled() {
            return None;
        }
        let mut node = Some(&self.node);
        while let Some(current) = node {
            if let Some(cause) = current.cause.get() {
                return Some(*cause);
            }
            node = current.parent.as_ref();
        }
        Some(CancelCause::Caller)
    }

    /// The error a cancelled operation reports.
    pub fn error(&self) -> CmdError {
        CmdError::Cancelled(self.cause().unwrap_or(CancelCause::Caller))
    }

    /// Fail with the cancellation error if cancelled.
    pub fn check(&self) -> Result<(), CmdError> {
        if self.is_cancelled() {
            Err(self.error())
        } else {
            Ok(())
        }
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        self.node.token.cancelled().await;
    }

    /// Underlying token, for APIs that take one directly.
    pub fn token(&self) -> CancellationToken {
        self.node.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_records_first_cause() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.cause(), None);
        ctx.cancel_with(CancelCause::Interrupt);
        ctx.cancel_with(CancelCause::Timeout);
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cause(), Some(CancelCause::Interrupt));
        assert_eq!(ctx.error().exit_code(), 130);
    }

    #[test]
    fn test_child_inherits_parent_cause() {
        let parent = RequestContext::new();
        let child = parent.child();
        parent.cancel_with(CancelCause::Interrupt);
        assert!(child.is_cancelled());
        assert_eq!(child.cause(), Some(CancelCause::Interrupt));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(child.check().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_with_timeout_cause() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(50));
        ctx.cancelled().await;
        assert_eq!(ctx.cause(), Some(CancelCause::Timeout));
    }
}
