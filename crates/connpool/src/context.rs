//! Request context: cooperative cancellation plus an optional deadline.
//!
//! A [`Context`] travels with every request handed to the pool. The pool uses
//! it to skip requests whose caller already gave up, to bound connection
//! setup, and to pick the deadline for draining leftover bytes.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Cancellation token and optional deadline shared between a caller and the pool.
///
/// Cloning shares the same token. [`Context::child`] derives a context that is
/// cancelled together with its parent but can also be cancelled on its own.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A fresh context expiring after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    /// A fresh context expiring at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::background().child_with_deadline(deadline)
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child whose deadline is the earlier of the parent's and `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.child_with_deadline(Instant::now() + timeout)
    }

    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.token.cancelled() => ContextError::Cancelled,
                () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_live() {
        let ctx = Context::background();
        assert!(ctx.deadline().is_none());
        assert_eq!(ctx.err(), None);
    }

    #[test]
    fn cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn cancelling_child_leaves_parent_live() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn child_deadline_never_extends_parent() {
        let parent = Context::with_timeout(Duration::from_secs(1));
        let child = parent.child_with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());

        let shorter = parent.child_with_timeout(Duration::from_millis(100));
        assert!(shorter.deadline() < parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn done_resolves_at_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(50));
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn done_resolves_on_cancel() {
        let ctx = Context::background();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.done().await });
        ctx.cancel();
        assert_eq!(handle.await.unwrap(), ContextError::Cancelled);
    }

    #[tokio::test]
    async fn zero_timeout_is_already_expired() {
        let ctx = Context::with_timeout(Duration::ZERO);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }
}
