use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation and deadline governing one ingestion request.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Child context: cancelled together with `self`, and never outliving its
    /// deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reports why the context is done, if it is.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drives `fut` until it completes or the context is done, whichever
    /// comes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = self.token.cancelled() => Err(ContextError::Cancelled),
            _ = deadline => Err(ContextError::DeadlineExceeded),
            res = fut => Ok(res),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let cx = Context::new();
        assert_eq!(Ok(42), cx.run(async { 42 }).await);
        assert_eq!(None, cx.err());
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let cx = Context::new();
        cx.child().cancel();
        assert_eq!(None, cx.err());

        cx.cancel();
        assert_eq!(Some(ContextError::Cancelled), cx.err());
        assert_eq!(Err(ContextError::Cancelled), cx.run(async { 1 }).await);
    }

    #[tokio::test]
    async fn test_cancel_while_running() {
        let cx = Context::new();
        let child = cx.child();
        let handle = tokio::spawn(async move {
            child
                .run(tokio::time::sleep(Duration::from_secs(60)))
                .await
        });
        tokio::task::yield_now().await;
        cx.cancel();
        assert_eq!(Err(ContextError::Cancelled), handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let cx = Context::with_timeout(Duration::from_millis(10));
        let res = cx.run(tokio::time::sleep(Duration::from_secs(1))).await;
        assert_eq!(Err(ContextError::DeadlineExceeded), res);
        assert_eq!(Some(ContextError::DeadlineExceeded), cx.err());
    }
}
