use tokio_util::sync::CancellationToken;

/// Cooperative cancellation flag shared between an executor and its workers.
///
/// Cloning yields a handle to the same flag. Workers poll
/// [`CancelToken::is_cancelled`] at safe points or await
/// [`CancelToken::cancelled`] inside a `select!`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the flag is raised.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// A token that is also raised when `self` is, but can be raised on its
    /// own without affecting `self`.
    pub fn child(&self) -> CancelToken {
        Self {
            inner: self.inner.child_token(),
        }
    }
}
