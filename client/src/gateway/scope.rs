//! Screen-scoped operations.
//!
//! A modal that uploads an image or submits an order owns a [`ScreenScope`].
//! When the screen goes away the scope is dismissed, and every call still
//! running through it resolves with [`ClientError::Cancelled`] so nothing
//! updates a screen that no longer exists. Dropping the scope dismisses it.

use crate::error::{ClientError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct ScreenScope {
    token: CancellationToken,
}

impl ScreenScope {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Run `operation` until it finishes or the scope is dismissed.
    pub async fn run<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ClientError::Cancelled),
            result = operation => result,
        }
    }

    /// A token that dismisses this scope when cancelled, for wiring to
    /// teardown events.
    pub fn dismiss_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn dismiss(&self) {
        self.token.cancel();
    }

    pub fn is_dismissed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScreenScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
