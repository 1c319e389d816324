//! Cooperative cancellation, threaded through every public engine and driver
//! call (spec §5), mirroring the source's `context.Context` cancellation.
//!
//! There is no engine-owned worker pool and no async runtime here (every
//! `KvDriver` call is synchronous), so cancellation is a plain shared flag
//! rather than a future-aware primitive: a caller holding a clone of the
//! token can call [`CancellationToken::cancel`] from another thread, and the
//! in-flight call observes it at its next check point and returns
//! [`crate::error::LedgerError::Cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::LedgerError;

/// Shared cancellation flag. Cloning shares the same underlying signal.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that is never cancelled unless [`Self::cancel`] is called on
    /// this instance or a clone of it.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(LedgerError::Cancelled)` if cancelled, `Ok(())` otherwise.
    pub fn check(&self) -> Result<(), LedgerError> {
        if self.is_cancelled() {
            Err(LedgerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_is_observed_through_a_clone() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(LedgerError::Cancelled)));
    }
}
