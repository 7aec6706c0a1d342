// Path: crates/screening/src/cancel.rs
//! Cooperative cancellation, polled once per partition.

use parking_lot::Mutex;
use std::sync::Arc;

/// Decides whether an in-flight screen should stop.
pub trait CancellationCheck {
    /// Returns the reason to stop, or `None` to continue.
    fn cancelled(&self) -> Option<String>;
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancellationCheck for NeverCancel {
    fn cancelled(&self) -> Option<String> {
        None
    }
}

/// A cloneable flag another thread can set with a reason.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    /// Whether [`CancelToken::cancel`] was called on this token or a clone.
    pub fn is_cancelled(&self) -> bool {
        self.reason.lock().is_some()
    }
}

impl CancellationCheck for CancelToken {
    fn cancelled(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

impl<F> CancellationCheck for F
where
    F: Fn() -> Option<String>,
{
    fn cancelled(&self) -> Option<String> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins_across_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(token.cancelled().is_none());

        handle.cancel("user abort");
        handle.cancel("later");
        assert!(token.is_cancelled());
        assert_eq!(token.cancelled().as_deref(), Some("user abort"));
    }

    #[test]
    fn test_closures_are_checks() {
        let check = || Some("deadline".to_string());
        assert_eq!(check.cancelled().as_deref(), Some("deadline"));
        assert!(NeverCancel.cancelled().is_none());
    }
}
