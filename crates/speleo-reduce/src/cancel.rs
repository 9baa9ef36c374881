//! Cooperative cancellation.
//!
//! Every pipeline stage takes a [`Cancellation`] and polls it at safe
//! points (between chunks, between caves, during traversal). A stage that
//! observes cancellation returns [`ReduceError::Cancelled`] and produces
//! nothing.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::ReduceError;

/// Something a long-running stage can ask "should I stop?".
pub trait Cancellation {
    /// Whether the work has been asked to stop.
    fn is_cancelled(&self) -> bool;

    /// `Err(Cancelled)` once cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::Cancelled`] if [`is_cancelled`](Self::is_cancelled)
    /// is true.
    fn check(&self) -> Result<(), ReduceError> {
        if self.is_cancelled() {
            Err(ReduceError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A cancellation that never fires, for synchronous one-shot runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Cancellation for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_cancel_passes() {
        assert!(NeverCancel.check().is_ok());
    }

    #[test]
    fn atomic_flag_cancels() {
        let flag = AtomicBool::new(false);
        assert!(flag.check().is_ok());
        flag.store(true, Ordering::Release);
        assert_eq!(flag.check(), Err(ReduceError::Cancelled));
    }
}
