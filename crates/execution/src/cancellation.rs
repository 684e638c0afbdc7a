use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use workcell_core::{Error, Result};

/// Cooperative cancellation flag.
///
/// A child signal reports cancellation when either it or its parent was
/// cancelled; cancelling a child never affects the parent.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(self.flag.clone()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.load(Ordering::SeqCst))
    }

    /// Fail with [`Error::Cancelled`] once cancellation was requested
    pub fn check(&self, work: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled(work))
        } else {
            Ok(())
        }
    }
}
