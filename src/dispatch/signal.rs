use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Session-level abort flag, shared with every in-flight group.
///
/// Cooperative: group loops check it between attempts; already-persisted
/// counts remain valid after an abort and the session can resume.
#[derive(Debug, Clone, Default)]
pub struct SignalHandler {
    aborted: Arc<AtomicBool>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }
}
