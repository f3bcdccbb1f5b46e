use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag used to unwind blocking protocol loops.
///
/// Any clone may raise it, typically from an event outside the protocol task.
/// Reading never clears it; whoever owns the loop calls [`clear`](Self::clear)
/// once it has reacted, so a request arriving between a check and the next
/// wait is never lost.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    flag: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Acknowledges a request, returning whether one was pending
    pub fn clear(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_shared_between_clones() {
        let signal = CancellationSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_set());

        handle.set();
        assert!(signal.is_set());
        // Reading does not consume the request
        assert!(signal.is_set());

        assert!(signal.clear());
        assert!(!handle.is_set());
        assert!(!signal.clear());
    }
}
