use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Coalesces overlapping triggers of one job: if a run is already in
/// flight, a new trigger doesn't spawn a second concurrent execution —
/// it either is dropped (`try_enter`) or marks one more queued run to
/// happen immediately after the in-flight one finishes (`enter_or_queue`),
/// matching `max_instances=1` coalescing semantics.
#[derive(Default)]
pub struct RunGate {
    running: AtomicBool,
    pending: AtomicBool,
}

pub struct RunGuard {
    gate: Arc<RunGate>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::SeqCst);
    }
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a guard if no run is currently in flight, or `None` if one
    /// already is. The guard releases the gate when dropped.
    pub fn try_enter(self: &Arc<Self>) -> Option<RunGuard> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(RunGuard { gate: self.clone() })
        } else {
            None
        }
    }

    /// Like [`try_enter`](Self::try_enter), but on failure marks that one
    /// more execution should run as soon as the in-flight one completes,
    /// instead of dropping the firing entirely.
    pub fn enter_or_queue(self: &Arc<Self>) -> Option<RunGuard> {
        match self.try_enter() {
            Some(guard) => Some(guard),
            None => {
                self.pending.store(true, Ordering::SeqCst);
                None
            }
        }
    }

    /// Atomically clears and returns whether a queued re-run was requested.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub type SharedRunGate = Arc<RunGate>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_rejected_while_first_holds_the_guard() {
        let gate = Arc::new(RunGate::new());
        let guard = gate.try_enter().unwrap();
        assert!(gate.try_enter().is_none());
        drop(guard);
        assert!(gate.try_enter().is_some());
    }

    #[test]
    fn enter_or_queue_marks_pending_on_collision() {
        let gate = Arc::new(RunGate::new());
        let guard = gate.try_enter().unwrap();
        assert!(gate.enter_or_queue().is_none());
        assert!(gate.take_pending());
        assert!(!gate.take_pending());
        drop(guard);
    }
}
