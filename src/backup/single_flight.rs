use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lets at most one job run at a time. A second caller is turned away instead
/// of waiting.
#[derive(Clone, Debug, Default)]
pub struct SingleFlight {
    in_progress: Arc<AtomicBool>,
}

/// Held for as long as the job runs; dropping it frees the slot, also while
/// unwinding.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct SingleFlightGuard {
    in_progress: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<SingleFlightGuard> {
        self.in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SingleFlightGuard {
                in_progress: self.in_progress.clone(),
            })
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        self.in_progress.store(false, Ordering::Release);
    }
}
