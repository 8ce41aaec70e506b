use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Cooperative stop flags for one background loop.
///
/// A loop keeps going while both the gateway-wide flag and its own flag are
/// set. Clearing either is a request, not a cancellation: the loop notices
/// at the top of its next iteration, and the owner joins the thread to
/// make the stop effective.
#[derive(Debug, Clone)]
pub struct LoopControl {
    gateway: Arc<AtomicBool>,
    this_loop: Arc<AtomicBool>,
}

impl LoopControl {
    pub fn new(gateway: Arc<AtomicBool>, this_loop: Arc<AtomicBool>) -> Self {
        Self { gateway, this_loop }
    }

    /// Standalone control with both flags set.
    pub fn running() -> Self {
        Self::new(Arc::new(AtomicBool::new(true)), Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.gateway.load(Ordering::SeqCst) && self.this_loop.load(Ordering::SeqCst)
    }

    /// Ask this loop (only) to stop.
    pub fn stop(&self) {
        self.this_loop.store(false, Ordering::SeqCst);
    }

    /// Sleep up to `total`, waking every `slice` to check the flags.
    ///
    /// Returns `false` if a stop was requested in the meantime.
    pub fn sleep(&self, total: Duration, slice: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if !self.is_running() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}
