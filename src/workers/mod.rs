//! Background workers (spec §4.9–§4.10, C10/C11).
//!
//! Both workers are periodic, single-flight tasks: a reentrant tick while
//! the previous one is still running returns immediately rather than
//! queuing up (spec §5 "Single-flight"). `/sync/run` and `/replay/run`
//! share the exact same `busy` flag as the timer-driven tick.

pub mod queue_worker;
pub mod replay_worker;

use std::sync::atomic::{AtomicBool, Ordering};

/// RAII guard that clears a `busy` flag on drop, so an early return or a
/// panic inside a tick can't leave the flag stuck `true` forever.
pub struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    /// Attempt to acquire; `None` if another tick already holds the flag.
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
