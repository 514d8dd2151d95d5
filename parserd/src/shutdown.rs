//! Monotonic shutdown flag shared by the producer, the workers and the queue.
//!
//! The flag transitions from `false` to `true` exactly once per daemon
//! lifetime and never back. Writers are the signal handler thread and the
//! producer's fatal-error path; everything else only reads. Stores use
//! `Release` ordering and loads `Acquire`, so once any thread observes the
//! flag set, every later observation agrees.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Flag {
    raised: AtomicBool,
    // Condvar pairing lets interruptible sleeps wake promptly on trigger
    // instead of running out their full duration.
    lock: Mutex<()>,
    woken: Condvar,
}

/// Creates a connected trigger/view pair around a fresh shutdown flag.
pub fn shutdown_pair() -> (ShutdownTx, ShutdownView) {
    let flag = Arc::new(Flag::default());
    (
        ShutdownTx { flag: flag.clone() },
        ShutdownView { flag },
    )
}

/// Write side of the shutdown flag.
///
/// Cloneable so both the signal handler and the producer's fatal-error path
/// can hold a trigger. Triggering is idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownTx {
    flag: Arc<Flag>,
}

impl ShutdownTx {
    /// Raises the shutdown flag and wakes interruptible sleepers.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// flag was already raised. Any number of additional calls are equivalent
    /// to the first one.
    pub fn trigger(&self) -> bool {
        let first = !self.flag.raised.swap(true, Ordering::Release);
        // Waking under the lock closes the race with a sleeper that checked
        // the flag but has not parked yet.
        let _guard = self.flag.lock.lock().unwrap();
        self.flag.woken.notify_all();
        first
    }

    /// Returns a read-only view of the same flag.
    pub fn view(&self) -> ShutdownView {
        ShutdownView {
            flag: self.flag.clone(),
        }
    }
}

/// Read side of the shutdown flag, handed to the producer, the workers and
/// the job queue.
#[derive(Debug, Clone)]
pub struct ShutdownView {
    flag: Arc<Flag>,
}

impl ShutdownView {
    /// Returns `true` once shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        self.flag.raised.load(Ordering::Acquire)
    }

    /// Sleeps for up to `duration`, returning early when shutdown triggers.
    ///
    /// Returns `true` if shutdown was observed, `false` if the full duration
    /// elapsed.
    pub fn sleep_interruptible(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.flag.lock.lock().unwrap();
        loop {
            if self.is_shutdown() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _timeout) = self
                .flag
                .woken
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_lowered() {
        let (_tx, view) = shutdown_pair();
        assert!(!view.is_shutdown());
    }

    #[test]
    fn trigger_is_idempotent() {
        let (tx, view) = shutdown_pair();
        assert!(tx.trigger());
        assert!(!tx.trigger());
        assert!(!tx.trigger());
        assert!(view.is_shutdown());
    }

    #[test]
    fn observed_monotonically_across_threads() {
        let (tx, view) = shutdown_pair();
        tx.trigger();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let view = view.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(view.is_shutdown());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn sleep_interrupted_by_trigger() {
        let (tx, view) = shutdown_pair();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.trigger();
        });

        let start = Instant::now();
        let interrupted = view.sleep_interruptible(Duration::from_secs(30));
        assert!(interrupted);
        assert!(start.elapsed() < Duration::from_secs(5));
        waker.join().unwrap();
    }

    #[test]
    fn sleep_runs_out_without_trigger() {
        let (_tx, view) = shutdown_pair();
        assert!(!view.sleep_interruptible(Duration::from_millis(20)));
    }
}
