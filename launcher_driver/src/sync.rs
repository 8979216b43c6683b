//! Synchronization primitives shared by the session components.
//!
//! - [`IoLock`] - FIFO lock that may be held across blocking waits
//! - [`lock`] - `Mutex::lock` that recovers from poisoning
//!
//! Field-level state touched from completion context uses plain
//! `std::sync::Mutex` sections that only copy a few words, or atomics.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves the protected value
/// consistent after each statement, so a poisoned guard is still usable.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait on a condition variable until `condition` is false or `timeout` elapses.
///
/// Returns the guard and whether the condition is still true (timed out).
pub(crate) fn wait_while_timeout<'a, T, F>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    condition: F,
) -> (MutexGuard<'a, T>, bool)
where
    F: FnMut(&mut T) -> bool,
{
    let (guard, result) = condvar
        .wait_timeout_while(guard, timeout, condition)
        .unwrap_or_else(PoisonError::into_inner);
    (guard, result.timed_out())
}

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
    /// Tickets whose holders gave up waiting; skipped on release.
    abandoned: BTreeSet<u64>,
}

/// Serializing I/O lock.
///
/// A ticket lock: waiters are admitted strictly in arrival order. Unlike a
/// `MutexGuard`, ownership can be detached ([`IoLock::acquire_detached`])
/// and released later from a different call ([`IoLock::release_detached`]),
/// which the pre-reset / post-reset pair needs.
///
/// Never acquire this from a completion handler.
#[derive(Debug, Default)]
pub struct IoLock {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

/// RAII guard of an [`IoLock`].
#[must_use = "the I/O lock is released when the guard is dropped"]
#[derive(Debug)]
pub struct IoGuard<'a> {
    lock: &'a IoLock,
}

impl IoLock {
    /// Create an unlocked I/O lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is ours.
    pub fn acquire(&self) -> IoGuard<'_> {
        self.wait_for_turn(None);
        IoGuard { lock: self }
    }

    /// Block at most `timeout`. Returns `None` if the lock was not obtained.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<IoGuard<'_>> {
        if self.wait_for_turn(Some(Instant::now() + timeout)) {
            Some(IoGuard { lock: self })
        } else {
            None
        }
    }

    /// Take the lock only if nobody holds or waits for it.
    pub fn try_acquire(&self) -> Option<IoGuard<'_>> {
        let mut tickets = lock(&self.tickets);
        if tickets.next != tickets.serving {
            return None;
        }
        tickets.next += 1;
        Some(IoGuard { lock: self })
    }

    /// Acquire without a guard; must be paired with [`IoLock::release_detached`].
    pub fn acquire_detached(&self) {
        self.wait_for_turn(None);
    }

    /// Release a lock taken with [`IoLock::acquire_detached`].
    pub fn release_detached(&self) {
        self.release();
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        let tickets = lock(&self.tickets);
        tickets.next != tickets.serving
    }

    fn wait_for_turn(&self, deadline: Option<Instant>) -> bool {
        let mut tickets = lock(&self.tickets);
        let ticket = tickets.next;
        tickets.next += 1;

        while tickets.serving != ticket {
            match deadline {
                None => {
                    tickets = self
                        .turn
                        .wait(tickets)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tickets.abandoned.insert(ticket);
                        return false;
                    }
                    tickets = self
                        .turn
                        .wait_timeout(tickets, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        true
    }

    fn release(&self) {
        let mut tickets = lock(&self.tickets);
        if tickets.serving < tickets.next {
            tickets.serving += 1;
        }
        loop {
            let serving = tickets.serving;
            if !tickets.abandoned.remove(&serving) {
                break;
            }
            tickets.serving += 1;
        }
        self.turn.notify_all();
    }
}

impl Drop for IoGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_try_acquire_reports_contention() {
        let io = IoLock::new();
        let guard = io.try_acquire().expect("uncontended");
        assert!(io.is_locked());
        assert!(io.try_acquire().is_none());
        drop(guard);
        assert!(!io.is_locked());
        assert!(io.try_acquire().is_some());
    }

    #[test]
    fn test_detached_pair() {
        let io = IoLock::new();
        io.acquire_detached();
        assert!(io.acquire_timeout(Duration::from_millis(20)).is_none());
        io.release_detached();
        assert!(io.acquire_timeout(Duration::from_millis(20)).is_some());
    }

    #[test]
    fn test_fifo_admission() {
        let io = Arc::new(IoLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let guard = io.acquire();

        let mut handles = Vec::new();
        for n in 0..4 {
            let io = Arc::clone(&io);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let _g = io.acquire();
                lock(&order).push(n);
            }));
            // Let each waiter take its ticket before the next one arrives.
            thread::sleep(Duration::from_millis(20));
        }

        drop(guard);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock(&order), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_timed_out_waiter_does_not_wedge_queue() {
        let io = Arc::new(IoLock::new());
        let guard = io.acquire();

        let waiter = {
            let io = Arc::clone(&io);
            thread::spawn(move || io.acquire_timeout(Duration::from_millis(10)).is_some())
        };
        assert!(!waiter.join().unwrap());

        let late = {
            let io = Arc::clone(&io);
            thread::spawn(move || io.acquire_timeout(Duration::from_secs(2)).is_some())
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(late.join().unwrap());
    }
}
