//! A re-entrant readers-writer lock with upgrade and downgrade.
//!
//! This solves the "second readers-writers problem" (no writer starvation):
//! many readers may share the lock, a writer gets exclusive access, and a
//! waiting writer blocks new readers from entering. On top of the classic
//! construction (a "light switch" of readers holding a writer-blocking lock,
//! plus a reader-blocking lock that a pending writer holds) this
//! implementation adds:
//!
//! * re-entrancy for both read and write acquisitions on the same thread;
//! * upgrade: a thread holding read locks may acquire the write lock (the
//!   read hold is released for the duration of the wait, so another writer
//!   may slip in between);
//! * downgrade: when an upgraded thread releases its last write hold, its
//!   original read hold is restored without a gap.
//!
//! Per-thread state is the triple `(read, write, ignored)` where `ignored`
//! counts read acquisitions made while the thread already held the write
//! lock (tracked, but not actually acquired). The state lives in a map keyed
//! by [`ThreadId`]; only the owning thread ever mutates its entry, so the
//! map's mutex is held only for the copy in and out, never across a blocking
//! wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// A non-reentrant binary lock supporting acquisition deadlines.
///
/// `std::sync::Mutex` has no timed acquire, so the three primitive locks
/// underneath [`RwLock`] are built from a flag and a condvar.
struct RawLock {
    locked: Mutex<bool>,
    cond: Condvar,
}

impl RawLock {
    const fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Acquires the lock, waiting until *deadline* if given. Returns false
    /// if the deadline passed without the lock becoming available.
    fn acquire(&self, deadline: Option<Instant>) -> bool {
        let mut locked = self
            .locked
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if !*locked {
                *locked = true;
                return true;
            }
            match deadline {
                None => {
                    locked = self
                        .cond
                        .wait(locked)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    locked = self
                        .cond
                        .wait_timeout(locked, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn release(&self) {
        let mut locked = self
            .locked
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        debug_assert!(*locked, "released an unacquired lock");
        *locked = false;
        self.cond.notify_one();
    }
}

/// An auxiliary "light switch": the first thread to acquire the switch also
/// acquires the lock associated with it, and the last thread to release the
/// switch releases that lock.
///
/// The counter is the number of distinct threads currently holding the
/// switch. It is only ever read or written under `mutex`, which is itself a
/// [`RawLock`] so that acquisition deadlines propagate.
struct LightSwitch {
    counter: AtomicUsize,
    mutex: RawLock,
}

impl LightSwitch {
    const fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            mutex: RawLock::new(),
        }
    }

    fn acquire(&self, lock: &RawLock, deadline: Option<Instant>) -> bool {
        if !self.mutex.acquire(deadline) {
            return false;
        }
        let count = self.counter.load(Ordering::Relaxed) + 1;
        let ok = if count == 1 {
            if lock.acquire(deadline) {
                self.counter.store(1, Ordering::Relaxed);
                true
            } else {
                self.counter.store(0, Ordering::Relaxed);
                false
            }
        } else {
            self.counter.store(count, Ordering::Relaxed);
            true
        };
        self.mutex.release();
        ok
    }

    fn release(&self, lock: &RawLock) {
        self.mutex.acquire(None);
        let count = self.counter.load(Ordering::Relaxed);
        assert!(count > 0, "released an unacquired switch");
        self.counter.store(count - 1, Ordering::Relaxed);
        if count == 1 {
            lock.release();
        }
        self.mutex.release();
    }

    /// Registers a single external holder without touching the underlying
    /// lock. Used on downgrade: the caller still holds the write-blocker, so
    /// the switch cannot acquire it normally; instead the caller hands its
    /// hold over to the switch as if one reader had acquired it.
    fn hand_over(&self) {
        self.mutex.acquire(None);
        let count = self.counter.load(Ordering::Relaxed);
        assert!(count == 0, "upgraders and readers co-existing");
        self.counter.store(1, Ordering::Relaxed);
        self.mutex.release();
    }
}

/// Per-thread acquisition counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ThreadState {
    read: usize,
    write: usize,
    ignored: usize,
}

impl ThreadState {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The re-entrant readers-writer lock.
///
/// [`read`](Self::read) and [`write`](Self::write) return RAII guards;
/// [`try_read_for`](Self::try_read_for) and
/// [`try_write_for`](Self::try_write_for) bound the wait. The deadline is
/// computed once from a monotonic clock and threaded through every nested
/// acquisition.
pub struct RwLock {
    block_writers: RawLock,
    block_readers: RawLock,
    read_switch: LightSwitch,
    states: Mutex<HashMap<ThreadId, ThreadState>>,
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLock").finish_non_exhaustive()
    }
}

impl RwLock {
    pub fn new() -> Self {
        Self {
            block_writers: RawLock::new(),
            block_readers: RawLock::new(),
            read_switch: LightSwitch::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> ThreadState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&thread::current().id())
            .copied()
            .unwrap_or_default()
    }

    fn update_state(&self, f: impl FnOnce(&mut ThreadState)) {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = thread::current().id();
        let state = states.entry(id).or_default();
        f(state);
        if state.is_empty() {
            states.remove(&id);
        }
    }

    /// Acquires a shared read hold, blocking until *deadline* (forever when
    /// `None`). Returns whether the hold was obtained.
    fn acquire_read(&self, deadline: Option<Instant>) -> bool {
        let state = self.state();
        if state.write > 0 {
            // This thread already holds the write lock: count the read
            // acquisition but do not actually take anything.
            self.update_state(|s| s.ignored += 1);
            return true;
        }
        if state.read > 0 {
            // Re-entrant read. Counting instead of re-acquiring avoids
            // deadlock when a pending writer holds block_readers while this
            // thread still needs nested reads to finish and release.
            self.update_state(|s| s.read += 1);
            return true;
        }
        // block_readers is only ever held by a pending or active writer;
        // bouncing off it here is what prevents writer starvation.
        if !self.block_readers.acquire(deadline) {
            return false;
        }
        self.block_readers.release();
        if !self.read_switch.acquire(&self.block_writers, deadline) {
            return false;
        }
        self.update_state(|s| s.read = 1);
        true
    }

    fn release_read(&self) {
        let state = self.state();
        if state.write > 0 {
            assert!(state.ignored > 0, "released read before releasing write");
            self.update_state(|s| s.ignored -= 1);
            return;
        }
        assert!(state.read > 0, "released read too many times");
        self.update_state(|s| s.read -= 1);
        if state.read > 1 {
            return;
        }
        self.read_switch.release(&self.block_writers);
    }

    /// Acquires the exclusive write hold, blocking until *deadline*. A
    /// thread holding read locks is upgraded: its hold on the read switch is
    /// released for the duration of the wait and restored if the wait fails.
    fn acquire_write(&self, deadline: Option<Instant>) -> bool {
        let state = self.state();
        if state.write > 0 {
            self.update_state(|s| s.write += 1);
            return true;
        }
        if state.read > 0 {
            // Upgrade: drop the hold on the read switch while keeping the
            // thread's read count intact, then queue as a writer.
            assert!(state.ignored == 0, "double upgrade");
            self.read_switch.release(&self.block_writers);
        }
        if !self.block_readers.acquire(deadline) {
            if state.read > 0 {
                self.read_switch.acquire(&self.block_writers, None);
            }
            return false;
        }
        // The read switch holds block_writers whenever at least one reader
        // is inside; this wait is what drains the readers out.
        if !self.block_writers.acquire(deadline) {
            self.block_readers.release();
            if state.read > 0 {
                self.read_switch.acquire(&self.block_writers, None);
            }
            return false;
        }
        self.update_state(|s| s.write = 1);
        true
    }

    fn release_write(&self) {
        let state = self.state();
        assert!(state.write > 0, "released write too many times");
        self.update_state(|s| s.write -= 1);
        if state.write > 1 {
            return;
        }
        if state.read > 0 {
            // Downgrade: this thread upgraded from reader to writer and is
            // now returning to reader. Hand the write-blocker over to the
            // read switch as a single external holder; the counter is the
            // number of distinct holding threads, not this thread's
            // re-entrant read count.
            assert!(state.ignored == 0, "released write before releasing read");
            self.read_switch.hand_over();
            self.block_readers.release();
            return;
        }
        self.block_readers.release();
        self.block_writers.release();
    }

    /// Acquires a shared read hold, blocking indefinitely.
    pub fn read(&self) -> RwLockReadGuard<'_> {
        let ok = self.acquire_read(None);
        debug_assert!(ok);
        RwLockReadGuard { lock: self }
    }

    /// Acquires a shared read hold, giving up after *timeout*.
    pub fn try_read_for(&self, timeout: Duration) -> Option<RwLockReadGuard<'_>> {
        self.acquire_read(Some(Instant::now() + timeout))
            .then_some(RwLockReadGuard { lock: self })
    }

    /// Acquires the exclusive write hold, blocking indefinitely.
    pub fn write(&self) -> RwLockWriteGuard<'_> {
        let ok = self.acquire_write(None);
        debug_assert!(ok);
        RwLockWriteGuard { lock: self }
    }

    /// Acquires the exclusive write hold, giving up after *timeout*.
    pub fn try_write_for(&self, timeout: Duration) -> Option<RwLockWriteGuard<'_>> {
        self.acquire_write(Some(Instant::now() + timeout))
            .then_some(RwLockWriteGuard { lock: self })
    }
}

/// RAII guard for a read hold. Releasing happens on drop; holds must be
/// released in the reverse order of acquisition when mixed with writes.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RwLockReadGuard<'a> {
    lock: &'a RwLock,
}

impl Drop for RwLockReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// RAII guard for the write hold.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RwLockWriteGuard<'a> {
    lock: &'a RwLock,
}

impl Drop for RwLockWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
