// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::Cell;
use core::fmt;

use lock_api::{GetThreadId, RawMutex, RawMutexTimed};

use crate::loom::loom_const_fn;
use crate::loom::sync::atomic::{AtomicUsize, Ordering};

/// A lock which can be recursively acquired by the thread that owns it.
///
/// The lock is a small state machine layered over a plain [`RawMutex`]:
///
/// - `owner` holds the id of the owning thread, or `0` when the lock is free.
///   Only the thread currently holding the inner mutex writes a non-zero id,
///   so a thread reading its own id back knows it is the owner.
/// - `pending` counts acquisitions issued minus releases completed across all
///   threads, nested re-acquisitions included. It only drops to zero after the
///   inner mutex has been released.
/// - `depth` counts the holds of the current owner. It is only ever touched by
///   the owner and therefore needs no synchronization.
///
/// The inner mutex is locked once when a thread becomes the owner and unlocked
/// once when that thread releases its outermost hold, no matter how deeply the
/// owner nested in between.
///
/// Threads are identified through `G`, which must hand out ids that are never
/// zero and stay stable for the lifetime of a thread.
pub struct RawReentrantLock<R, G> {
    owner: AtomicUsize,
    pending: AtomicUsize,
    depth: Cell<usize>,
    inner: R,
    get_thread_id: G,
    /// Bumped on every change of ownership. Loom cannot see the ordering
    /// provided by `inner`, so the model gets it from here instead.
    #[cfg(loom)]
    handoff: AtomicUsize,
}

// Safety: `owner` and `pending` are atomics. `depth` is only accessed by the
// thread whose id is stored in `owner`, and ownership changes hands through the
// inner mutex, which orders the previous owner's accesses before the next one's.
unsafe impl<R: RawMutex + Sync, G: GetThreadId + Sync> Sync for RawReentrantLock<R, G> {}

impl<R: RawMutex, G: GetThreadId> RawReentrantLock<R, G> {
    loom_const_fn! {
        /// Creates a new reentrant lock in the free state.
        #[inline]
        #[must_use]
        pub const fn new() -> Self {
            Self {
                owner: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
                depth: Cell::new(0),
                inner: R::INIT,
                get_thread_id: G::INIT,
                #[cfg(loom)]
                handoff: AtomicUsize::new(0),
            }
        }
    }

    #[inline]
    fn current_thread_id(&self) -> usize {
        self.get_thread_id.nonzero_thread_id().get()
    }

    /// Acquires the lock, blocking the current thread until it is able to do so.
    ///
    /// If the current thread already owns the lock this only bumps the nesting
    /// depth and returns immediately. Every successful call must be paired with
    /// exactly one [`unlock`](Self::unlock) from the same thread.
    ///
    /// Returns `true` if the call had to wait for another thread to release the
    /// lock first.
    ///
    /// # Panics
    ///
    /// Panics if the nesting depth overflows a `usize`.
    #[track_caller]
    #[inline]
    pub fn lock(&self) -> bool {
        let id = self.current_thread_id();

        // Only this thread can store its own id, so the check needs no
        // ordering. The depth is bumped before `pending` so an overflow
        // leaves the counters untouched.
        if self.owner.load(Ordering::Relaxed) == id {
            self.reenter();
            self.pending.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let pending = self.pending.fetch_add(1, Ordering::Acquire);

        // A fresh acquirer normally finds the inner mutex free, but a thread
        // that queued up behind us in `pending` may still beat us to it.
        let waited = if pending == 0 && self.inner.try_lock() {
            false
        } else {
            log::trace!("reentrant lock is contended, waiting (pending acquisitions: {pending})");
            self.inner.lock();
            true
        };

        self.become_owner(id);
        waited
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Reentrant attempts by the owner always succeed. Otherwise this makes at
    /// most one attempt on the inner mutex, and only if no other thread is
    /// holding, acquiring or releasing the lock. A failed attempt leaves the
    /// lock untouched.
    ///
    /// # Panics
    ///
    /// Panics if the nesting depth overflows a `usize`.
    #[track_caller]
    #[inline]
    pub fn try_lock(&self) -> bool {
        let id = self.current_thread_id();
        let owner = self.owner.load(Ordering::Relaxed);

        if owner == id {
            self.reenter();
            self.pending.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if owner != 0 {
            return false;
        }

        if self
            .pending
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        if self.inner.try_lock() {
            self.become_owner(id);
            true
        } else {
            // a blocking acquirer arrived after our increment and got the inner
            // mutex first.
            self.pending.fetch_sub(1, Ordering::Release);
            false
        }
    }

    /// Releases one level of ownership held by the current thread.
    ///
    /// Releasing the outermost hold frees the lock, or hands it to a thread
    /// blocked in [`lock`](Self::lock), which then re-establishes ownership
    /// itself.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not own the lock, which includes
    /// unlocking a lock that was never locked and unlocking more often than it
    /// was locked. Also panics if the lock's bookkeeping is found to be
    /// corrupted.
    #[track_caller]
    #[inline]
    pub fn unlock(&self) {
        let id = self.current_thread_id();
        if self.owner.load(Ordering::Relaxed) != id {
            fatal("unlocking non-owned lock");
        }

        let Some(depth) = self.depth.get().checked_sub(1) else {
            fatal("unbalanced unlock of reentrant lock");
        };
        self.depth.set(depth);

        if depth == 0 {
            self.owner.store(0, Ordering::Relaxed);
            #[cfg(loom)]
            self.handoff.fetch_add(1, Ordering::AcqRel);
            // Safety: we are the owner and this was our outermost hold, which
            // is exactly when the inner mutex was locked on our behalf.
            unsafe { self.inner.unlock() };
        }

        // Must come after the owner bookkeeping above: a fresh acquirer that
        // observes zero pending acquisitions relies on the lock being fully
        // released.
        let pending = self.pending.fetch_sub(1, Ordering::Release);
        if pending == 0 {
            fatal("pending acquisition count underflow");
        }
        if depth == 0 && pending > 1 {
            log::trace!("handing reentrant lock over ({} acquisitions pending)", pending - 1);
        }
    }

    /// Returns `true` if some thread currently owns the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != 0
    }

    /// Returns `true` if the current thread owns the lock.
    #[inline]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == self.current_thread_id()
    }

    #[inline]
    #[track_caller]
    fn reenter(&self) {
        let Some(depth) = self.depth.get().checked_add(1) else {
            fatal("reentrant lock depth overflow");
        };
        self.depth.set(depth);
    }

    #[inline]
    fn become_owner(&self, id: usize) {
        // An RMW always reads the latest hand-off, which synchronizes with the
        // release that let us in.
        #[cfg(loom)]
        self.handoff.fetch_add(1, Ordering::AcqRel);
        self.owner.store(id, Ordering::Relaxed);
        debug_assert_eq!(self.depth.get(), 0, "previous owner left a non-zero depth");
        self.depth.set(1);
    }
}

impl<R: RawMutexTimed, G: GetThreadId> RawReentrantLock<R, G> {
    /// Attempts to acquire the lock until `timeout` has elapsed.
    ///
    /// Returns `None` if the lock could not be acquired in time, otherwise
    /// `Some(waited)` with the same meaning as the result of
    /// [`lock`](Self::lock). Reentrant calls by the owner succeed immediately.
    ///
    /// # Panics
    ///
    /// Panics if the nesting depth overflows a `usize`.
    #[track_caller]
    #[inline]
    pub fn try_lock_for(&self, timeout: R::Duration) -> Option<bool> {
        self.lock_timed(|| self.inner.try_lock_for(timeout))
    }

    /// Attempts to acquire the lock until `deadline` is reached.
    ///
    /// See [`try_lock_for`](Self::try_lock_for).
    ///
    /// # Panics
    ///
    /// Panics if the nesting depth overflows a `usize`.
    #[track_caller]
    #[inline]
    pub fn try_lock_until(&self, deadline: R::Instant) -> Option<bool> {
        self.lock_timed(|| self.inner.try_lock_until(deadline))
    }

    #[track_caller]
    fn lock_timed(&self, lock_inner: impl FnOnce() -> bool) -> Option<bool> {
        let id = self.current_thread_id();

        if self.owner.load(Ordering::Relaxed) == id {
            self.reenter();
            self.pending.fetch_add(1, Ordering::Relaxed);
            return Some(false);
        }

        let pending = self.pending.fetch_add(1, Ordering::Acquire);

        if pending == 0 && self.inner.try_lock() {
            self.become_owner(id);
            return Some(false);
        }

        if lock_inner() {
            self.become_owner(id);
            Some(true)
        } else {
            log::trace!("timed out waiting for reentrant lock");
            self.pending.fetch_sub(1, Ordering::Release);
            None
        }
    }
}

impl<R: RawMutex, G: GetThreadId> Default for RawReentrantLock<R, G> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<R, G> fmt::Debug for RawReentrantLock<R, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawReentrantLock")
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cold]
#[inline(never)]
#[track_caller]
fn fatal(msg: &'static str) -> ! {
    panic!("{msg}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom;
    use crate::loom::sync::Arc;
    use crate::loom::thread;
    use crate::{LocalThreadId, ReentrantLock, SpinRawMutex};

    /// `(owner, pending, depth)`
    ///
    /// Only call this from the owner, or while no other thread can touch the lock.
    fn counters<R, G>(l: &RawReentrantLock<R, G>) -> (usize, usize, usize) {
        (
            l.owner.load(Ordering::Relaxed),
            l.pending.load(Ordering::Relaxed),
            l.depth.get(),
        )
    }

    fn assert_free<R, G>(l: &RawReentrantLock<R, G>) {
        assert_eq!(counters(l), (0, 0, 0), "{l:?}");
    }

    fn me() -> usize {
        LocalThreadId.nonzero_thread_id().get()
    }

    #[test_log::test]
    #[cfg_attr(loom, ignore = "not concurrency-relevant")]
    fn reentrance() {
        let l = ReentrantLock::new();
        assert_free(&l);

        assert!(!l.lock());
        assert!(!l.lock());
        assert_eq!(counters(&l), (me(), 2, 2));
        assert!(l.is_owned_by_current_thread());

        l.unlock();
        assert!(l.is_locked());
        assert_eq!(counters(&l), (me(), 1, 1));

        l.unlock();
        assert!(!l.is_locked());
        assert_free(&l);
    }

    #[test]
    #[cfg_attr(loom, ignore = "not concurrency-relevant")]
    fn reentrance_try() {
        let l = ReentrantLock::new();

        assert!(l.try_lock());
        assert!(l.try_lock());
        assert_eq!(counters(&l), (me(), 2, 2));

        l.unlock();
        l.unlock();
        assert_free(&l);
    }

    #[test]
    #[cfg_attr(loom, ignore = "not concurrency-relevant")]
    fn mixed_nesting() {
        let l = RawReentrantLock::<SpinRawMutex, LocalThreadId>::new();

        assert!(l.try_lock());
        assert!(!l.lock());
        assert!(l.try_lock());
        assert_eq!(counters(&l), (me(), 3, 3));

        for _ in 0..3 {
            l.unlock();
        }
        assert_free(&l);

        // and it can be acquired again afterwards
        assert!(!l.lock());
        l.unlock();
        assert_free(&l);
    }

    #[test]
    #[cfg_attr(loom, ignore = "not concurrency-relevant")]
    #[should_panic(expected = "unlocking non-owned lock")]
    fn unlock_never_locked() {
        let l = ReentrantLock::new();
        l.unlock();
    }

    #[test]
    #[cfg_attr(loom, ignore = "not concurrency-relevant")]
    #[should_panic(expected = "unlocking non-owned lock")]
    fn unlock_more_than_locked() {
        let l = ReentrantLock::new();
        l.lock();
        l.lock();
        l.unlock();
        l.unlock();
        l.unlock();
    }

    #[test]
    #[cfg(not(loom))]
    fn unlock_from_other_thread() {
        let l = ReentrantLock::new();
        l.lock();

        std::thread::scope(|s| {
            let res = s.spawn(|| l.unlock()).join();
            assert!(res.is_err(), "unlock from a non-owner must panic");
        });

        // the failed unlock must not have touched anything
        assert_eq!(counters(&l), (me(), 1, 1));
        l.unlock();
        assert_free(&l);
    }

    #[test]
    #[cfg(not(loom))]
    fn try_lock_fails_when_held_elsewhere() {
        let l = ReentrantLock::new();
        assert!(!l.lock());

        std::thread::scope(|s| {
            s.spawn(|| {
                assert!(l.is_locked());
                assert!(!l.is_owned_by_current_thread());
                assert!(!l.try_lock());
                assert!(!l.try_lock());
            });
        });

        assert_eq!(counters(&l), (me(), 1, 1));
        l.unlock();
        assert_free(&l);
    }

    /// Thread A locks twice, thread B blocks until A has released both holds,
    /// then acquires with `waited == true`.
    #[cfg(not(loom))]
    #[test_log::test]
    fn contended_lock_waits_for_outermost_unlock() {
        use core::sync::atomic::AtomicBool;
        use std::time::Duration;

        let l = ReentrantLock::new();
        let acquired = AtomicBool::new(false);

        assert!(!l.lock());
        assert!(!l.lock());

        std::thread::scope(|s| {
            let b = s.spawn(|| {
                let waited = l.lock();
                acquired.store(true, Ordering::SeqCst);
                assert!(l.is_owned_by_current_thread());
                l.unlock();
                waited
            });

            std::thread::sleep(Duration::from_millis(100));
            assert!(!acquired.load(Ordering::SeqCst), "not locked");

            l.unlock();
            std::thread::sleep(Duration::from_millis(100));
            assert!(!acquired.load(Ordering::SeqCst), "released by nested unlock");

            l.unlock();
            assert!(b.join().unwrap(), "second thread did not report waiting");
        });

        assert!(acquired.load(Ordering::SeqCst));
        assert_free(&l);
    }

    #[test]
    #[cfg(all(not(loom), feature = "parking_lot"))]
    fn timed_lock_times_out() {
        use std::time::Duration;

        let l = RawReentrantLock::<parking_lot::RawMutex, LocalThreadId>::new();
        assert!(!l.lock());
        assert_eq!(l.try_lock_for(Duration::from_millis(10)), Some(false));

        std::thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(l.try_lock_for(Duration::from_millis(50)), None);
            });
        });
        assert_eq!(counters(&l), (me(), 2, 2));

        l.unlock();
        l.unlock();
        assert_free(&l);

        std::thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(l.try_lock_for(Duration::from_millis(50)), Some(false));
                l.unlock();
            });
        });
        assert_free(&l);
    }

    #[test]
    #[cfg(all(not(loom), feature = "parking_lot"))]
    fn timed_lock_waits_for_release() {
        use std::time::Duration;

        let l = RawReentrantLock::<parking_lot::RawMutex, LocalThreadId>::new();
        l.lock();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let res = l.try_lock_for(Duration::from_secs(10));
                l.unlock();
                res
            });

            std::thread::sleep(Duration::from_millis(100));
            l.unlock();
            assert_eq!(waiter.join().unwrap(), Some(true));
        });
        assert_free(&l);
    }

    /// An inner mutex whose `try_lock` can be told to fail while it is free,
    /// the way it does when another thread slips in first.
    struct RefusingRawMutex {
        held: core::sync::atomic::AtomicBool,
        refuse_try: core::sync::atomic::AtomicBool,
    }

    // Safety: `held` is only set by a `lock` or `try_lock` that found it clear.
    // The tests using this never share it between threads.
    unsafe impl RawMutex for RefusingRawMutex {
        const INIT: Self = Self {
            held: core::sync::atomic::AtomicBool::new(false),
            refuse_try: core::sync::atomic::AtomicBool::new(false),
        };

        type GuardMarker = lock_api::GuardSend;

        fn lock(&self) {
            assert!(!self.held.swap(true, Ordering::Relaxed), "would block forever");
        }

        fn try_lock(&self) -> bool {
            !self.refuse_try.load(Ordering::Relaxed) && !self.held.swap(true, Ordering::Relaxed)
        }

        unsafe fn unlock(&self) {
            assert!(self.held.swap(false, Ordering::Relaxed), "unlocked while free");
        }

        fn is_locked(&self) -> bool {
            self.held.load(Ordering::Relaxed)
        }
    }

    fn refusing() -> RawReentrantLock<RefusingRawMutex, LocalThreadId> {
        let l = RawReentrantLock::<RefusingRawMutex, LocalThreadId>::new();
        l.inner.refuse_try.store(true, Ordering::Relaxed);
        l
    }

    #[test]
    #[cfg_attr(loom, ignore = "not concurrency-relevant")]
    fn try_lock_backs_out_when_inner_refuses() {
        let l = refusing();

        assert!(!l.try_lock());
        assert_free(&l);
        assert!(!l.inner.is_locked());

        // a blocking acquisition still gets in afterwards
        assert!(l.lock());
        l.unlock();
        assert_free(&l);
    }

    #[test]
    #[cfg_attr(loom, ignore = "not concurrency-relevant")]
    fn try_lock_fails_while_acquisition_in_flight() {
        let l = RawReentrantLock::<RefusingRawMutex, LocalThreadId>::new();

        // another thread has announced itself but not taken the inner mutex yet
        l.pending.store(1, Ordering::Relaxed);
        assert!(!l.try_lock());
        assert_eq!(counters(&l), (0, 1, 0));
        assert!(!l.inner.is_locked());

        // `lock` does not get the fast path either, and says so
        assert!(l.lock());
        assert_eq!(counters(&l), (me(), 2, 1));
        l.unlock();
        assert_eq!(counters(&l), (0, 1, 0));
        assert!(!l.inner.is_locked());
    }

    #[test_log::test]
    #[cfg_attr(loom, ignore = "not concurrency-relevant")]
    fn lock_reports_waiting_when_fast_path_loses() {
        let l = refusing();

        assert!(l.lock());
        assert_eq!(counters(&l), (me(), 1, 1));
        assert!(l.inner.is_locked());

        // nested acquisitions never go to the inner mutex
        assert!(!l.lock());
        assert!(l.try_lock());
        assert_eq!(counters(&l), (me(), 3, 3));

        for _ in 0..3 {
            l.unlock();
        }
        assert_free(&l);
        assert!(!l.inner.is_locked());
    }

    /// Line of the last `reentrant lock depth overflow` panic.
    #[cfg(not(loom))]
    static OVERFLOW_LINE: std::sync::Mutex<Option<u32>> = std::sync::Mutex::new(None);

    /// Runs `f`, which must panic with a depth overflow, and returns the line
    /// the panic was attributed to.
    #[cfg(not(loom))]
    fn overflow_line<T>(f: impl FnOnce() -> T) -> Option<u32> {
        use std::panic;

        panic::set_hook(Box::new(|info| {
            let payload = info.payload();
            let msg = payload
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| payload.downcast_ref::<&str>().copied());
            if msg == Some("reentrant lock depth overflow") {
                *OVERFLOW_LINE.lock().unwrap() = info.location().map(|loc| loc.line());
            }
        }));
        let res = panic::catch_unwind(panic::AssertUnwindSafe(f));
        drop(panic::take_hook());

        assert!(res.is_err(), "expected a depth overflow");
        OVERFLOW_LINE.lock().unwrap().take()
    }

    /// An overflowing nested acquisition panics at the caller's line and
    /// leaves `pending` as it was.
    #[test]
    #[cfg(not(loom))]
    fn depth_overflow_blames_caller_and_keeps_pending() {
        let l = ReentrantLock::new();
        assert!(!l.lock());
        l.depth.set(usize::MAX);

        let line = line!() + 1;
        assert_eq!(overflow_line(|| l.lock()), Some(line));
        assert_eq!(counters(&l), (me(), 1, usize::MAX));

        let line = line!() + 1;
        assert_eq!(overflow_line(|| l.try_lock()), Some(line));
        assert_eq!(counters(&l), (me(), 1, usize::MAX));

        l.depth.set(1);
        l.unlock();
        assert_free(&l);

        #[cfg(feature = "parking_lot")]
        {
            use std::time::Duration;

            let l = RawReentrantLock::<parking_lot::RawMutex, LocalThreadId>::new();
            assert!(!l.lock());
            l.depth.set(usize::MAX);

            let line = line!() + 1;
            assert_eq!(overflow_line(|| l.try_lock_for(Duration::from_millis(1))), Some(line));
            assert_eq!(counters(&l), (me(), 1, usize::MAX));

            l.depth.set(1);
            l.unlock();
            assert_free(&l);
        }
    }

    proptest::proptest! {
        #[test]
        #[cfg_attr(loom, ignore = "not concurrency-relevant")]
        fn balanced_sequences_restore_counters(ops in proptest::collection::vec(proptest::bool::ANY, 1..64)) {
            let l = ReentrantLock::new();

            for (i, blocking) in ops.iter().enumerate() {
                if *blocking {
                    proptest::prop_assert!(!l.lock());
                } else {
                    proptest::prop_assert!(l.try_lock());
                }
                proptest::prop_assert_eq!(counters(&l), (me(), i + 1, i + 1));
            }

            for remaining in (0..ops.len()).rev() {
                proptest::prop_assert!(l.is_owned_by_current_thread());
                l.unlock();
                if remaining > 0 {
                    proptest::prop_assert_eq!(counters(&l), (me(), remaining, remaining));
                }
            }

            proptest::prop_assert_eq!(counters(&l), (0, 0, 0));
        }
    }

    /// Number of contexts for the stress tests, loom explores every interleaving
    /// so it gets far fewer.
    const CONTEXTS: usize = if cfg!(loom) { 2 } else { 4096 };
    const MAX_DEPTH: usize = if cfg!(loom) { 2 } else { 16 };

    fn depth_for(ctx: usize) -> usize {
        if cfg!(loom) {
            ctx % MAX_DEPTH + 1
        } else {
            rand::random_range(1..=MAX_DEPTH)
        }
    }

    struct Shared {
        lock: ReentrantLock,
        inside: loom::sync::atomic::AtomicBool,
        counted: loom::sync::atomic::AtomicUsize,
    }

    impl Shared {
        fn new() -> Self {
            Self {
                lock: ReentrantLock::new(),
                inside: loom::sync::atomic::AtomicBool::new(false),
                counted: loom::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn critical_section(&self) {
            assert!(
                !self.inside.swap(true, Ordering::AcqRel),
                "two threads inside the lock"
            );
            self.counted.fetch_add(1, Ordering::Relaxed);
            assert!(self.inside.swap(false, Ordering::AcqRel));
        }
    }

    /// Each context nests the lock a random number of times, runs a counted
    /// operation and releases the same number of times.
    #[test]
    fn concurrent() {
        loom::model(|| {
            let shared = Arc::new(Shared::new());

            // spawn in waves so we never run thousands of threads at once
            let wave = if cfg!(loom) { CONTEXTS } else { 64 };
            for start in (0..CONTEXTS).step_by(wave) {
                let threads: Vec<_> = (start..CONTEXTS.min(start + wave))
                    .map(|ctx| {
                        let shared = shared.clone();
                        thread::spawn(move || {
                            let depth = depth_for(ctx);
                            for _ in 0..depth {
                                shared.lock.lock();
                            }
                            shared.critical_section();
                            for _ in 0..depth {
                                shared.lock.unlock();
                            }
                        })
                    })
                    .collect();

                for t in threads {
                    t.join().unwrap();
                }
            }

            assert_eq!(shared.counted.load(Ordering::Relaxed), CONTEXTS);
            assert_free(&shared.lock);
        });
    }

    /// Like [`concurrent`], but contexts first try to get in without blocking and
    /// only fall back to `lock` if none of their attempts succeeded.
    #[test]
    fn concurrent_try() {
        loom::model(|| {
            let shared = Arc::new(Shared::new());
            let threads = if cfg!(loom) { 2 } else { 8 };
            let rounds = CONTEXTS / threads;

            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let shared = shared.clone();
                    thread::spawn(move || {
                        for round in 0..rounds {
                            let attempts = depth_for(t * rounds + round);
                            let mut held = (0..attempts).filter(|_| shared.lock.try_lock()).count();
                            if held == 0 {
                                shared.lock.lock();
                                held = 1;
                            }

                            shared.critical_section();

                            for _ in 0..held {
                                shared.lock.unlock();
                            }

                            #[cfg(loom)]
                            thread::yield_now();
                        }
                    })
                })
                .collect();

            for t in handles {
                t.join().unwrap();
            }

            assert_eq!(shared.counted.load(Ordering::Relaxed), threads * rounds);
            assert_free(&shared.lock);
        });
    }
}
