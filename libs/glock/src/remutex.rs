// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A data-carrying reentrant mutex generic over the underlying primitive and
//! the source of thread ids.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;

use lock_api::{GetThreadId, RawMutex, RawMutexTimed};

use crate::loom::cell::UnsafeCell;
use crate::loom::loom_const_fn;
use crate::{GuardNoSend, RawReentrantLock};

/// A mutex which can be recursively locked by a single thread.
///
/// There are two relevant differences to a regular mutex:
/// 1. Locking multiple times from the same thread works instead of deadlocking.
/// 2. [`ReentrantMutexGuard`] does not give mutable references to the locked
///    data. Use a [`RefCell`](core::cell::RefCell) if you need this.
///
/// See [`RawReentrantLock`] for how ownership is tracked.
pub struct ReentrantMutex<R, G, T: ?Sized> {
    raw: RawReentrantLock<R, G>,
    data: UnsafeCell<T>,
}

/// An RAII implementation of a "scoped lock" of a reentrant mutex. When this
/// structure is dropped (falls out of scope), one level of the lock is released.
///
/// The data protected by the mutex can be accessed through this guard via its
/// `Deref` implementation.
#[clippy::has_significant_drop]
#[must_use = "if unused the ReentrantMutex will immediately unlock"]
pub struct ReentrantMutexGuard<'a, R: RawMutex, G: GetThreadId, T: ?Sized> {
    remutex: &'a ReentrantMutex<R, G, T>,
    waited: bool,
    marker: PhantomData<(&'a T, GuardNoSend)>,
}

// Safety: the data is only reachable through the lock, and sending the mutex
// sends the data along with it.
unsafe impl<R: RawMutex + Send, G: GetThreadId + Send, T: ?Sized + Send> Send
    for ReentrantMutex<R, G, T>
{
}
// Safety: guards only hand out shared references and only to the owning
// thread, so sharing the mutex only ever moves `T` access between threads.
unsafe impl<R: RawMutex + Sync, G: GetThreadId + Sync, T: ?Sized + Send> Sync
    for ReentrantMutex<R, G, T>
{
}

impl<R: RawMutex, G: GetThreadId, T> ReentrantMutex<R, G, T> {
    loom_const_fn! {
        /// Creates a new reentrant mutex in an unlocked state ready for use.
        #[inline]
        pub const fn new(val: T) -> ReentrantMutex<R, G, T> {
            ReentrantMutex {
                raw: RawReentrantLock::new(),
                data: UnsafeCell::new(val),
            }
        }
    }

    /// Consumes this mutex, returning the underlying data.
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<R: RawMutex, G: GetThreadId, T: ?Sized> ReentrantMutex<R, G, T> {
    /// Creates a new `ReentrantMutexGuard` without checking if the lock is held.
    ///
    /// # Safety
    ///
    /// This method must only be called if the thread logically holds one level
    /// of the lock that no other guard accounts for, e.g. after forgetting a
    /// guard with `mem::forget`.
    #[inline]
    pub unsafe fn make_guard_unchecked(&self) -> ReentrantMutexGuard<'_, R, G, T> {
        ReentrantMutexGuard {
            remutex: self,
            waited: false,
            marker: PhantomData,
        }
    }

    #[inline]
    fn guard(&self, waited: bool) -> ReentrantMutexGuard<'_, R, G, T> {
        ReentrantMutexGuard {
            remutex: self,
            waited,
            marker: PhantomData,
        }
    }

    /// Acquires the mutex, blocking the current thread until it is able to do so.
    ///
    /// If the mutex is already held by the current thread this increments the
    /// nesting depth and returns immediately. The returned guard releases one
    /// level when dropped.
    ///
    /// # Panics
    ///
    /// Panics if the nesting depth overflows a `usize`.
    #[track_caller]
    #[inline]
    pub fn lock(&self) -> ReentrantMutexGuard<'_, R, G, T> {
        let waited = self.raw.lock();
        self.guard(waited)
    }

    /// Attempts to acquire this mutex without blocking.
    ///
    /// Returns `None` if another thread holds (or is in the middle of acquiring
    /// or releasing) the mutex.
    ///
    /// # Panics
    ///
    /// Panics if the nesting depth overflows a `usize`.
    #[track_caller]
    #[inline]
    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, R, G, T>> {
        self.raw.try_lock().then(|| self.guard(false))
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `ReentrantMutex` mutably, no actual locking
    /// needs to take place.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.with_mut(|data| {
            // Safety: the exclusive borrow of the mutex rules out any guard.
            unsafe { &mut *data }
        })
    }

    /// Checks whether the mutex is currently locked.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Checks whether the mutex is currently held by the current thread.
    #[inline]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.raw.is_owned_by_current_thread()
    }

    /// Forcibly releases one level of the mutex.
    ///
    /// This is useful when combined with `mem::forget` to hold a lock without
    /// the need to maintain a `ReentrantMutexGuard` object alive, for example
    /// when dealing with FFI.
    ///
    /// # Safety
    ///
    /// This method must only be called if the current thread logically owns a
    /// `ReentrantMutexGuard` but that guard has been discarded using `mem::forget`.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not own the mutex.
    #[inline]
    #[track_caller]
    pub unsafe fn force_unlock(&self) {
        self.raw.unlock();
    }
}

impl<R: RawMutexTimed, G: GetThreadId, T: ?Sized> ReentrantMutex<R, G, T> {
    /// Attempts to acquire this mutex until `timeout` has elapsed.
    ///
    /// # Panics
    ///
    /// Panics if the nesting depth overflows a `usize`.
    #[track_caller]
    #[inline]
    pub fn try_lock_for(&self, timeout: R::Duration) -> Option<ReentrantMutexGuard<'_, R, G, T>> {
        self.raw.try_lock_for(timeout).map(|waited| self.guard(waited))
    }

    /// Attempts to acquire this mutex until `deadline` is reached.
    ///
    /// # Panics
    ///
    /// Panics if the nesting depth overflows a `usize`.
    #[track_caller]
    #[inline]
    pub fn try_lock_until(
        &self,
        deadline: R::Instant,
    ) -> Option<ReentrantMutexGuard<'_, R, G, T>> {
        self.raw.try_lock_until(deadline).map(|waited| self.guard(waited))
    }
}

impl<R: RawMutex, G: GetThreadId, T: Default> Default for ReentrantMutex<R, G, T> {
    #[inline]
    fn default() -> Self {
        ReentrantMutex::new(T::default())
    }
}

impl<R: RawMutex, G: GetThreadId, T> From<T> for ReentrantMutex<R, G, T> {
    #[inline]
    fn from(t: T) -> Self {
        ReentrantMutex::new(t)
    }
}

impl<R: RawMutex, G: GetThreadId, T: ?Sized + fmt::Debug> fmt::Debug for ReentrantMutex<R, G, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(guard) = self.try_lock() {
            f.debug_struct("ReentrantMutex")
                .field("data", &&*guard)
                .finish()
        } else {
            struct LockedPlaceholder;
            impl fmt::Debug for LockedPlaceholder {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("<locked>")
                }
            }

            f.debug_struct("ReentrantMutex")
                .field("data", &LockedPlaceholder)
                .finish()
        }
    }
}

// Safety: a shared guard only exposes `&T`, which is fine to share when `T: Sync`.
unsafe impl<'a, R: RawMutex + Sync + 'a, G: GetThreadId + Sync + 'a, T: ?Sized + Sync + 'a> Sync
    for ReentrantMutexGuard<'a, R, G, T>
{
}

impl<'a, R: RawMutex + 'a, G: GetThreadId + 'a, T: ?Sized + 'a> ReentrantMutexGuard<'a, R, G, T> {
    /// Returns a reference to the original `ReentrantMutex` object.
    pub fn remutex(s: &Self) -> &'a ReentrantMutex<R, G, T> {
        s.remutex
    }

    /// Returns `true` if acquiring this guard had to wait for another thread
    /// to release the mutex.
    pub fn waited(s: &Self) -> bool {
        s.waited
    }
}

impl<'a, R: RawMutex + 'a, G: GetThreadId + 'a, T: ?Sized + 'a> Deref
    for ReentrantMutexGuard<'a, R, G, T>
{
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.remutex.data.with(|data| {
            // Safety: the guard holds the lock, and no guard hands out `&mut T`.
            unsafe { &*data }
        })
    }
}

impl<'a, R: RawMutex + 'a, G: GetThreadId + 'a, T: ?Sized + 'a> Drop
    for ReentrantMutexGuard<'a, R, G, T>
{
    #[inline]
    fn drop(&mut self) {
        self.remutex.raw.unlock();
    }
}

impl<'a, R: RawMutex + 'a, G: GetThreadId + 'a, T: fmt::Debug + ?Sized + 'a> fmt::Debug
    for ReentrantMutexGuard<'a, R, G, T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<'a, R: RawMutex + 'a, G: GetThreadId + 'a, T: fmt::Display + ?Sized + 'a> fmt::Display
    for ReentrantMutexGuard<'a, R, G, T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}
