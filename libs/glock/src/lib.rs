// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A reentrant mutual-exclusion lock.
//!
//! [`RawReentrantLock`] may be acquired repeatedly by the thread that already
//! owns it, while excluding every other thread. Ownership is tracked with an
//! owner slot, a count of pending acquisitions across all threads and an
//! owner-private nesting depth, on top of any [`lock_api::RawMutex`] that does
//! the actual blocking. The calling thread is identified through
//! [`lock_api::GetThreadId`].
//!
//! [`remutex::ReentrantMutex`] wraps the raw lock around a value and hands out
//! RAII guards.
//!
//! # Features
//!
//! - `std` provides [`LocalThreadId`] and the [`ReentrantLock`] /
//!   [`ReentrantMutex`] aliases.
//! - `parking_lot` (default) makes `parking_lot::RawMutex` the default
//!   underlying primitive. Otherwise [`SpinRawMutex`] is used.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod loom;
mod raw;
pub mod remutex;
mod spin;
#[cfg(any(test, feature = "std"))]
mod thread_id;

pub use raw::RawReentrantLock;
pub use spin::SpinRawMutex;
#[cfg(any(test, feature = "std"))]
pub use thread_id::LocalThreadId;

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        /// The primitive used by [`ReentrantLock`] and [`ReentrantMutex`].
        pub type DefaultRawMutex = SpinRawMutex;
    } else if #[cfg(feature = "parking_lot")] {
        /// The primitive used by [`ReentrantLock`] and [`ReentrantMutex`].
        pub type DefaultRawMutex = parking_lot::RawMutex;
    } else {
        /// The primitive used by `ReentrantLock` and `ReentrantMutex`.
        pub type DefaultRawMutex = SpinRawMutex;
    }
}

/// A reentrant lock on the default primitive, identifying threads by [`LocalThreadId`].
#[cfg(any(test, feature = "std"))]
pub type ReentrantLock = RawReentrantLock<DefaultRawMutex, LocalThreadId>;

/// A reentrant mutex protecting a `T`, built on [`ReentrantLock`].
#[cfg(any(test, feature = "std"))]
pub type ReentrantMutex<T> = remutex::ReentrantMutex<DefaultRawMutex, LocalThreadId, T>;

/// RAII guard of a [`ReentrantMutex`].
#[cfg(any(test, feature = "std"))]
pub type ReentrantMutexGuard<'a, T> =
    remutex::ReentrantMutexGuard<'a, DefaultRawMutex, LocalThreadId, T>;

/// Marker type which indicates that the Guard type for a lock is not `Send`.
#[expect(dead_code, reason = "inner pointer is unused")]
pub(crate) struct GuardNoSend(*mut ());
// Safety: the marker carries no data, it only exists to opt guards out of `Send`.
unsafe impl Sync for GuardNoSend {}

#[cfg(test)]
macro_rules! assert_not_send {
    ($x:ty) => {
        const _: fn() -> () = || {
            struct Check<T: ?Sized>(T);
            trait AmbiguousIfImpl<A> {
                fn some_item() {}
            }

            impl<T: ?Sized> AmbiguousIfImpl<()> for Check<T> {}
            impl<T: ?Sized + Send> AmbiguousIfImpl<u8> for Check<T> {}

            <Check<$x> as AmbiguousIfImpl<_>>::some_item()
        };
    };
}
#[cfg(test)]
pub(crate) use assert_not_send;
