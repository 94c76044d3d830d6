// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::num::NonZeroUsize;
use core::ptr;

use lock_api::GetThreadId;

/// A unique identifier for the calling thread.
///
/// This is an opaque value that uniquely identifies the calling thread for as
/// long as it is alive. It is *not* human-readable, sequential or stable
/// across runs, and may be reused once the thread has exited.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalThreadId;

// Safety: the address of a thread-local is unique among live threads, and a
// thread never observes a different address for its own thread-local.
unsafe impl GetThreadId for LocalThreadId {
    const INIT: Self = LocalThreadId;

    fn nonzero_thread_id(&self) -> NonZeroUsize {
        // Has to be non-zero sized so every thread gets a distinct address.
        crate::loom::thread_local! {
            static KEY: u8 = 0;
        }

        KEY.with(|key| NonZeroUsize::new(ptr::from_ref(key).addr()).expect("thread ID was zero"))
    }
}
