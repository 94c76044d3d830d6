// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::sync::atomic::{AtomicBool, Ordering};

/// Pacing for a waiter in [`SpinRawMutex::lock`].
///
/// Each round waits twice as long as the one before, up to `2^MAX_ROUND`
/// spin hints. Under loom every round is a single yield instead, so the model
/// sees one scheduling point per round and the holder gets to run.
pub(crate) struct Backoff {
    round: u32,
}

impl Backoff {
    const MAX_ROUND: u32 = 6;

    /// Returns a backoff that starts with the shortest wait.
    pub(crate) const fn new() -> Self {
        Self { round: 0 }
    }

    /// Waits out one round and makes the next one longer.
    pub(crate) fn snooze(&mut self) {
        cfg_if::cfg_if! {
            if #[cfg(loom)] {
                crate::loom::thread::yield_now();
            } else {
                for _ in 0..1_u32 << self.round {
                    core::hint::spin_loop();
                }
                // Test runs oversubscribe the cores, give the holder a chance.
                #[cfg(test)]
                if self.round == Self::MAX_ROUND {
                    std::thread::yield_now();
                }
            }
        }

        self.round = (self.round + 1).min(Self::MAX_ROUND);
    }
}

/// A test-and-test-and-set spinning [`lock_api::RawMutex`].
///
/// Used as the inner mutex where no parking mutex is available, and under
/// loom. Waiters watch the flag with plain loads and only retry the CAS once
/// it reads as free.
pub struct SpinRawMutex {
    held: AtomicBool,
}

impl core::fmt::Debug for SpinRawMutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("SpinRawMutex")
            .field(&self.held.load(Ordering::Relaxed))
            .finish()
    }
}

// Safety: `held` goes from `false` to `true` only through an `Acquire` CAS and
// back only through the holder's `Release` store, so at most one caller holds
// the mutex at a time.
unsafe impl lock_api::RawMutex for SpinRawMutex {
    const INIT: Self = Self {
        held: AtomicBool::new(false),
    };

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        let mut backoff = Backoff::new();
        loop {
            if self
                .held
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            while self.held.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    fn try_lock(&self) -> bool {
        !self.held.load(Ordering::Relaxed)
            && self
                .held
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    unsafe fn unlock(&self) {
        debug_assert!(self.held.load(Ordering::Relaxed));
        self.held.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}
