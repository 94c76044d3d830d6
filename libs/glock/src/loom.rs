// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Switches atomics, cells, threads and thread-locals over to `loom` when
//! compiled with `--cfg loom`.

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync;
        pub(crate) use loom::cell;
        pub(crate) use loom::thread;
        pub(crate) use loom::thread_local;

        /// Runs `f` under the model checker. Unless `LOOM_MAX_PREEMPTIONS`
        /// says otherwise, at most three preemptions are explored per run.
        #[cfg(test)]
        pub(crate) fn model<F>(f: F)
        where
            F: Fn() + Sync + Send + 'static,
        {
            let mut builder = loom::model::Builder::new();
            if builder.preemption_bound.is_none() {
                builder.preemption_bound = Some(3);
            }
            builder.check(f);
        }
    } else {
        #[cfg(any(test, feature = "std"))]
        pub(crate) use std::thread_local;

        #[cfg(test)]
        pub(crate) use std::thread;

        #[cfg(test)]
        #[inline(always)]
        pub(crate) fn model<F>(f: F)
        where
            F: Fn() + Sync + Send + 'static,
        {
            f();
        }

        pub(crate) mod sync {
            pub(crate) use core::sync::atomic;

            #[cfg(test)]
            pub(crate) use std::sync::Arc;
        }

        pub(crate) mod cell {
            /// `core::cell::UnsafeCell` behind the closure-based access API of
            /// `loom::cell::UnsafeCell`.
            #[derive(Debug)]
            #[repr(transparent)]
            pub(crate) struct UnsafeCell<T: ?Sized>(core::cell::UnsafeCell<T>);

            impl<T> UnsafeCell<T> {
                pub(crate) const fn new(data: T) -> UnsafeCell<T> {
                    UnsafeCell(core::cell::UnsafeCell::new(data))
                }

                #[inline(always)]
                pub(crate) fn into_inner(self) -> T {
                    self.0.into_inner()
                }
            }

            impl<T: ?Sized> UnsafeCell<T> {
                #[inline(always)]
                pub(crate) fn with<F, R>(&self, f: F) -> R
                where
                    F: FnOnce(*const T) -> R,
                {
                    f(self.0.get())
                }

                #[inline(always)]
                pub(crate) fn with_mut<F, R>(&self, f: F) -> R
                where
                    F: FnOnce(*mut T) -> R,
                {
                    f(self.0.get())
                }
            }
        }
    }
}

/// Declares a `const fn` that loses its constness under loom, where atomics and
/// cells cannot be constructed in const contexts.
macro_rules! loom_const_fn {
    (
        $(#[$meta:meta])*
        $vis:vis const fn $name:ident($($arg:ident: $T:ty),*) -> $Ret:ty $body:block
    ) => {
        $(#[$meta])*
        #[cfg(not(loom))]
        $vis const fn $name($($arg: $T),*) -> $Ret $body

        $(#[$meta])*
        #[cfg(loom)]
        $vis fn $name($($arg: $T),*) -> $Ret $body
    };
}

pub(crate) use loom_const_fn;
