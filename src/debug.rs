//! Logging and soft assertions.
//!
//! Nothing in this crate may panic on the audio thread, so the assertion
//! macros here log and carry on instead of aborting. All of them compile to
//! nothing in release builds. Every path that can run inside the audio
//! callback is fenced with [`permit_alloc`][crate::util::permit_alloc],
//! because formatting a log line may allocate and the callback runs under
//! allocation policing in debug builds.
//!
//! The macros live at the crate root (`#[macro_export]`); the prelude
//! re-exports them from there.

use std::fmt;

/// Shared sink for the `deck_debug_assert*` macros: one place that knows how
/// to get a failed check into the log without tripping the allocation guard.
/// `origin` is the caller's `file!():line!()` since the `log` target would
/// otherwise point here.
#[doc(hidden)]
pub fn assert_failed(origin: &str, details: fmt::Arguments) {
    crate::util::permit_alloc(|| log::debug!("soft assert failed at {origin}: {details}"));
}

/// Informational logging, UI/setup threads. Plain `log::info!` under a name
/// the embedding application can grep for.
#[macro_export]
macro_rules! deck_log {
    ($($args:tt)*) => (
        $crate::log::info!($($args)*)
    );
}

/// Error logging. Unlike [`deck_log!`] this is safe to call from the audio
/// callback: faulting plug-ins and overflowing queues are reported from the
/// hot path, so the formatting is fenced against the allocation policing.
#[macro_export]
macro_rules! deck_error {
    ($($args:tt)*) => (
        $crate::util::permit_alloc(|| $crate::log::error!($($args)*))
    );
}

/// Per-block tracing for the hot path. Debug builds only; release builds
/// compile the call away entirely.
#[macro_export]
macro_rules! deck_trace {
    ($($args:tt)*) => (
        if cfg!(debug_assertions) {
            $crate::util::permit_alloc(|| $crate::log::trace!($($args)*))
        }
    );
}

/// A `debug_assert!` that logs instead of panicking. With no message the
/// stringified condition is logged; a `format!`-style message can follow the
/// condition.
#[macro_export]
macro_rules! deck_debug_assert {
    ($cond:expr $(,)?) => (
        if cfg!(debug_assertions) && !$cond {
            $crate::debug::assert_failed(
                concat!(file!(), ":", line!()),
                format_args!("{}", stringify!($cond)),
            );
        }
    );
    ($cond:expr, $($message:tt)+) => (
        if cfg!(debug_assertions) && !$cond {
            $crate::debug::assert_failed(
                concat!(file!(), ":", line!()),
                format_args!($($message)+),
            );
        }
    );
}

/// Equality flavor of [`deck_debug_assert!`]; expands through it so the
/// logged condition shows both operands.
#[macro_export]
macro_rules! deck_debug_assert_eq {
    ($left:expr, $right:expr $(,)?) => (
        $crate::deck_debug_assert!($left == $right)
    );
    ($left:expr, $right:expr, $($message:tt)+) => (
        $crate::deck_debug_assert!($left == $right, $($message)+)
    );
}

/// For branches that should be unreachable but must not take the audio
/// thread down when they aren't.
#[macro_export]
macro_rules! deck_debug_assert_failure {
    () => (
        if cfg!(debug_assertions) {
            $crate::debug::assert_failed(
                concat!(file!(), ":", line!()),
                format_args!("entered unreachable branch"),
            );
        }
    );
    ($($message:tt)+) => (
        if cfg!(debug_assertions) {
            $crate::debug::assert_failed(
                concat!(file!(), ":", line!()),
                format_args!($($message)+),
            );
        }
    );
}

#[cfg(test)]
mod tests {
    // The soft asserts must never panic, and the condition is evaluated at
    // most once (not at all in release builds, where the whole check
    // disappears).
    #[test]
    fn soft_asserts_do_not_panic_or_double_evaluate() {
        let mut evaluations = 0;
        let mut bump = || {
            evaluations += 1;
            false
        };
        deck_debug_assert!(bump());
        let expected = if cfg!(debug_assertions) { 1 } else { 0 };
        assert_eq!(evaluations, expected);

        deck_debug_assert!(1 + 1 == 3, "math broke: {}", 1 + 1);
        deck_debug_assert_eq!(2, 3);
        deck_debug_assert_failure!("explicitly failed with value {}", 42);
        deck_debug_assert_failure!();
    }
}
