//! Small shared utilities: pitch conversion, the allocation escape hatch,
//! and the guard wrapped around every audio callback.

use std::marker::PhantomData;

#[cfg(all(debug_assertions, feature = "assert_process_allocs"))]
#[global_allocator]
static ALLOC_POLICE: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

/// Equal-temperament frequency of a MIDI key, A4 = 440 Hz.
#[inline]
pub fn midi_note_to_freq(note: u8) -> f32 {
    440.0 * ((note as f32 - 69.0) / 12.0).exp2()
}

/// Allow allocations inside `func` even while the callback guard is armed.
/// Logging is the intended customer: formatting a message may allocate, and
/// a dropped log line is better than an aborted callback.
#[cfg(all(debug_assertions, feature = "assert_process_allocs"))]
#[inline]
pub fn permit_alloc<T>(func: impl FnOnce() -> T) -> T {
    assert_no_alloc::permit_alloc(func)
}

/// Without the policing feature this is a plain call.
#[cfg(not(all(debug_assertions, feature = "assert_process_allocs")))]
#[inline]
pub fn permit_alloc<T>(func: impl FnOnce() -> T) -> T {
    func()
}

/// Run one audio callback under the engine's thread guarantees: denormals
/// flushed to zero for the duration (restored afterwards if the OS callback
/// had them off), and, in debug builds with `assert_process_allocs`, the
/// allocator armed so any allocation in `f` aborts loudly instead of gliding
/// through review.
pub fn with_callback_guard<T>(f: impl FnOnce() -> T) -> T {
    let _guard = CallbackGuard::enter();

    cfg_if::cfg_if! {
        if #[cfg(all(debug_assertions, feature = "assert_process_allocs"))] {
            assert_no_alloc::assert_no_alloc(f)
        } else {
            f()
        }
    }
}

/// Flush-to-zero scope for the current thread. Denormal capacitor charges
/// and filter tails would otherwise cost orders of magnitude per sample once
/// a voice decays toward silence.
pub struct CallbackGuard {
    /// FTZ state to put back, when the thread didn't already have it on.
    restore_ftz: Option<u32>,
    /// The guard manipulates this thread's floating-point control register;
    /// it must be dropped where it was created. `*const ()` opts out of
    /// Send/Sync on stable.
    _thread_bound: PhantomData<*const ()>,
}

impl CallbackGuard {
    pub fn enter() -> Self {
        let restore_ftz = match current_ftz() {
            Some(mode) if mode != FTZ_ON => {
                set_ftz(FTZ_ON);
                Some(mode)
            }
            _ => None,
        };
        Self {
            restore_ftz,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if let Some(mode) = self.restore_ftz {
            set_ftz(mode);
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_feature = "sse")] {
        const FTZ_ON: u32 = std::arch::x86_64::_MM_FLUSH_ZERO_ON;

        fn current_ftz() -> Option<u32> {
            Some(unsafe { std::arch::x86_64::_MM_GET_FLUSH_ZERO_MODE() })
        }

        fn set_ftz(mode: u32) {
            unsafe { std::arch::x86_64::_MM_SET_FLUSH_ZERO_MODE(mode) };
        }
    } else {
        // No control register to poke on this target; the guard is inert.
        const FTZ_ON: u32 = 0;

        fn current_ftz() -> Option<u32> {
            None
        }

        fn set_ftz(_mode: u32) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_frequencies_follow_equal_temperament() {
        assert_eq!(midi_note_to_freq(69), 440.0);
        // An octave doubles, a fifth is ~1.4983
        assert!((midi_note_to_freq(81) / midi_note_to_freq(69) - 2.0).abs() < 1e-6);
        assert!((midi_note_to_freq(76) / midi_note_to_freq(69) - 1.4983).abs() < 1e-3);
        // Bottom and top of the MIDI range stay sane
        assert!(midi_note_to_freq(0) > 8.0);
        assert!(midi_note_to_freq(127) < 13_000.0);
    }

    #[test]
    fn permit_alloc_is_transparent() {
        let boxed = permit_alloc(|| Box::new(7));
        assert_eq!(*boxed, 7);
    }

    #[test]
    fn callback_guard_nests_and_returns() {
        let result = with_callback_guard(|| with_callback_guard(|| 5));
        assert_eq!(result, 5);
        // Entering and dropping by hand must also be balanced
        let guard = CallbackGuard::enter();
        drop(guard);
    }
}
