//! Lock-free plug-in slots: the UI thread publishes processor instances with
//! an atomic pointer swap, the audio thread starts/stops them, and retired
//! instances travel back to the UI thread to be dropped. Nothing on the audio
//! side ever allocates, deallocates, or blocks.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use super::Processor;
use crate::params::ParamEventQueue;
use crate::session::snapshot::{RtGate, UiClock};

/// Queued parameter changes per processor before the oldest get dropped.
const PARAM_QUEUE_CAPACITY: usize = 256;
/// In-flight retired/disposed instances per slot. Two is already generous:
/// there can only be one active instance, and the UI waits for idle before
/// each swap.
const LIFECYCLE_QUEUE_CAPACITY: usize = 4;

/// A processor plus its cross-thread parameter queue. Owned by exactly one
/// thread at a time: the UI before publication, the audio thread between
/// publication and retirement, the UI again for disposal.
pub struct SlotInstance {
    pub processor: Box<dyn Processor>,
    pub params: ParamEventQueue,
    /// Mirrors whether `start_processing` has been called, consulted on
    /// teardown so `stop_processing` is called exactly once.
    started: bool,
}

impl SlotInstance {
    pub fn new(processor: Box<dyn Processor>) -> Self {
        Self {
            processor,
            params: ParamEventQueue::with_capacity(PARAM_QUEUE_CAPACITY),
            started: false,
        }
    }
}

/// One plug-in slot on a track (instrument or effect position).
pub struct PluginSlot {
    /// The published instance; null while the slot is empty.
    active: AtomicPtr<SlotInstance>,
    /// Raised by the UI on publish; the audio thread consumes it and calls
    /// `start_processing` exactly once.
    needs_start: AtomicBool,
    /// Sticky: set when the instance returned a process error and was
    /// silenced. Cleared by the UI.
    bypass_on_fault: AtomicBool,
    /// UI → audio: instances that need `stop_processing` on the audio thread.
    retire: ArrayQueue<Box<SlotInstance>>,
    /// Audio → UI: stopped instances waiting to be deactivated and dropped.
    dispose: ArrayQueue<Box<SlotInstance>>,
}

// SAFETY: the raw pointer is only dereferenced on the audio thread between
// publication and retirement, and the UI thread performs swaps under the
// processing==0 gate; ownership is temporal, never shared.
unsafe impl Sync for PluginSlot {}
unsafe impl Send for PluginSlot {}

impl PluginSlot {
    pub fn new() -> Self {
        Self {
            active: AtomicPtr::new(std::ptr::null_mut()),
            needs_start: AtomicBool::new(false),
            bypass_on_fault: AtomicBool::new(false),
            retire: ArrayQueue::new(LIFECYCLE_QUEUE_CAPACITY),
            dispose: ArrayQueue::new(LIFECYCLE_QUEUE_CAPACITY),
        }
    }

    //
    // UI thread
    //

    /// Publish a new instance, retiring the previous one. The caller has
    /// already run `init` and `activate` on it. Waits for the in-flight block
    /// to finish so the pointer hand-off is clean.
    pub fn install(&self, instance: Box<SlotInstance>, gate: &RtGate, clock: &dyn UiClock) {
        let new_ptr = Box::into_raw(instance);

        gate.wait_idle(clock);
        let old_ptr = self.active.swap(new_ptr, Ordering::AcqRel);
        self.needs_start.store(true, Ordering::Release);
        self.bypass_on_fault.store(false, Ordering::Relaxed);

        self.retire_ptr(old_ptr);
    }

    /// Empty the slot, retiring the current instance if any.
    pub fn uninstall(&self, gate: &RtGate, clock: &dyn UiClock) {
        gate.wait_idle(clock);
        let old_ptr = self.active.swap(std::ptr::null_mut(), Ordering::AcqRel);
        self.needs_start.store(false, Ordering::Release);
        self.bypass_on_fault.store(false, Ordering::Relaxed);

        self.retire_ptr(old_ptr);
    }

    fn retire_ptr(&self, old_ptr: *mut SlotInstance) {
        if old_ptr.is_null() {
            return;
        }
        // SAFETY: we just took sole ownership of the pointer back out of
        // `active`; nothing else will dereference it.
        let old = unsafe { Box::from_raw(old_ptr) };
        if let Err(old) = self.retire.push(old) {
            // The queue only overflows if the audio thread hasn't run for
            // several swaps; with no block in flight it's safe to stop and
            // drop on this thread instead.
            deck_debug_assert_failure!("Retire queue overflow, stopping instance on UI thread");
            let mut old = old;
            if old.started {
                old.processor.stop_processing();
            }
            old.processor.deactivate();
        }
    }

    /// Whether a processor is currently published.
    pub fn is_loaded(&self) -> bool {
        !self.active.load(Ordering::Acquire).is_null()
    }

    /// The sticky fault flag.
    pub fn faulted(&self) -> bool {
        self.bypass_on_fault.load(Ordering::Relaxed)
    }

    pub fn clear_fault(&self) {
        self.bypass_on_fault.store(false, Ordering::Relaxed);
    }

    /// Drain stopped instances, deactivating and dropping them here on the
    /// UI thread.
    pub fn drain_disposed(&self) {
        while let Some(mut instance) = self.dispose.pop() {
            instance.processor.deactivate();
            drop(instance);
        }
    }

    /// Queue a parameter change onto the active instance. Returns `false` if
    /// the slot is empty or the queue was contended.
    pub fn queue_param_change(&self, change: crate::params::ParamChange) -> bool {
        let ptr = self.active.load(Ordering::Acquire);
        if ptr.is_null() {
            return false;
        }
        // SAFETY: the param queue is internally synchronized and designed for
        // exactly this cross-thread access; the instance outlives this call
        // because disposal requires the audio thread to retire it first and
        // retirement happens-after this load.
        let instance = unsafe { &*ptr };
        instance.params.push(change)
    }

    //
    // Audio thread
    //

    /// Per-block lifecycle maintenance: stop retired instances, start a
    /// freshly published one.
    pub fn drain_lifecycle(&self) {
        while let Some(mut instance) = self.retire.pop() {
            if instance.started {
                instance.processor.stop_processing();
                instance.started = false;
            }
            if let Err(instance) = self.dispose.push(instance) {
                // Push it back and try again next block; dropping here would
                // deallocate on the audio thread.
                let _ = self.retire.push(instance);
                break;
            }
        }

        let ptr = self.active.load(Ordering::Acquire);
        if !ptr.is_null() && self.needs_start.swap(false, Ordering::AcqRel) {
            // SAFETY: between publication and retirement the audio thread is
            // the only one dereferencing the active instance.
            let instance = unsafe { &mut *ptr };
            if instance.processor.start_processing() {
                instance.started = true;
            } else {
                self.bypass_on_fault.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Run `f` against the active, started instance. Returns `None` when the
    /// slot is empty or the instance hasn't been started yet.
    #[inline]
    pub fn with_active<R>(&self, f: impl FnOnce(&mut SlotInstance) -> R) -> Option<R> {
        let ptr = self.active.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        // SAFETY: see `drain_lifecycle`; this is only called from the audio
        // thread inside a block.
        let instance = unsafe { &mut *ptr };
        if !instance.started {
            return None;
        }
        Some(f(instance))
    }

    /// Latch the fault flag after a process error.
    pub fn mark_fault(&self) {
        self.bypass_on_fault.store(true, Ordering::Relaxed);
    }
}

impl Default for PluginSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginSlot {
    fn drop(&mut self) {
        let ptr = self.active.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !ptr.is_null() {
            // SAFETY: by the time a slot is dropped no thread can observe the
            // pointer anymore.
            let mut instance = unsafe { Box::from_raw(ptr) };
            if instance.started {
                instance.processor.stop_processing();
            }
            instance.processor.deactivate();
        }
        while let Some(mut instance) = self.retire.pop() {
            if instance.started {
                instance.processor.stop_processing();
            }
            instance.processor.deactivate();
        }
        while let Some(mut instance) = self.dispose.pop() {
            instance.processor.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::test_support::DcInstrument;
    use crate::session::snapshot::TestClock;

    fn install_dc(slot: &PluginSlot, gate: &RtGate) {
        let mut processor = Box::new(DcInstrument::new(0.5));
        assert!(processor.init(48_000.0, 512));
        processor.activate();
        slot.install(Box::new(SlotInstance::new(processor)), gate, &TestClock);
    }

    #[test]
    fn start_is_deferred_to_the_audio_thread() {
        let gate = RtGate::new();
        let slot = PluginSlot::new();
        install_dc(&slot, &gate);

        assert!(slot.is_loaded());
        // Not started yet: with_active refuses to hand it out
        assert!(slot.with_active(|_| ()).is_none());

        slot.drain_lifecycle();
        assert!(slot.with_active(|_| ()).is_some());
    }

    #[test]
    fn swap_stops_the_old_instance_on_the_audio_side() {
        let gate = RtGate::new();
        let slot = PluginSlot::new();
        install_dc(&slot, &gate);
        slot.drain_lifecycle();

        // Replace it; the old instance is queued for stop + dispose
        install_dc(&slot, &gate);
        slot.drain_lifecycle();
        slot.drain_disposed();

        assert!(slot.with_active(|_| ()).is_some());
    }

    #[test]
    fn uninstall_empties_the_slot() {
        let gate = RtGate::new();
        let slot = PluginSlot::new();
        install_dc(&slot, &gate);
        slot.drain_lifecycle();

        slot.uninstall(&gate, &TestClock);
        assert!(!slot.is_loaded());
        assert!(slot.with_active(|_| ()).is_none());

        slot.drain_lifecycle();
        slot.drain_disposed();
    }

    #[test]
    fn fault_flag_is_sticky() {
        let slot = PluginSlot::new();
        assert!(!slot.faulted());
        slot.mark_fault();
        assert!(slot.faulted());
        slot.clear_fault();
        assert!(!slot.faulted());
    }
}
