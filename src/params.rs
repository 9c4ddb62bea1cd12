//! Parameter metadata and the queue that carries parameter changes between
//! threads.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// Flags describing how a parameter may be used.
    pub struct ParamFlags: u32 {
        /// The parameter can receive automation from the session.
        const AUTOMATABLE = 1 << 0;
        /// The parameter can be modulated per voice.
        const MODULATABLE = 1 << 1;
        /// The parameter takes discrete values; hosts should round.
        const STEPPED = 1 << 2;
        /// Changing this parameter requires the processor to be reactivated,
        /// like an oversampling factor that resizes internal buffers.
        const REQUIRES_REACTIVATION = 1 << 3;
    }
}

/// Static information about one parameter, queried from the UI thread. The
/// `id` is stable across sessions; the `index` used to enumerate parameters is
/// not.
#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub id: u32,
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub flags: ParamFlags,
}

impl ParamInfo {
    /// Map a normalized `[0, 1]` value onto this parameter's plain range.
    #[inline]
    pub fn denormalize(&self, normalized: f32) -> f32 {
        self.min + (self.max - self.min) * normalized.clamp(0.0, 1.0)
    }

    /// Map a plain value onto `[0, 1]`.
    #[inline]
    pub fn normalize(&self, plain: f32) -> f32 {
        if self.max == self.min {
            0.0
        } else {
            ((plain - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
        }
    }
}

/// A single queued parameter change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamChange {
    pub param_id: u32,
    pub value: f32,
}

/// A bounded queue of parameter changes shared between the UI thread (host
/// edits, smart-param knobs) and the audio thread (automation output). Both
/// sides use `try_lock`; a contended writer defers to a later block rather
/// than blocking, and a full queue drops its oldest entry so the most recent
/// value always wins.
pub struct ParamEventQueue {
    changes: Mutex<VecDeque<ParamChange>>,
    capacity: usize,
    /// Changes dropped due to overflow, observable by the UI.
    dropped: AtomicU32,
}

impl ParamEventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            changes: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU32::new(0),
        }
    }

    /// Queue a change. Returns `false` if the lock was contended and the
    /// change should be retried on a later block.
    pub fn push(&self, change: ParamChange) -> bool {
        let mut changes = match self.changes.try_lock() {
            Some(changes) => changes,
            None => return false,
        };

        if changes.len() == self.capacity {
            changes.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        changes.push_back(change);

        true
    }

    /// Drain all queued changes into `apply`. Returns `false` without calling
    /// `apply` if the lock was contended.
    pub fn drain(&self, mut apply: impl FnMut(ParamChange)) -> bool {
        let mut changes = match self.changes.try_lock() {
            Some(changes) => changes,
            None => return false,
        };

        while let Some(change) = changes.pop_front() {
            apply(change);
        }

        true
    }

    /// The number of changes lost to overflow so far.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drops_oldest_on_overflow() {
        let queue = ParamEventQueue::with_capacity(2);
        assert!(queue.push(ParamChange { param_id: 1, value: 0.1 }));
        assert!(queue.push(ParamChange { param_id: 2, value: 0.2 }));
        assert!(queue.push(ParamChange { param_id: 3, value: 0.3 }));
        assert_eq!(queue.dropped(), 1);

        let mut drained = Vec::new();
        assert!(queue.drain(|change| drained.push(change.param_id)));
        // The oldest change was discarded to make room
        assert_eq!(drained, vec![2, 3]);
    }

    #[test]
    fn normalize_round_trip() {
        let info = ParamInfo {
            id: 7,
            name: "cutoff".to_string(),
            min: 20.0,
            max: 20_000.0,
            default: 1_000.0,
            flags: ParamFlags::AUTOMATABLE,
        };
        assert_eq!(info.denormalize(0.0), 20.0);
        assert_eq!(info.denormalize(1.0), 20_000.0);
        let plain = info.denormalize(0.25);
        assert!((info.normalize(plain) - 0.25).abs() < 1e-6);
    }
}
