//! The UI → audio hand-off: two physical copies of the session state, an
//! atomic active index, and the `processing`/`rebuilding` gates that make the
//! hand-off safe without the audio thread ever blocking.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use super::clip::{ClipState, Quantize};

/// Fixed maxima for the plain-data snapshot. The UI clamps anything larger
/// and reports the clamp through its overflow counters.
pub const MAX_TRACKS: usize = 8;
pub const MAX_SCENES: usize = 8;
pub const FX_PER_TRACK: usize = 4;
pub const MAX_NOTES_PER_CLIP: usize = 256;
pub const MAX_SMART_PARAMS: usize = 64;

/// Iterations the rebuild barrier busy-spins with a pause hint before it
/// falls back to 1 ms sleeps.
const SPIN_ITERATIONS: u32 = 10_000;

/// What a muted track's meters should read. Default mutes ahead of the gain
/// stage so meters go dark; `PostGain` keeps metering the would-be signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteMetering {
    PreGain,
    PostGain,
}

/// One note inside a clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteSnap {
    pub key: u8,
    /// 0 to 1.
    pub velocity: f32,
    /// Release velocity, 0 to 1.
    pub release: f32,
    pub start_beat: f32,
    pub duration_beats: f32,
}

impl NoteSnap {
    pub const EMPTY: NoteSnap = NoteSnap {
        key: 0,
        velocity: 0.0,
        release: 0.0,
        start_beat: 0.0,
        duration_beats: 0.0,
    };
}

/// One clip slot. `state` is the UI's view of the launcher state machine and
/// doubles as the launch intent: the UI writes `Queued`, `RecordQueued`,
/// `Stopped`, or `Empty`, and the audio-side launcher decides whether the
/// transition is immediate (stopped transport) or waits for the quantize
/// boundary, reporting what actually happened back through the feedback ring.
/// `Playing`/`Recording` in a published snapshot are echoes of that feedback,
/// never intents.
#[derive(Clone, Copy)]
pub struct ClipSnap {
    pub state: ClipState,
    pub length_beats: f32,
    pub num_notes: u32,
    pub notes: [NoteSnap; MAX_NOTES_PER_CLIP],
}

impl ClipSnap {
    pub const EMPTY: ClipSnap = ClipSnap {
        state: ClipState::Empty,
        length_beats: 0.0,
        num_notes: 0,
        notes: [NoteSnap::EMPTY; MAX_NOTES_PER_CLIP],
    };

    #[inline]
    pub fn notes(&self) -> &[NoteSnap] {
        &self.notes[..self.num_notes as usize]
    }

    /// Append a note, clamping to capacity. Returns `false` (for the caller's
    /// overflow counter) when the note didn't fit.
    pub fn add_note(&mut self, note: NoteSnap) -> bool {
        if (self.num_notes as usize) < MAX_NOTES_PER_CLIP {
            self.notes[self.num_notes as usize] = note;
            self.num_notes += 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrackSnap {
    /// Linear gain, 0 to 1.5.
    pub volume: f32,
    pub mute: bool,
    pub solo: bool,
    /// Record arm; armed tracks turn scene launches into record launches and
    /// monitor live input.
    pub armed: bool,
}

impl TrackSnap {
    pub const DEFAULT: TrackSnap = TrackSnap {
        volume: 1.0,
        mute: false,
        solo: false,
        armed: false,
    };
}

/// One knob-mappable parameter of the smart-param target device.
#[derive(Debug, Clone, Copy)]
pub struct SmartParamSnap {
    pub id: u32,
    pub min: f32,
    pub max: f32,
}

impl SmartParamSnap {
    pub const EMPTY: SmartParamSnap = SmartParamSnap {
        id: 0,
        min: 0.0,
        max: 1.0,
    };
}

/// The parameter surface of the device currently targeted by the controller's
/// eight knobs. Published by the UI (it knows the device's parameter list);
/// the audio thread only pages through it.
#[derive(Clone, Copy)]
pub struct SmartTargetSnap {
    pub track: u8,
    /// 0 targets the instrument, 1..=FX_PER_TRACK the effect slots.
    pub device: u8,
    pub num_params: u32,
    pub params: [SmartParamSnap; MAX_SMART_PARAMS],
}

impl SmartTargetSnap {
    pub const EMPTY: SmartTargetSnap = SmartTargetSnap {
        track: 0,
        device: 0,
        num_params: 0,
        params: [SmartParamSnap::EMPTY; MAX_SMART_PARAMS],
    };
}

/// The full plain-data session snapshot. Everything the audio thread needs to
/// know about the session, with fixed maximum sizes so copies are memcpys and
/// reads never chase pointers.
#[derive(Clone, Copy)]
pub struct Snapshot {
    pub bpm: f32,
    pub playing: bool,
    pub quantize: Quantize,
    pub mute_metering: MuteMetering,
    /// Growth unit for clips recorded into previously empty slots.
    pub default_clip_bars: u32,
    pub beats_per_bar: u32,
    pub num_tracks: u32,
    pub num_scenes: u32,
    pub tracks: [TrackSnap; MAX_TRACKS],
    pub clips: [[ClipSnap; MAX_SCENES]; MAX_TRACKS],
    pub smart: SmartTargetSnap,
}

impl Snapshot {
    pub fn new(num_tracks: usize, num_scenes: usize) -> Self {
        Self {
            bpm: 120.0,
            playing: false,
            quantize: Quantize::Quarter,
            mute_metering: MuteMetering::PreGain,
            default_clip_bars: 1,
            beats_per_bar: 4,
            num_tracks: num_tracks.min(MAX_TRACKS) as u32,
            num_scenes: num_scenes.min(MAX_SCENES) as u32,
            tracks: [TrackSnap::DEFAULT; MAX_TRACKS],
            clips: [[ClipSnap::EMPTY; MAX_SCENES]; MAX_TRACKS],
            smart: SmartTargetSnap::EMPTY,
        }
    }

    #[inline]
    pub fn clip(&self, track: usize, scene: usize) -> &ClipSnap {
        &self.clips[track][scene]
    }

    #[inline]
    pub fn clip_mut(&mut self, track: usize, scene: usize) -> &mut ClipSnap {
        &mut self.clips[track][scene]
    }

    /// Whether any track is soloed, which turns every unsoloed track silent.
    pub fn any_solo(&self) -> bool {
        self.tracks[..self.num_tracks as usize]
            .iter()
            .any(|t| t.solo)
    }
}

/// Injected clock so the UI-side waits can be driven in tests and so the
/// engine never hard-codes a sleep syscall.
pub trait UiClock: Send + Sync {
    fn sleep_ms(&self, ms: u64);
}

/// The production clock.
pub struct StdClock;

impl UiClock for StdClock {
    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}

/// Test clock: yields instead of sleeping so single-threaded tests don't
/// stall on a gate that can never change.
pub struct TestClock;

impl UiClock for TestClock {
    fn sleep_ms(&self, _ms: u64) {
        std::thread::yield_now();
    }
}

/// The two gate words shared by the snapshot pair, the plug-in slots, and the
/// graph rebuild barrier.
///
/// - `processing` counts in-flight audio blocks (0 or 1 in practice). The
///   audio thread increments it at block start with acquire semantics and
///   decrements with release at block end.
/// - `rebuilding` is raised while the UI swaps graphs; snapshot publication
///   waits for it so a half-built graph never sees a newer snapshot than the
///   one it was sized for.
pub struct RtGate {
    processing: AtomicU32,
    rebuilding: AtomicBool,
}

impl RtGate {
    pub fn new() -> Self {
        Self {
            processing: AtomicU32::new(0),
            rebuilding: AtomicBool::new(false),
        }
    }

    /// Audio thread, at block start.
    #[inline]
    pub fn enter_block(&self) {
        self.processing.fetch_add(1, Ordering::AcqRel);
    }

    /// Audio thread, at block end.
    #[inline]
    pub fn exit_block(&self) {
        let previous = self.processing.fetch_sub(1, Ordering::AcqRel);
        deck_debug_assert!(previous > 0, "Unbalanced block exit");
    }

    #[inline]
    pub fn in_block(&self) -> bool {
        self.processing.load(Ordering::Acquire) > 0
    }

    /// Wait until no block is in flight. Busy-spins briefly with a pause
    /// hint, then falls back to 1 ms sleeps on the injected clock; blocks
    /// complete in bounded time so this terminates quickly.
    pub fn wait_idle(&self, clock: &dyn UiClock) {
        let mut spins = 0u32;
        while self.in_block() {
            if spins < SPIN_ITERATIONS {
                std::hint::spin_loop();
                spins += 1;
            } else {
                clock.sleep_ms(1);
            }
        }
    }

    /// Wait until snapshots may be published: no block in flight and no graph
    /// rebuild in progress.
    pub fn wait_writable(&self, clock: &dyn UiClock) {
        let mut spins = 0u32;
        while self.in_block() || self.rebuilding.load(Ordering::Acquire) {
            if spins < SPIN_ITERATIONS {
                std::hint::spin_loop();
                spins += 1;
            } else {
                clock.sleep_ms(1);
            }
        }
    }

    /// Raise the rebuild flag and wait for the in-flight block. Paired with
    /// [`end_rebuild`][Self::end_rebuild].
    pub fn begin_rebuild(&self, clock: &dyn UiClock) {
        self.rebuilding.store(true, Ordering::SeqCst);
        self.wait_idle(clock);
    }

    pub fn end_rebuild(&self) {
        self.rebuilding.store(false, Ordering::Release);
    }

    pub fn rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }
}

impl Default for RtGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The double-buffered snapshot pair.
///
/// Writer protocol (UI thread): wait for `processing == 0` and
/// `rebuilding == 0`, write the inactive copy, store the new active index
/// with release semantics. Reader protocol (audio thread): increment
/// `processing`, load the index with acquire, keep the reference for the
/// whole block, decrement `processing`.
pub struct SnapshotPair {
    snapshots: [UnsafeCell<Snapshot>; 2],
    active_index: AtomicUsize,
}

// SAFETY: the inactive buffer is only written while no block is in flight
// (enforced by RtGate), and the active buffer is only read by the audio
// thread; ownership alternates temporally and index publication is
// release/acquire.
unsafe impl Sync for SnapshotPair {}
unsafe impl Send for SnapshotPair {}

impl SnapshotPair {
    pub fn new(num_tracks: usize, num_scenes: usize) -> Self {
        Self {
            snapshots: [
                UnsafeCell::new(Snapshot::new(num_tracks, num_scenes)),
                UnsafeCell::new(Snapshot::new(num_tracks, num_scenes)),
            ],
            active_index: AtomicUsize::new(0),
        }
    }

    /// Publish a new snapshot from the UI thread: copy the currently active
    /// snapshot into the inactive buffer, let `edit` mutate it, then flip.
    pub fn publish(&self, gate: &RtGate, clock: &dyn UiClock, edit: impl FnOnce(&mut Snapshot)) {
        gate.wait_writable(clock);

        let active = self.active_index.load(Ordering::Acquire);
        let inactive = 1 - active;
        // SAFETY: no block is in flight, so the audio thread holds no
        // reference into either buffer, and this is the only writer.
        unsafe {
            let src = &*self.snapshots[active].get();
            let dst = &mut *self.snapshots[inactive].get();
            *dst = *src;
            edit(dst);
        }

        self.active_index.store(inactive, Ordering::Release);
    }

    /// Acquire the active snapshot for the duration of one block. Must only
    /// be called from the audio thread between `enter_block` and
    /// `exit_block`; the returned reference must not outlive the block.
    #[inline]
    pub fn acquire(&self, gate: &RtGate) -> &Snapshot {
        deck_debug_assert!(gate.in_block(), "Snapshot read outside a block");
        let index = self.active_index.load(Ordering::Acquire);
        // SAFETY: writers never touch the active buffer, and they cannot
        // flip the index twice while this block is in flight because every
        // publish waits for processing == 0 first.
        unsafe { &*self.snapshots[index].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_flips_and_preserves_previous_edits() {
        let gate = RtGate::new();
        let pair = SnapshotPair::new(2, 2);

        pair.publish(&gate, &TestClock, |snap| snap.bpm = 140.0);
        pair.publish(&gate, &TestClock, |snap| snap.tracks[0].mute = true);

        gate.enter_block();
        let snap = pair.acquire(&gate);
        // The second publish started from the first one's contents
        assert_eq!(snap.bpm, 140.0);
        assert!(snap.tracks[0].mute);
        gate.exit_block();
    }

    #[test]
    fn clip_note_clamp() {
        let mut clip = ClipSnap::EMPTY;
        clip.length_beats = 4.0;
        for i in 0..MAX_NOTES_PER_CLIP {
            assert!(clip.add_note(NoteSnap {
                key: 60,
                velocity: 0.5,
                release: 0.5,
                start_beat: i as f32 * 0.01,
                duration_beats: 0.1,
            }));
        }
        assert!(!clip.add_note(NoteSnap::EMPTY));
        assert_eq!(clip.notes().len(), MAX_NOTES_PER_CLIP);
    }

    #[test]
    fn gate_tracks_blocks() {
        let gate = RtGate::new();
        assert!(!gate.in_block());
        gate.enter_block();
        assert!(gate.in_block());
        gate.exit_block();
        assert!(!gate.in_block());
    }

    #[test]
    fn rebuild_flag_blocks_writers_not_readers() {
        let gate = RtGate::new();
        gate.begin_rebuild(&TestClock);
        assert!(gate.rebuilding());
        gate.end_rebuild();
        assert!(!gate.rebuilding());
    }
}
