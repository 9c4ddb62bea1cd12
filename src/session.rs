//! Transport, clips, the launcher state machine, MIDI recording, and the
//! snapshot hand-off between the UI and audio threads.

pub mod clip;
pub mod launcher;
pub mod recorder;
pub mod snapshot;
pub mod transport;

pub use clip::{ClipState, Quantize};
pub use launcher::{Launcher, TrackPlayback};
pub use recorder::Recorder;
pub use snapshot::{
    MuteMetering, NoteSnap, RtGate, Snapshot, SnapshotPair, StdClock, UiClock, FX_PER_TRACK,
    MAX_NOTES_PER_CLIP, MAX_SCENES, MAX_TRACKS,
};
pub use transport::Transport;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Sender half of the engine → UI feedback ring. A full ring drops the event
/// and bumps a counter the UI can observe; the audio thread never blocks on
/// feedback.
pub struct FeedbackTx {
    producer: rtrb::Producer<Feedback>,
    dropped: Arc<AtomicU32>,
}

impl FeedbackTx {
    pub fn new(producer: rtrb::Producer<Feedback>) -> Self {
        Self {
            producer,
            dropped: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn push(&mut self, event: Feedback) {
        if self.producer.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_counter(&self) -> Arc<AtomicU32> {
        self.dropped.clone()
    }
}

/// Events the audio thread streams back to the UI through an SPSC ring so
/// the UI copy of the session converges on what actually happened. All
/// variants are plain data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feedback {
    /// A slot took a state machine transition.
    ClipState {
        track: u8,
        scene: u8,
        state: ClipState,
    },
    /// The recorder committed a note; the UI applies it to its model once
    /// recording ends (the engine plays it back from its own buffer until
    /// then).
    NoteRecorded {
        track: u8,
        scene: u8,
        note: snapshot::NoteSnap,
    },
    /// A recorded clip grew or was finalized at this length.
    ClipLength {
        track: u8,
        scene: u8,
        length_beats: f32,
    },
    /// The transport started or stopped on the audio side (immediate
    /// launches, CC transport control).
    TransportPlaying { playing: bool },
    /// The loop toggle CC flipped.
    LoopToggled { enabled: bool },
    /// Record-arm toggled on a track via the controller.
    TrackArmed { track: u8, armed: bool },
    /// The smart-param page moved.
    SmartPage { page: u8 },
    /// A fader CC moved a track volume; mirrored so the UI can follow.
    TrackVolume { track: u8, volume: f32 },
    /// A mute CC toggled a track.
    TrackMute { track: u8, mute: bool },
}
