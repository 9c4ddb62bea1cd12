//! MIDI capture into clips: live key states become timestamped notes, held
//! notes are split at loop boundaries, and clips recorded into empty slots
//! grow as the playhead runs past their end.

use super::snapshot::{NoteSnap, MAX_NOTES_PER_CLIP};
use super::{Feedback, FeedbackTx};

/// A key held down while recording.
#[derive(Debug, Clone, Copy)]
struct HeldNote {
    /// Clip-local beat where the key went down.
    start: f64,
    velocity: f32,
}

/// The audio-side recording state for the (single) actively recording clip.
/// Notes recorded here are streamed to the UI as feedback events and kept in
/// a local buffer so the clip plays back its fresh content on the next loop
/// pass without waiting for a snapshot round-trip.
pub struct Recorder {
    active: bool,
    track: usize,
    scene: usize,
    /// Global (unwrapped) beat where recording started; clip-local time is
    /// relative to this.
    start_beat: f64,
    length_beats: f64,
    /// A previously empty slot grows instead of wrapping.
    new_clip: bool,
    grow_beats: f64,
    held: [Option<HeldNote>; 128],
    notes: Vec<NoteSnap>,
    /// Completed loop passes, for overdub boundary detection.
    cycle: f64,
    overflowed: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            active: false,
            track: 0,
            scene: 0,
            start_beat: 0.0,
            length_beats: 0.0,
            new_clip: false,
            grow_beats: 4.0,
            held: [None; 128],
            notes: Vec::with_capacity(MAX_NOTES_PER_CLIP),
            cycle: 0.0,
            overflowed: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn target(&self) -> Option<(usize, usize)> {
        self.active.then(|| (self.track, self.scene))
    }

    pub fn length_beats(&self) -> f64 {
        self.length_beats
    }

    /// Notes committed since recording began, for same-pass playback.
    pub fn fresh_notes(&self) -> &[NoteSnap] {
        &self.notes
    }

    /// Whether the take ran past the per-clip note capacity; overflowing
    /// notes were dropped.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// A take into a previously empty slot extends its clip instead of
    /// wrapping; playback must not wrap either until it ends.
    pub fn is_growing(&self) -> bool {
        self.active && self.new_clip
    }

    /// Begin recording into a slot at global beat `start_beat`. For a new
    /// clip (previously empty slot) `length_beats` is the initial growth unit
    /// and the clip extends rather than wraps.
    pub fn begin(
        &mut self,
        track: usize,
        scene: usize,
        start_beat: f64,
        length_beats: f64,
        new_clip: bool,
    ) {
        deck_debug_assert!(!self.active, "Recorder already active");
        self.active = true;
        self.track = track;
        self.scene = scene;
        self.start_beat = start_beat;
        self.length_beats = length_beats.max(f64::EPSILON);
        self.new_clip = new_clip;
        self.grow_beats = length_beats.max(f64::EPSILON);
        self.held = [None; 128];
        self.notes.clear();
        self.cycle = 0.0;
        self.overflowed = false;
    }

    /// Global beat recording began at, clamped against for events arriving
    /// block-aligned just ahead of a mid-block start boundary.
    pub fn start_beat(&self) -> f64 {
        self.start_beat
    }

    /// Clip-local beat for a global beat position.
    #[inline]
    fn local(&self, global_beat: f64) -> f64 {
        let local = (global_beat - self.start_beat).max(0.0);
        if self.new_clip {
            local
        } else {
            local.rem_euclid(self.length_beats)
        }
    }

    /// A key went down at `global_beat`.
    pub fn note_on(&mut self, key: u8, velocity: f32, global_beat: f64) {
        if !self.active {
            return;
        }
        self.held[key as usize] = Some(HeldNote {
            start: self.local(global_beat),
            velocity,
        });
    }

    /// A key came up; commit the note.
    pub fn note_off(&mut self, key: u8, release: f32, global_beat: f64, feedback: &mut FeedbackTx) {
        if !self.active {
            return;
        }
        if let Some(held) = self.held[key as usize].take() {
            let end = self.local(global_beat);
            let mut duration = end - held.start;
            if !self.new_clip && duration < 0.0 {
                // Wrapped overdub: report the duration modulo the loop
                duration += self.length_beats;
            }
            self.commit(key, held.velocity, release, held.start, duration.max(0.0), feedback);
        }
    }

    /// Advance over the block's span of global beats: grow new clips, split
    /// held notes at loop boundaries of overdubbed clips.
    pub fn advance(&mut self, span_to: f64, feedback: &mut FeedbackTx) {
        if !self.active {
            return;
        }

        if self.new_clip {
            let local_end = span_to - self.start_beat;
            let mut grew = false;
            while local_end > self.length_beats {
                self.length_beats += self.grow_beats;
                grew = true;
            }
            if grew {
                feedback.push(Feedback::ClipLength {
                    track: self.track as u8,
                    scene: self.scene as u8,
                    length_beats: self.length_beats as f32,
                });
            }
            return;
        }

        // Overdub: whenever the playhead passes the loop end, commit held
        // notes to the boundary and reopen them at zero
        let cycles = ((span_to - self.start_beat) / self.length_beats).floor();
        if cycles > self.cycle {
            for key in 0..128u8 {
                if let Some(held) = self.held[key as usize] {
                    let duration = self.length_beats - held.start;
                    if duration > 1e-6 {
                        self.commit(key, held.velocity, 0.0, held.start, duration, feedback);
                    }
                    self.held[key as usize] = Some(HeldNote {
                        start: 0.0,
                        velocity: held.velocity,
                    });
                }
            }
        }
        self.cycle = cycles;
    }

    /// Stop recording: close anything still held at `global_beat` and return
    /// the slot that was being recorded.
    pub fn finish(&mut self, global_beat: f64, feedback: &mut FeedbackTx) -> (usize, usize) {
        let local = self.local(global_beat);
        for key in 0..128u8 {
            if let Some(held) = self.held[key as usize].take() {
                let duration = (local - held.start).max(0.0);
                if duration > 1e-6 {
                    self.commit(key, held.velocity, 0.0, held.start, duration, feedback);
                }
            }
        }

        feedback.push(Feedback::ClipLength {
            track: self.track as u8,
            scene: self.scene as u8,
            length_beats: self.length_beats as f32,
        });

        self.active = false;
        (self.track, self.scene)
    }

    /// The transport wrapped; recording time is tracked on the unwrapped
    /// timeline, so shift our origin with it.
    pub fn shift_origin(&mut self, wrapped_by: f64) {
        if self.active {
            self.start_beat -= wrapped_by;
        }
    }

    fn commit(
        &mut self,
        key: u8,
        velocity: f32,
        release: f32,
        start: f64,
        duration: f64,
        feedback: &mut FeedbackTx,
    ) {
        if self.notes.len() == MAX_NOTES_PER_CLIP {
            self.overflowed = true;
            return;
        }
        let note = NoteSnap {
            key,
            velocity,
            release,
            start_beat: start as f32,
            duration_beats: duration as f32,
        };
        self.notes.push(note);
        feedback.push(Feedback::NoteRecorded {
            track: self.track as u8,
            scene: self.scene as u8,
            note,
        });
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;

    fn feedback_ring() -> (FeedbackTx, rtrb::Consumer<Feedback>) {
        let (producer, consumer) = RingBuffer::new(512);
        (FeedbackTx::new(producer), consumer)
    }

    fn recorded_notes(consumer: &mut rtrb::Consumer<Feedback>) -> Vec<NoteSnap> {
        let mut notes = Vec::new();
        while let Ok(event) = consumer.pop() {
            if let Feedback::NoteRecorded { note, .. } = event {
                notes.push(note);
            }
        }
        notes
    }

    #[test]
    fn overdub_records_a_simple_note() {
        let (mut tx, mut rx) = feedback_ring();
        let mut recorder = Recorder::new();
        recorder.begin(0, 0, 0.0, 8.0, false);

        recorder.note_on(60, 0.9, 0.5);
        recorder.advance(0.75, &mut tx);
        recorder.note_off(60, 0.4, 1.0, &mut tx);
        recorder.finish(1.5, &mut tx);

        let notes = recorded_notes(&mut rx);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].key, 60);
        assert_eq!(notes[0].start_beat, 0.5);
        assert_eq!(notes[0].duration_beats, 0.5);
    }

    #[test]
    fn held_note_is_split_at_the_loop_boundary() {
        let (mut tx, mut rx) = feedback_ring();
        let mut recorder = Recorder::new();
        recorder.begin(0, 0, 0.0, 8.0, false);

        recorder.note_on(60, 0.9, 7.9);
        // The block containing the wrap commits the first half…
        recorder.advance(8.1, &mut tx);
        // …and the release after the wrap commits the reopened half
        recorder.note_off(60, 0.0, 8.2, &mut tx);
        recorder.finish(8.5, &mut tx);

        let notes = recorded_notes(&mut rx);
        assert_eq!(notes.len(), 2);
        assert!((notes[0].start_beat - 7.9).abs() < 1e-4);
        assert!((notes[0].duration_beats - 0.1).abs() < 1e-4);
        assert_eq!(notes[1].start_beat, 0.0);
        assert!((notes[1].duration_beats - 0.2).abs() < 1e-4);
    }

    #[test]
    fn new_clip_grows_by_whole_units() {
        let (mut tx, mut rx) = feedback_ring();
        let mut recorder = Recorder::new();
        recorder.begin(1, 2, 4.0, 4.0, true);

        recorder.advance(4.0 + 4.5, &mut tx);
        assert_eq!(recorder.length_beats(), 8.0);
        recorder.advance(4.0 + 9.0, &mut tx);
        assert_eq!(recorder.length_beats(), 12.0);

        let mut grew = 0;
        while let Ok(event) = rx.pop() {
            if let Feedback::ClipLength { length_beats, .. } = event {
                grew += 1;
                assert!(length_beats > 4.0);
            }
        }
        assert_eq!(grew, 2);
    }

    #[test]
    fn finish_closes_held_notes() {
        let (mut tx, mut rx) = feedback_ring();
        let mut recorder = Recorder::new();
        recorder.begin(0, 0, 0.0, 8.0, false);

        recorder.note_on(64, 0.8, 2.0);
        let (track, scene) = recorder.finish(3.0, &mut tx);
        assert_eq!((track, scene), (0, 0));
        assert!(!recorder.is_active());

        let notes = recorded_notes(&mut rx);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].start_beat, 2.0);
        assert_eq!(notes[0].duration_beats, 1.0);
    }
}
