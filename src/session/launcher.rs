//! The audio-side clip/scene launcher: owns the real state machine per slot,
//! reconciles UI intents from the snapshot, takes quantize-boundary
//! transitions, and tells the graph's note sources what each track is playing.

use super::clip::ClipState;
use super::recorder::Recorder;
use super::snapshot::{Snapshot, MAX_SCENES, MAX_TRACKS};
use super::transport::{BlockSpan, Transport};
use super::{Feedback, FeedbackTx};

/// What one track is playing during the current block, consumed by its
/// note-source nodes.
#[derive(Debug, Clone, Copy)]
pub struct TrackPlayback {
    /// Scene index of the playing/recording clip, or -1 for silence.
    pub scene: i32,
    /// True when the active clip changed this block (started, stopped, or
    /// switched); sounding notes are cut at `change_offset`.
    pub changed: bool,
    /// Sample offset of the change within the block.
    pub change_offset: u32,
    /// Clip-local beat range covered by this block from `change_offset` on;
    /// `local_to` is unwrapped and may exceed `length_beats`.
    pub local_from: f64,
    pub local_to: f64,
    pub length_beats: f64,
    pub recording: bool,
}

impl TrackPlayback {
    pub const SILENT: TrackPlayback = TrackPlayback {
        scene: -1,
        changed: false,
        change_offset: 0,
        local_from: 0.0,
        local_to: 0.0,
        length_beats: 0.0,
        recording: false,
    };
}

#[derive(Debug, Clone, Copy)]
struct SlotRuntime {
    state: ClipState,
    /// The snapshot state we last reconciled against; a differing snapshot
    /// value is a fresh UI intent.
    ui_state: ClipState,
    stop_pending: bool,
    /// Global (unwrapped) beat this slot entered Playing/Recording.
    started_at: f64,
}

impl SlotRuntime {
    const EMPTY: SlotRuntime = SlotRuntime {
        state: ClipState::Empty,
        ui_state: ClipState::Empty,
        stop_pending: false,
        started_at: 0.0,
    };

    fn is_active(&self) -> bool {
        matches!(self.state, ClipState::Playing | ClipState::Recording)
    }
}

pub struct Launcher {
    slots: [[SlotRuntime; MAX_SCENES]; MAX_TRACKS],
    playback: [TrackPlayback; MAX_TRACKS],
    /// Sample offset at which each track's active clip changed this block.
    changed: [Option<u32>; MAX_TRACKS],
    num_tracks: usize,
    num_scenes: usize,
}

impl Launcher {
    pub fn new(num_tracks: usize, num_scenes: usize) -> Self {
        Self {
            slots: [[SlotRuntime::EMPTY; MAX_SCENES]; MAX_TRACKS],
            playback: [TrackPlayback::SILENT; MAX_TRACKS],
            changed: [None; MAX_TRACKS],
            num_tracks: num_tracks.min(MAX_TRACKS),
            num_scenes: num_scenes.min(MAX_SCENES),
        }
    }

    pub fn slot_state(&self, track: usize, scene: usize) -> ClipState {
        self.slots[track][scene].state
    }

    pub fn playback(&self, track: usize) -> &TrackPlayback {
        &self.playback[track]
    }

    /// All tracks' playback info for the current block.
    pub fn playbacks(&self) -> &[TrackPlayback] {
        &self.playback[..self.num_tracks]
    }

    /// The loop length governing the global playhead wrap: the longest
    /// playing clip, or one default clip's worth when nothing plays.
    pub fn loop_length(&self, snap: &Snapshot, recorder: &Recorder) -> f64 {
        let mut length: f64 = 0.0;
        for t in 0..self.num_tracks {
            for s in 0..self.num_scenes {
                let slot = &self.slots[t][s];
                if slot.is_active() {
                    let clip_len = if slot.state == ClipState::Recording {
                        recorder.length_beats()
                    } else {
                        snap.clip(t, s).length_beats as f64
                    };
                    length = length.max(clip_len);
                }
            }
        }
        if length <= 0.0 {
            length = (snap.default_clip_bars * snap.beats_per_bar).max(1) as f64;
        }
        length
    }

    /// Apply fresh UI intents from the snapshot. Runs at block start, before
    /// the transport advances, so immediate launches (transport stopped)
    /// produce audio in the same block.
    pub fn reconcile(
        &mut self,
        snap: &Snapshot,
        transport: &mut Transport,
        recorder: &mut Recorder,
        feedback: &mut FeedbackTx,
    ) {
        for t in 0..self.num_tracks {
            for s in 0..self.num_scenes {
                let want = snap.clip(t, s).state;
                if want == self.slots[t][s].ui_state {
                    continue;
                }
                self.slots[t][s].ui_state = want;

                match want {
                    ClipState::Queued => self.request_launch(t, s, transport, feedback),
                    ClipState::RecordQueued => {
                        self.request_record(t, s, snap, transport, recorder, feedback)
                    }
                    ClipState::Stopped => self.request_stop(t, s, transport, recorder, feedback),
                    ClipState::Empty => {
                        if self.slots[t][s].state == ClipState::Recording {
                            recorder.finish(transport.playhead_beat(), feedback);
                        }
                        if self.slots[t][s].is_active() {
                            self.mark_changed(t, 0);
                        }
                        self.slots[t][s].state = ClipState::Empty;
                    }
                    // Playing/Recording in the snapshot are echoes of our own
                    // feedback, not intents
                    ClipState::Playing | ClipState::Recording => (),
                }
            }
        }
    }

    /// Launch a slot: queued to the next boundary while the transport runs,
    /// immediate (and transport-starting) otherwise.
    pub fn request_launch(
        &mut self,
        track: usize,
        scene: usize,
        transport: &mut Transport,
        feedback: &mut FeedbackTx,
    ) {
        // Launching cancels any other queue on the track
        self.cancel_other_queues(track, scene, feedback);

        if transport.playing() {
            self.set_state(track, scene, ClipState::Queued, feedback);
        } else {
            transport.play();
            feedback.push(Feedback::TransportPlaying { playing: true });
            self.stop_track_active(track, scene, 0, 0.0, None, feedback);
            self.slots[track][scene].started_at = 0.0;
            self.set_state(track, scene, ClipState::Playing, feedback);
            self.mark_changed(track, 0);
        }
    }

    /// Arm a slot for recording.
    pub fn request_record(
        &mut self,
        track: usize,
        scene: usize,
        snap: &Snapshot,
        transport: &mut Transport,
        recorder: &mut Recorder,
        feedback: &mut FeedbackTx,
    ) {
        if recorder.is_active() {
            // One recording at a time; a second arm is ignored
            return;
        }
        self.cancel_other_queues(track, scene, feedback);

        if transport.playing() {
            self.set_state(track, scene, ClipState::RecordQueued, feedback);
        } else {
            transport.play();
            feedback.push(Feedback::TransportPlaying { playing: true });
            self.stop_track_active(track, scene, 0, 0.0, None, feedback);
            self.begin_recording(track, scene, 0.0, snap, recorder);
            self.set_state(track, scene, ClipState::Recording, feedback);
            self.mark_changed(track, 0);
        }
    }

    /// Stop a slot. While the transport runs a playing clip keeps sounding
    /// until the boundary; a queued clip is dequeued immediately and a
    /// recording one is finalized immediately.
    pub fn request_stop(
        &mut self,
        track: usize,
        scene: usize,
        transport: &Transport,
        recorder: &mut Recorder,
        feedback: &mut FeedbackTx,
    ) {
        match self.slots[track][scene].state {
            ClipState::Queued | ClipState::RecordQueued => {
                self.set_state(track, scene, ClipState::Stopped, feedback);
            }
            ClipState::Playing => {
                if transport.playing() {
                    self.slots[track][scene].stop_pending = true;
                } else {
                    self.set_state(track, scene, ClipState::Stopped, feedback);
                    self.mark_changed(track, 0);
                }
            }
            ClipState::Recording => {
                recorder.finish(transport.playhead_beat(), feedback);
                self.set_state(track, scene, ClipState::Stopped, feedback);
                self.mark_changed(track, 0);
            }
            _ => (),
        }
    }

    /// Launch a whole scene through one shared boundary. Empty slots leave
    /// their track untouched; armed tracks record instead of playing.
    pub fn launch_scene(
        &mut self,
        scene: usize,
        snap: &Snapshot,
        transport: &mut Transport,
        recorder: &mut Recorder,
        feedback: &mut FeedbackTx,
    ) {
        if scene >= self.num_scenes {
            return;
        }
        for t in 0..self.num_tracks {
            let clip = snap.clip(t, scene);
            let armed = snap.tracks[t].armed;
            if armed && clip.state != ClipState::Recording {
                self.request_record(t, scene, snap, transport, recorder, feedback);
            } else if clip.state != ClipState::Empty {
                self.request_launch(t, scene, transport, feedback);
            }
        }
    }

    /// Stop everything and halt the transport (CC stop / UI stop-all).
    pub fn stop_all(
        &mut self,
        transport: &mut Transport,
        recorder: &mut Recorder,
        feedback: &mut FeedbackTx,
    ) {
        for t in 0..self.num_tracks {
            for s in 0..self.num_scenes {
                match self.slots[t][s].state {
                    ClipState::Recording => {
                        recorder.finish(transport.playhead_beat(), feedback);
                        self.set_state(t, s, ClipState::Stopped, feedback);
                        self.mark_changed(t, 0);
                    }
                    ClipState::Playing | ClipState::Queued | ClipState::RecordQueued => {
                        self.set_state(t, s, ClipState::Stopped, feedback);
                        self.mark_changed(t, 0);
                    }
                    _ => (),
                }
                self.slots[t][s].stop_pending = false;
            }
        }
        transport.stop();
        feedback.push(Feedback::TransportPlaying { playing: false });
    }

    /// Take all quantize-boundary transitions inside the block's span, then
    /// compute per-track playback for the graph.
    pub fn run_block(
        &mut self,
        snap: &Snapshot,
        transport: &Transport,
        span: BlockSpan,
        recorder: &mut Recorder,
        feedback: &mut FeedbackTx,
    ) {
        if transport.playing() && span.to > span.from {
            let quantize = transport.quantize();
            let mut boundary = quantize.next_boundary(span.from);
            while boundary < span.to {
                let offset =
                    transport.beats_to_samples(boundary - span.from).round() as u32;
                self.apply_boundary(boundary, offset, snap, recorder, feedback);
                match quantize.beats() {
                    Some(grid) => boundary += grid,
                    // Off: transitions fired immediately at block start
                    None => break,
                }
            }
        }

        self.compute_playback(snap, transport, span, recorder);

        if span.wrapped_by > 0.0 {
            for row in self.slots.iter_mut() {
                for slot in row.iter_mut() {
                    if slot.is_active() {
                        slot.started_at -= span.wrapped_by;
                    }
                }
            }
            recorder.shift_origin(span.wrapped_by);
        }
    }

    fn apply_boundary(
        &mut self,
        beat: f64,
        offset: u32,
        snap: &Snapshot,
        recorder: &mut Recorder,
        feedback: &mut FeedbackTx,
    ) {
        for t in 0..self.num_tracks {
            // Pending stops land on the boundary
            for s in 0..self.num_scenes {
                if self.slots[t][s].stop_pending && self.slots[t][s].state == ClipState::Playing {
                    self.slots[t][s].stop_pending = false;
                    self.set_state(t, s, ClipState::Stopped, feedback);
                    self.mark_changed(t, offset);
                }
            }

            // Then promotions; at most one queued slot exists per track
            if let Some(s) = self.find_state(t, ClipState::Queued) {
                self.stop_track_active(t, s, offset, beat, Some(&mut *recorder), feedback);
                self.slots[t][s].started_at = beat;
                self.set_state(t, s, ClipState::Playing, feedback);
                self.mark_changed(t, offset);
            } else if let Some(s) = self.find_state(t, ClipState::RecordQueued) {
                self.stop_track_active(t, s, offset, beat, Some(&mut *recorder), feedback);
                self.begin_recording(t, s, beat, snap, recorder);
                self.slots[t][s].started_at = beat;
                self.set_state(t, s, ClipState::Recording, feedback);
                self.mark_changed(t, offset);
            }
        }
    }

    fn begin_recording(
        &mut self,
        track: usize,
        scene: usize,
        beat: f64,
        snap: &Snapshot,
        recorder: &mut Recorder,
    ) {
        let clip = snap.clip(track, scene);
        let new_clip = clip.state == ClipState::Empty || clip.length_beats <= 0.0;
        let length = if new_clip {
            (snap.default_clip_bars * snap.beats_per_bar).max(1) as f64
        } else {
            clip.length_beats as f64
        };
        recorder.begin(track, scene, beat, length, new_clip);
        self.slots[track][scene].started_at = beat;
    }

    fn find_state(&self, track: usize, state: ClipState) -> Option<usize> {
        (0..self.num_scenes).find(|&s| self.slots[track][s].state == state)
    }

    fn cancel_other_queues(
        &mut self,
        track: usize,
        scene: usize,
        feedback: &mut FeedbackTx,
    ) {
        for s in 0..self.num_scenes {
            if s != scene
                && matches!(
                    self.slots[track][s].state,
                    ClipState::Queued | ClipState::RecordQueued
                )
            {
                self.set_state(track, s, ClipState::Stopped, feedback);
            }
        }
    }

    /// Stop whatever is active on `track` other than `scene`, finalizing a
    /// recording when the recorder is available.
    fn stop_track_active(
        &mut self,
        track: usize,
        scene: usize,
        offset: u32,
        beat: f64,
        mut recorder: Option<&mut Recorder>,
        feedback: &mut FeedbackTx,
    ) {
        for s in 0..self.num_scenes {
            if s == scene || !self.slots[track][s].is_active() {
                continue;
            }
            if self.slots[track][s].state == ClipState::Recording {
                match recorder.take() {
                    Some(recorder) => {
                        recorder.finish(beat, feedback);
                    }
                    None => {
                        // The immediate-launch path only runs with a stopped
                        // transport, where nothing can still be recording
                        deck_debug_assert_failure!("Recording stopped without finalizing");
                    }
                }
            }
            self.set_state(track, s, ClipState::Stopped, feedback);
            self.mark_changed(track, offset);
        }
    }

    fn set_state(
        &mut self,
        track: usize,
        scene: usize,
        state: ClipState,
        feedback: &mut FeedbackTx,
    ) {
        if self.slots[track][scene].state != state {
            self.slots[track][scene].state = state;
            feedback.push(Feedback::ClipState {
                track: track as u8,
                scene: scene as u8,
                state,
            });
        }
    }

    fn mark_changed(&mut self, track: usize, offset: u32) {
        // Keep the earliest change in the block
        match self.changed[track] {
            Some(existing) if existing <= offset => (),
            _ => self.changed[track] = Some(offset),
        }
    }

    fn compute_playback(
        &mut self,
        snap: &Snapshot,
        transport: &Transport,
        span: BlockSpan,
        recorder: &Recorder,
    ) {
        for t in 0..self.num_tracks {
            let changed = self.changed[t];
            let active = (0..self.num_scenes).find(|&s| self.slots[t][s].is_active());

            self.playback[t] = match active {
                None => TrackPlayback {
                    changed: changed.is_some(),
                    change_offset: changed.unwrap_or(0),
                    ..TrackPlayback::SILENT
                },
                Some(s) => {
                    let slot = &self.slots[t][s];
                    let recording = slot.state == ClipState::Recording;
                    let length = if recording {
                        recorder.length_beats()
                    } else {
                        snap.clip(t, s).length_beats.max(f32::EPSILON) as f64
                    };

                    let change_offset = changed.unwrap_or(0);
                    let begin_beat = span.from
                        + if change_offset > 0 {
                            change_offset as f64 * transport.beats_per_sample()
                        } else {
                            0.0
                        };
                    let raw_from = begin_beat - slot.started_at;
                    let raw_to = span.to - slot.started_at;
                    // Reduce into clip-local time, shifting both ends
                    // equally; a growing take runs on the unwrapped axis
                    let local_from = if recording && recorder.is_growing() {
                        raw_from.max(0.0)
                    } else {
                        raw_from.rem_euclid(length)
                    };
                    let local_to = raw_to - (raw_from - local_from);

                    TrackPlayback {
                        scene: s as i32,
                        changed: changed.is_some(),
                        change_offset,
                        local_from,
                        local_to,
                        length_beats: length,
                        recording,
                    }
                }
            };
        }
        self.changed = [None; MAX_TRACKS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::snapshot::ClipSnap;
    use rtrb::RingBuffer;

    const FRAME_RATE: f32 = 48_000.0;

    struct Fixture {
        launcher: Launcher,
        transport: Transport,
        recorder: Recorder,
        snap: Box<Snapshot>,
        tx: FeedbackTx,
        rx: rtrb::Consumer<Feedback>,
    }

    fn fixture(num_tracks: usize, num_scenes: usize) -> Fixture {
        let (tx, rx) = RingBuffer::new(1024);
        let tx = FeedbackTx::new(tx);
        let mut snap = Box::new(Snapshot::new(num_tracks, num_scenes));
        snap.playing = true;
        Fixture {
            launcher: Launcher::new(num_tracks, num_scenes),
            transport: Transport::new(FRAME_RATE),
            recorder: Recorder::new(),
            snap,
            tx,
            rx,
        }
    }

    fn put_clip(snap: &mut Snapshot, track: usize, scene: usize, length: f32) {
        let clip = snap.clip_mut(track, scene);
        *clip = ClipSnap::EMPTY;
        clip.state = ClipState::Stopped;
        clip.length_beats = length;
    }

    fn run(f: &mut Fixture, frames: usize) {
        let loop_len = f.launcher.loop_length(&f.snap, &f.recorder);
        let span = f.transport.advance(frames, loop_len);
        f.launcher
            .run_block(&f.snap, &f.transport, span, &mut f.recorder, &mut f.tx);
    }

    #[test]
    fn quantized_launch_lands_on_the_next_quarter() {
        let mut f = fixture(1, 1);
        put_clip(&mut f.snap, 0, 0, 4.0);
        f.transport.set_bpm(120.0);
        f.transport.play();

        // Get the playhead to beat 1.30
        run(&mut f, (1.30 * 24_000.0) as usize);
        assert!((f.transport.playhead_beat() - 1.30).abs() < 1e-6);

        f.launcher
            .request_launch(0, 0, &mut f.transport, &mut f.tx);
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Queued);

        // A block that stays short of beat 2.0 changes nothing
        run(&mut f, 4_800);
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Queued);

        // The block crossing beat 2.0 flips it to playing
        run(&mut f, 24_000);
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Playing);

        let playback = f.launcher.playback(0);
        assert_eq!(playback.scene, 0);
        assert!(playback.changed);
        // Boundary at beat 2.0 with the final block starting at 1.50
        let expected = ((2.0 - 1.50) * 24_000.0f64).round() as u32;
        assert_eq!(playback.change_offset, expected);
        assert!(playback.local_from.abs() < 1e-6);

        drop(f.rx);
    }

    #[test]
    fn launch_while_stopped_is_immediate() {
        let mut f = fixture(1, 1);
        put_clip(&mut f.snap, 0, 0, 4.0);
        assert!(!f.transport.playing());

        f.launcher
            .request_launch(0, 0, &mut f.transport, &mut f.tx);
        assert!(f.transport.playing());
        assert_eq!(f.transport.playhead_beat(), 0.0);
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Playing);

        run(&mut f, 4_800);
        let playback = f.launcher.playback(0);
        assert_eq!(playback.scene, 0);
        assert_eq!(playback.change_offset, 0);
        drop(f.rx);
    }

    #[test]
    fn launching_a_second_clip_cancels_the_first_queue() {
        let mut f = fixture(1, 2);
        put_clip(&mut f.snap, 0, 0, 4.0);
        put_clip(&mut f.snap, 0, 1, 4.0);
        f.transport.play();

        f.launcher
            .request_launch(0, 0, &mut f.transport, &mut f.tx);
        f.launcher
            .request_launch(0, 1, &mut f.transport, &mut f.tx);
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Stopped);
        assert_eq!(f.launcher.slot_state(0, 1), ClipState::Queued);
        drop(f.rx);
    }

    #[test]
    fn promotion_stops_the_previous_clip() {
        let mut f = fixture(1, 2);
        put_clip(&mut f.snap, 0, 0, 4.0);
        put_clip(&mut f.snap, 0, 1, 4.0);

        f.launcher
            .request_launch(0, 0, &mut f.transport, &mut f.tx);
        run(&mut f, 24_000);
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Playing);

        f.launcher
            .request_launch(0, 1, &mut f.transport, &mut f.tx);
        // Next quarter boundary: slot 1 takes over, slot 0 stops
        run(&mut f, 48_000);
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Stopped);
        assert_eq!(f.launcher.slot_state(0, 1), ClipState::Playing);
        drop(f.rx);
    }

    #[test]
    fn scene_launch_skips_empty_and_respects_armed() {
        let mut f = fixture(3, 3);
        put_clip(&mut f.snap, 0, 2, 4.0);
        put_clip(&mut f.snap, 2, 2, 4.0);
        // Track 1 scene 2 stays Empty
        f.transport.play();

        f.launcher
            .launch_scene(2, &f.snap, &mut f.transport, &mut f.recorder, &mut f.tx);
        assert_eq!(f.launcher.slot_state(0, 2), ClipState::Queued);
        assert_eq!(f.launcher.slot_state(1, 2), ClipState::Empty);
        assert_eq!(f.launcher.slot_state(2, 2), ClipState::Queued);
        drop(f.rx);
    }

    #[test]
    fn stop_waits_for_the_boundary_while_running() {
        let mut f = fixture(1, 1);
        put_clip(&mut f.snap, 0, 0, 4.0);

        f.launcher
            .request_launch(0, 0, &mut f.transport, &mut f.tx);
        run(&mut f, 12_000); // playhead at 0.5

        f.launcher
            .request_stop(0, 0, &f.transport, &mut f.recorder, &mut f.tx);
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Playing);

        run(&mut f, 24_000); // crosses beat 1.0
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Stopped);
        assert_eq!(f.launcher.playback(0).scene, -1);
        drop(f.rx);
    }

    #[test]
    fn record_queue_promotes_and_begins_recording() {
        let mut f = fixture(1, 1);
        // Slot stays Empty: recording a brand new clip
        f.transport.play();
        run(&mut f, 12_000);

        f.launcher
            .request_record(0, 0, &f.snap, &mut f.transport, &mut f.recorder, &mut f.tx);
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::RecordQueued);

        run(&mut f, 24_000); // crosses beat 1.0
        assert_eq!(f.launcher.slot_state(0, 0), ClipState::Recording);
        assert!(f.recorder.is_active());
        assert_eq!(f.recorder.target(), Some((0, 0)));
        assert!(f.launcher.playback(0).recording);
        drop(f.rx);
    }
}
