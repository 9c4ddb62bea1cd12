//! Graph nodes: tagged variants over note sources, processor slots, and the
//! mixing primitives. Every node owns its output buffers; inputs are zero-copy
//! views into upstream nodes' outputs.

use std::cell::UnsafeCell;
use std::sync::Arc;

use atomic_float::AtomicF32;
use std::sync::atomic::Ordering;

use crate::event::{Event, EventList};
use crate::processor::{PluginSlot, ProcessBlock, ProcessStatus};
use crate::session::launcher::TrackPlayback;
use crate::session::snapshot::{MuteMetering, NoteSnap, Snapshot, MAX_NOTES_PER_CLIP, MAX_TRACKS};

/// Events a single node can emit per block: every clip note can both start
/// and end, plus headroom for live input and parameter changes.
pub const NODE_EVENT_CAPACITY: usize = MAX_NOTES_PER_CLIP * 2 + 128;

/// Fresh recorder notes get note ids above this so they never collide with
/// snapshot note indices.
const FRESH_NOTE_ID_BASE: i32 = 0x1_0000;

/// Per-track peak meters, written by the gain/master nodes on the audio
/// thread and read by the UI.
pub struct Meters {
    pub tracks: [AtomicF32; MAX_TRACKS],
    pub master: AtomicF32,
}

impl Meters {
    pub fn new() -> Self {
        Self {
            tracks: Default::default(),
            master: AtomicF32::new(0.0),
        }
    }
}

impl Default for Meters {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the nodes need for one block, immutable and shared with the
/// worker threads.
pub struct ProcessCtx<'a> {
    pub snapshot: &'a Snapshot,
    pub playback: &'a [TrackPlayback],
    /// Per-track live (monitoring) events for armed tracks, block-aligned.
    pub live_events: &'a [EventList],
    /// Notes committed by the recorder during the current take, played back
    /// on the recording track without waiting for a snapshot round-trip.
    pub fresh_notes: &'a [NoteSnap],
    pub frames: usize,
    pub steady_time: i64,
    pub sample_rate: f32,
    /// Samples per beat at the block's tempo.
    pub samples_per_beat: f64,
    /// A zeroed buffer of `max_frames` for nodes with no audio input.
    pub silence: &'a [f32],
}

impl ProcessCtx<'_> {
    /// Clamp an event offset into the block.
    #[inline]
    fn clamp_timing(&self, timing: u32) -> u32 {
        timing.min(self.frames.saturating_sub(1) as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Audio,
    Events,
}

/// A note the source has turned on and not yet turned off, remembered with
/// its key so it can be closed even after the clip disappears from the
/// snapshot.
type Sounding = Box<[Option<u8>; MAX_NOTES_PER_CLIP]>;

fn new_sounding() -> Sounding {
    Box::new([None; MAX_NOTES_PER_CLIP])
}

/// The per-kind state of a node.
pub enum NodeKind {
    /// Emits the playing clip's notes (plus live monitoring input) for one
    /// track as timestamped events.
    NoteSource {
        track: usize,
        /// Snapshot-note indices currently sounding.
        sounding: Sounding,
        /// Fresh recorder-note indices currently sounding.
        sounding_fresh: Sounding,
    },
    /// An instrument slot: consumes events, produces audio.
    Synth { track: usize, slot: Arc<PluginSlot> },
    /// An effect slot: audio in, audio out, plus an event input.
    Fx { slot: Arc<PluginSlot> },
    /// Per-track volume/mute/solo with ramped gain.
    Gain {
        track: usize,
        current_gain: f32,
        meters: Arc<Meters>,
    },
    /// Sums every connected audio input.
    Mixer,
    /// The graph's sink; its output is handed back to the engine.
    Master { meters: Arc<Meters> },
}

impl NodeKind {
    pub fn note_source(track: usize) -> Self {
        NodeKind::NoteSource {
            track,
            sounding: new_sounding(),
            sounding_fresh: new_sounding(),
        }
    }
}

pub struct Node {
    pub kind: NodeKind,
    pub audio_in: Vec<NodeId>,
    pub event_in: Vec<NodeId>,
    pub out_audio: [Vec<f32>; 2],
    pub out_events: EventList,
    /// Merged input events for processor nodes, reused every block.
    scratch_events: EventList,
}

impl Node {
    pub fn new(kind: NodeKind, max_frames: usize) -> Self {
        Self {
            kind,
            audio_in: Vec::new(),
            event_in: Vec::new(),
            out_audio: [vec![0.0; max_frames], vec![0.0; max_frames]],
            out_events: EventList::with_capacity(NODE_EVENT_CAPACITY),
            scratch_events: EventList::with_capacity(NODE_EVENT_CAPACITY),
        }
    }

    /// Run this node for one block. Upstream nodes referenced by `audio_in` /
    /// `event_in` have already completed; their outputs are stable for the
    /// rest of the block.
    pub fn process(&mut self, ctx: &ProcessCtx, nodes: &[UnsafeCell<Node>]) {
        match &mut self.kind {
            NodeKind::NoteSource {
                track,
                sounding,
                sounding_fresh,
            } => {
                let track = *track;
                self.out_events.clear();
                emit_note_source(ctx, track, sounding, sounding_fresh, &mut self.out_events);
                self.out_events.sort_by_timing();
            }
            NodeKind::Synth { slot, .. } => {
                let slot = slot.clone();
                self.process_slot(ctx, nodes, &slot, false);
            }
            NodeKind::Fx { slot } => {
                let slot = slot.clone();
                self.process_slot(ctx, nodes, &slot, true);
            }
            NodeKind::Gain {
                track,
                current_gain,
                meters,
            } => {
                let track = *track;
                let snap = ctx.snapshot;
                let t = &snap.tracks[track];
                let audible = !t.mute && (!snap.any_solo() || t.solo);
                let target = if audible { t.volume.clamp(0.0, 1.5) } else { 0.0 };

                let (in_l, in_r) = input_audio(nodes, self.audio_in.first(), ctx);
                let frames = ctx.frames;
                let step = (target - *current_gain) / frames.max(1) as f32;

                let mut peak: f32 = 0.0;
                let mut gain = *current_gain;
                for i in 0..frames {
                    gain += step;
                    let l = in_l[i] * gain;
                    let r = in_r[i] * gain;
                    self.out_audio[0][i] = l;
                    self.out_audio[1][i] = r;
                    let sample_peak = match snap.mute_metering {
                        // Pre-gain mute: the meter follows the muted output
                        MuteMetering::PreGain => l.abs().max(r.abs()),
                        // Post-gain metering keeps reading the would-be level
                        MuteMetering::PostGain => {
                            let v = t.volume.clamp(0.0, 1.5);
                            (in_l[i] * v).abs().max((in_r[i] * v).abs())
                        }
                    };
                    peak = peak.max(sample_peak);
                }
                *current_gain = target;
                meters.tracks[track].store(peak, Ordering::Relaxed);
            }
            NodeKind::Mixer => {
                let frames = ctx.frames;
                self.out_audio[0][..frames].fill(0.0);
                self.out_audio[1][..frames].fill(0.0);
                for &input in &self.audio_in {
                    let (in_l, in_r) = input_audio(nodes, Some(&input), ctx);
                    for i in 0..frames {
                        self.out_audio[0][i] += in_l[i];
                        self.out_audio[1][i] += in_r[i];
                    }
                }
            }
            NodeKind::Master { meters } => {
                let meters = meters.clone();
                let (in_l, in_r) = input_audio(nodes, self.audio_in.first(), ctx);
                let frames = ctx.frames;
                self.out_audio[0][..frames].copy_from_slice(&in_l[..frames]);
                self.out_audio[1][..frames].copy_from_slice(&in_r[..frames]);
                let mut peak: f32 = 0.0;
                for i in 0..frames {
                    peak = peak.max(in_l[i].abs().max(in_r[i].abs()));
                }
                meters.master.store(peak, Ordering::Relaxed);
            }
        }
    }

    /// Shared path for Synth and Fx nodes: lifecycle maintenance, event
    /// gathering, the processor call, and fault bypass.
    fn process_slot(
        &mut self,
        ctx: &ProcessCtx,
        nodes: &[UnsafeCell<Node>],
        slot: &PluginSlot,
        pass_through: bool,
    ) {
        slot.drain_lifecycle();

        let frames = ctx.frames;
        let (in_l, in_r) = input_audio(nodes, self.audio_in.first(), ctx);

        // Gather events: upstream note sources, then queued parameter changes
        // at block start, sorted into one timeline
        self.scratch_events.clear();
        for &input in &self.event_in {
            // SAFETY: `input` precedes this node in the topological order, so
            // its outputs are complete and no longer mutated this block.
            let upstream = unsafe { &*nodes[input.0].get() };
            self.scratch_events.extend_from(&upstream.out_events);
        }

        let bypass = slot.faulted();
        let status = if bypass {
            None
        } else {
            let scratch_events = &mut self.scratch_events;
            let out_events = &mut self.out_events;
            let out_audio = &mut self.out_audio;
            slot.with_active(|instance| {
                instance.params.drain(|change| {
                    scratch_events.push(Event::ParamValue {
                        timing: 0,
                        param_id: change.param_id,
                        value: change.value,
                    });
                });
                scratch_events.sort_by_timing();

                out_events.clear();
                let [out_l, out_r] = out_audio;
                let mut block = ProcessBlock {
                    steady_time: ctx.steady_time,
                    frames,
                    in_events: scratch_events,
                    out_events,
                    in_audio: [&in_l[..frames], &in_r[..frames]],
                    out_audio: [&mut out_l[..frames], &mut out_r[..frames]],
                };
                instance.processor.process(&mut block)
            })
        };

        match status {
            Some(ProcessStatus::Error(message)) => {
                deck_error!("Processor failed, bypassing: {}", message);
                slot.mark_fault();
                self.silence_or_pass(ctx, in_l, in_r, pass_through);
            }
            Some(_) => (),
            // Empty, not yet started, or fault-bypassed
            None => self.silence_or_pass(ctx, in_l, in_r, pass_through),
        }
    }

    fn silence_or_pass(&mut self, ctx: &ProcessCtx, in_l: &[f32], in_r: &[f32], pass: bool) {
        let frames = ctx.frames;
        self.out_events.clear();
        if pass {
            self.out_audio[0][..frames].copy_from_slice(&in_l[..frames]);
            self.out_audio[1][..frames].copy_from_slice(&in_r[..frames]);
            // A bypassed effect still forwards its events downstream
            self.out_events.extend_from(&self.scratch_events);
        } else {
            self.out_audio[0][..frames].fill(0.0);
            self.out_audio[1][..frames].fill(0.0);
        }
    }
}

/// Resolve a node's audio input, falling back to silence when unconnected.
fn input_audio<'a>(
    nodes: &'a [UnsafeCell<Node>],
    id: Option<&NodeId>,
    ctx: &ProcessCtx<'a>,
) -> (&'a [f32], &'a [f32]) {
    match id {
        // SAFETY: predecessors completed before this node was scheduled (the
        // dependency DAG is immutable during the block), so reading their
        // output buffers cannot race with a write.
        Some(id) => {
            let node = unsafe { &*nodes[id.0].get() };
            (&node.out_audio[0], &node.out_audio[1])
        }
        None => (ctx.silence, ctx.silence),
    }
}

/// Emit note on/off events for a track's playing clip, live input, and fresh
/// recorder notes into `out`. The caller sorts afterwards.
fn emit_note_source(
    ctx: &ProcessCtx,
    track: usize,
    sounding: &mut Sounding,
    sounding_fresh: &mut Sounding,
    out: &mut EventList,
) {
    let pb = &ctx.playback[track];

    // Live monitoring events are block-aligned at offset 0
    if let Some(live) = ctx.live_events.get(track) {
        out.extend_from(live);
    }

    // A clip change cuts everything still sounding at the change boundary
    if pb.changed {
        cut_all(sounding, 0, pb.change_offset, ctx, out);
        cut_all(sounding_fresh, FRESH_NOTE_ID_BASE, pb.change_offset, ctx, out);
    }

    if pb.scene < 0 || pb.local_to <= pb.local_from {
        return;
    }

    let clip = ctx.snapshot.clip(track, pb.scene as usize);

    // During recording the snapshot notes are the pre-take content; the
    // fresh notes are this take's commits
    let fresh: &[NoteSnap] = if pb.recording { ctx.fresh_notes } else { &[] };

    emit_clip_notes(clip.notes(), 0, sounding, pb, ctx, out);
    emit_clip_notes(fresh, FRESH_NOTE_ID_BASE, sounding_fresh, pb, ctx, out);
}

fn cut_all(sounding: &mut Sounding, id_base: i32, offset: u32, ctx: &ProcessCtx, out: &mut EventList) {
    for (idx, entry) in sounding.iter_mut().enumerate() {
        if let Some(key) = entry.take() {
            out.push(Event::NoteOff {
                timing: ctx.clamp_timing(offset),
                channel: 0,
                key,
                velocity: 0.0,
                note_id: id_base + idx as i32,
            });
        }
    }
}

fn emit_clip_notes(
    notes: &[NoteSnap],
    id_base: i32,
    sounding: &mut Sounding,
    pb: &TrackPlayback,
    ctx: &ProcessCtx,
    out: &mut EventList,
) {
    let length = pb.length_beats;
    if length <= 0.0 {
        return;
    }
    // The block covers clip-local beats [local_from, local_to) on an
    // unwrapped axis
    let window = pb.local_to - pb.local_from;

    // Map a clip-local beat into the window, in beats from its start
    let unwrap = |beat: f64| -> Option<f64> {
        let mut unwrapped = beat - pb.local_from;
        if unwrapped < 0.0 {
            unwrapped += length;
        }
        (unwrapped >= 0.0 && unwrapped < window).then_some(unwrapped)
    };
    let to_offset =
        |beats_in: f64| -> u32 { pb.change_offset + (beats_in * ctx.samples_per_beat) as u32 };

    for (idx, note) in notes.iter().enumerate().take(MAX_NOTES_PER_CLIP) {
        let note_id = id_base + idx as i32;
        let start = (note.start_beat as f64).rem_euclid(length);
        let end = (note.start_beat as f64 + note.duration_beats as f64).rem_euclid(length);

        // Close a note left sounding from an earlier pass
        if sounding[idx].is_some() {
            if let Some(at) = unwrap(end) {
                let key = sounding[idx].take().unwrap_or(note.key);
                out.push(Event::NoteOff {
                    timing: ctx.clamp_timing(to_offset(at)),
                    channel: 0,
                    key,
                    velocity: note.release,
                    note_id,
                });
            }
        }

        if let Some(at) = unwrap(start) {
            // Retrigger: a note still sounding when its start comes around
            // again is closed right at the restart
            if let Some(key) = sounding[idx].take() {
                out.push(Event::NoteOff {
                    timing: ctx.clamp_timing(to_offset(at)),
                    channel: 0,
                    key,
                    velocity: note.release,
                    note_id,
                });
            }

            out.push(Event::NoteOn {
                timing: ctx.clamp_timing(to_offset(at)),
                channel: 0,
                key: note.key,
                velocity: note.velocity,
                note_id,
            });
            sounding[idx] = Some(note.key);

            // A short note can end inside the same block
            let end_in = at + note.duration_beats as f64;
            if end_in < window {
                out.push(Event::NoteOff {
                    timing: ctx.clamp_timing(to_offset(end_in)),
                    channel: 0,
                    key: note.key,
                    velocity: note.release,
                    note_id,
                });
                sounding[idx] = None;
            }
        }
    }
}
