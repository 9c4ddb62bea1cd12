//! The per-callback engine entry and the UI-thread handle.
//!
//! One `Engine` lives on the audio thread and is driven with interleaved
//! stereo buffers of any size (oversized callbacks are chunked to the
//! configured maximum). The paired `EngineHandle` lives on the UI thread and
//! owns snapshot publication, plug-in loading, graph rebuilds, and the
//! feedback drain. A `MidiInput` producer goes to whichever thread polls the
//! MIDI devices.

use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::EngineError;
use crate::event::{Event, EventList};
use crate::graph::{Graph, GraphBuilder, GraphError, Meters, NodeKind, PortKind, ProcessCtx};
use crate::midi::{midi_ring, KeyGrid, MidiAction, MidiDispatcher, MidiInput, MIDI_RING_CAPACITY};
use crate::params::{ParamChange, ParamInfo};
use crate::processor::slot::SlotInstance;
use crate::processor::{PluginSlot, Processor};
use crate::session::snapshot::{SmartParamSnap, MAX_SMART_PARAMS};
use crate::session::{
    Feedback, FeedbackTx, Launcher, Recorder, RtGate, Snapshot, SnapshotPair, StdClock, Transport,
    UiClock, FX_PER_TRACK, MAX_SCENES, MAX_TRACKS,
};
use crate::util::with_callback_guard;

/// Feedback events buffered between UI drains.
const FEEDBACK_RING_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// 44.1 kHz up to 192 kHz.
    pub sample_rate: f32,
    /// Largest block the graph is sized for; bigger callbacks are chunked.
    pub max_frames: usize,
    pub num_tracks: usize,
    pub num_scenes: usize,
    /// Graph worker threads; 0 selects the serial executor.
    pub graph_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            max_frames: 512,
            num_tracks: 4,
            num_scenes: 4,
            graph_workers: 0,
        }
    }
}

impl EngineConfig {
    /// Check the configuration against the supported ranges before any
    /// buffers get sized from it.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (44_100.0..=192_000.0).contains(&self.sample_rate),
            "sample rate {} Hz is outside the supported 44.1 kHz to 192 kHz range",
            self.sample_rate
        );
        anyhow::ensure!(self.max_frames > 0, "max_frames must be nonzero");
        anyhow::ensure!(self.num_tracks > 0, "at least one track is required");
        anyhow::ensure!(self.num_scenes > 0, "at least one scene is required");
        Ok(())
    }
}

/// The plug-in slots of one track: an instrument and a fixed effect chain.
pub struct TrackSlots {
    pub instrument: Arc<PluginSlot>,
    pub effects: Vec<Arc<PluginSlot>>,
}

/// Every slot in the session. Allocated once for the maximum track count so
/// the audio thread can resolve (track, device) without locks; graph rebuilds
/// only re-wire which slots are reachable.
pub struct SessionSlots {
    pub tracks: Vec<TrackSlots>,
    pub master_fx: Vec<Arc<PluginSlot>>,
}

impl SessionSlots {
    fn new() -> Self {
        Self {
            tracks: (0..MAX_TRACKS)
                .map(|_| TrackSlots {
                    instrument: Arc::new(PluginSlot::new()),
                    effects: (0..FX_PER_TRACK).map(|_| Arc::new(PluginSlot::new())).collect(),
                })
                .collect(),
            master_fx: (0..FX_PER_TRACK).map(|_| Arc::new(PluginSlot::new())).collect(),
        }
    }

    /// Resolve the smart-param addressing scheme: device 0 is the
    /// instrument, 1..=F the track effects.
    fn device(&self, track: usize, device: usize) -> Option<&Arc<PluginSlot>> {
        let track = self.tracks.get(track)?;
        match device {
            0 => Some(&track.instrument),
            n => track.effects.get(n - 1),
        }
    }

    fn all_slots(&self) -> impl Iterator<Item = &Arc<PluginSlot>> {
        self.tracks
            .iter()
            .flat_map(|t| std::iter::once(&t.instrument).chain(t.effects.iter()))
            .chain(self.master_fx.iter())
    }
}

/// State shared between the engine, the handle, and (via `Arc` clones inside
/// graph nodes) the workers.
struct Shared {
    gate: RtGate,
    snapshots: SnapshotPair,
    /// The active graph, swapped under the rebuild barrier. Null only before
    /// the first build.
    graph: AtomicPtr<Graph>,
    slots: SessionSlots,
    meters: Arc<Meters>,
    /// Parameter changes lost to queue contention or overflow.
    param_dropped: AtomicU32,
    sample_rate: f32,
    max_frames: usize,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let ptr = self.graph.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !ptr.is_null() {
            // SAFETY: nothing can observe the pointer once Shared drops.
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

/// Build the session topology: per track
/// `NoteSource → Synth → [NoteSource → Fx]* → Gain`, all gains into the
/// mixer, mixer through the master effects into the master sink.
fn build_session_graph(
    slots: &SessionSlots,
    meters: &Arc<Meters>,
    num_tracks: usize,
    max_frames: usize,
    workers: usize,
) -> Result<Graph, GraphError> {
    let mut builder = GraphBuilder::new(max_frames);
    let mixer = builder.add_node(NodeKind::Mixer);

    for (track, track_slots) in slots.tracks.iter().enumerate().take(num_tracks) {
        let notes = builder.add_node(NodeKind::note_source(track));
        let synth = builder.add_node(NodeKind::Synth {
            track,
            slot: track_slots.instrument.clone(),
        });
        builder.connect(notes, synth, PortKind::Events)?;

        let mut chain = synth;
        for fx_slot in &track_slots.effects {
            let fx_notes = builder.add_node(NodeKind::note_source(track));
            let fx = builder.add_node(NodeKind::Fx {
                slot: fx_slot.clone(),
            });
            builder.connect(fx_notes, fx, PortKind::Events)?;
            builder.connect(chain, fx, PortKind::Audio)?;
            chain = fx;
        }

        let gain = builder.add_node(NodeKind::Gain {
            track,
            current_gain: 1.0,
            meters: meters.clone(),
        });
        builder.connect(chain, gain, PortKind::Audio)?;
        builder.connect(gain, mixer, PortKind::Audio)?;
    }

    let mut chain = mixer;
    for fx_slot in &slots.master_fx {
        let fx = builder.add_node(NodeKind::Fx {
            slot: fx_slot.clone(),
        });
        builder.connect(chain, fx, PortKind::Audio)?;
        chain = fx;
    }
    let master = builder.add_node(NodeKind::Master {
        meters: meters.clone(),
    });
    builder.connect(chain, master, PortKind::Audio)?;

    builder.build(workers)
}

/// Create an engine. Returns the audio-thread engine, the UI-thread handle,
/// and the MIDI producer for the poll thread.
pub fn create_engine(config: EngineConfig) -> Result<(Engine, EngineHandle, MidiInput), EngineError> {
    if let Err(err) = config.validate() {
        deck_error!("Refusing engine configuration: {:#}", err);
        return Err(EngineError::DeviceUnavailable);
    }

    let num_tracks = config.num_tracks.min(MAX_TRACKS);
    let num_scenes = config.num_scenes.min(MAX_SCENES);

    let meters = Arc::new(Meters::new());
    let slots = SessionSlots::new();
    let graph = build_session_graph(
        &slots,
        &meters,
        num_tracks,
        config.max_frames,
        config.graph_workers,
    )
    .map_err(|_| EngineError::OutOfMemory)?;

    let shared = Arc::new(Shared {
        gate: RtGate::new(),
        snapshots: SnapshotPair::new(num_tracks, num_scenes),
        graph: AtomicPtr::new(Box::into_raw(Box::new(graph))),
        slots,
        meters,
        param_dropped: AtomicU32::new(0),
        sample_rate: config.sample_rate,
        max_frames: config.max_frames,
    });

    let (midi_input, midi_consumer) = midi_ring();
    let (feedback_producer, feedback_consumer) = rtrb::RingBuffer::new(FEEDBACK_RING_CAPACITY);
    let feedback = FeedbackTx::new(feedback_producer);

    let engine = Engine {
        shared: shared.clone(),
        transport: Transport::new(config.sample_rate),
        launcher: Launcher::new(num_tracks, num_scenes),
        recorder: Recorder::new(),
        recorder_was_active: false,
        dispatcher: MidiDispatcher::new(midi_consumer),
        keys: KeyGrid::new(),
        feedback_dropped: feedback.dropped_counter(),
        feedback,
        actions: Vec::with_capacity(MIDI_RING_CAPACITY),
        live_events: (0..num_tracks)
            .map(|_| EventList::with_capacity(MIDI_RING_CAPACITY))
            .collect(),
        silence: vec![0.0; config.max_frames],
        steady_time: 0,
        smart_page: 0,
        last_ui_playing: false,
        sample_rate: config.sample_rate,
        max_frames: config.max_frames,
    };

    let handle = EngineHandle {
        midi_dropped: midi_input.dropped_counter(),
        feedback_dropped: engine.feedback_dropped.clone(),
        feedback_rx: feedback_consumer,
        clock: Arc::new(StdClock),
        config,
        shared,
    };

    Ok((engine, handle, midi_input))
}

/// The audio-thread half.
pub struct Engine {
    shared: Arc<Shared>,
    transport: Transport,
    launcher: Launcher,
    recorder: Recorder,
    recorder_was_active: bool,
    dispatcher: MidiDispatcher,
    keys: KeyGrid,
    feedback: FeedbackTx,
    feedback_dropped: Arc<AtomicU32>,
    /// Scratch for the block's classified MIDI actions.
    actions: Vec<MidiAction>,
    /// Per-track live monitoring events.
    live_events: Vec<EventList>,
    silence: Vec<f32>,
    steady_time: i64,
    smart_page: u8,
    last_ui_playing: bool,
    sample_rate: f32,
    max_frames: usize,
}

impl Engine {
    /// Render one callback's worth of interleaved stereo. Never fails, never
    /// blocks, never allocates: a mid-rebuild engine outputs silence for the
    /// affected blocks.
    pub fn process(&mut self, output: &mut [f32]) {
        deck_debug_assert_eq!(output.len() % 2, 0);

        with_callback_guard(|| {
            let total = output.len() / 2;
            let mut done = 0usize;
            while done < total {
                let frames = (total - done).min(self.max_frames);
                let chunk = &mut output[done * 2..(done + frames) * 2];
                self.process_block(frames, chunk);
                done += frames;
            }
        });
    }

    /// The monotonic sample counter.
    pub fn steady_time(&self) -> i64 {
        self.steady_time
    }

    /// The musical playhead, wrapped against the active loop.
    pub fn playhead_beat(&self) -> f64 {
        self.transport.playhead_beat()
    }

    /// Whether the audio-side transport is running.
    pub fn playing(&self) -> bool {
        self.transport.playing()
    }

    fn process_block(&mut self, frames: usize, out: &mut [f32]) {
        let Engine {
            shared,
            transport,
            launcher,
            recorder,
            recorder_was_active,
            dispatcher,
            keys,
            feedback,
            actions,
            live_events,
            silence,
            steady_time,
            smart_page,
            last_ui_playing,
            sample_rate,
            ..
        } = self;

        // The UI holds the rebuild barrier: don't touch the graph, emit
        // silence, keep the steady clock honest
        if shared.gate.rebuilding() {
            out.fill(0.0);
            *steady_time += frames as i64;
            return;
        }

        shared.gate.enter_block();
        let snap = shared.snapshots.acquire(&shared.gate);

        // Transport settings follow the snapshot; play/stop intents are
        // edge-detected like the clip intents
        transport.set_bpm(snap.bpm as f64);
        transport.set_quantize(snap.quantize);
        if snap.playing != *last_ui_playing {
            if snap.playing {
                if !transport.playing() {
                    transport.play();
                }
            } else {
                launcher.stop_all(transport, recorder, feedback);
            }
            *last_ui_playing = snap.playing;
        }

        // Drain and classify this block's MIDI
        keys.begin_block();
        for events in live_events.iter_mut() {
            events.clear();
        }
        actions.clear();
        dispatcher.drain(|action| {
            if actions.len() < actions.capacity() {
                actions.push(action);
            }
        });

        let num_tracks = (snap.num_tracks as usize).min(live_events.len());
        let any_armed = snap.tracks[..num_tracks].iter().any(|t| t.armed);
        let monitored = |track: usize| -> bool {
            if any_armed {
                snap.tracks[track].armed
            } else {
                track == snap.smart.track as usize
            }
        };

        for index in 0..actions.len() {
            let action = actions[index];
            match action {
                MidiAction::NoteOn {
                    channel,
                    key,
                    velocity,
                } => {
                    keys.note_on(key, velocity);
                    for track in 0..num_tracks {
                        if monitored(track) {
                            live_events[track].push(Event::NoteOn {
                                timing: 0,
                                channel,
                                key,
                                velocity,
                                note_id: -1,
                            });
                        }
                    }
                }
                MidiAction::NoteOff {
                    channel,
                    key,
                    velocity,
                } => {
                    keys.note_off(key);
                    for track in 0..num_tracks {
                        if monitored(track) {
                            live_events[track].push(Event::NoteOff {
                                timing: 0,
                                channel,
                                key,
                                velocity,
                                note_id: -1,
                            });
                        }
                    }
                }
                MidiAction::SceneLaunch { scene } => {
                    launcher.launch_scene(scene as usize, snap, transport, recorder, feedback);
                }
                MidiAction::Fader { track, volume } => {
                    if (track as usize) < num_tracks {
                        feedback.push(Feedback::TrackVolume { track, volume });
                    }
                }
                MidiAction::MuteToggle { track } => {
                    if (track as usize) < num_tracks {
                        feedback.push(Feedback::TrackMute {
                            track,
                            mute: !snap.tracks[track as usize].mute,
                        });
                    }
                }
                MidiAction::SmartKnob { knob, value } => {
                    let smart = &snap.smart;
                    let index = *smart_page as usize * 8 + knob as usize;
                    if index < (smart.num_params as usize).min(MAX_SMART_PARAMS) {
                        let param = smart.params[index];
                        let plain = param.min + value * (param.max - param.min);
                        let queued = shared
                            .slots
                            .device(smart.track as usize, smart.device as usize)
                            .map(|slot| {
                                slot.queue_param_change(ParamChange {
                                    param_id: param.id,
                                    value: plain,
                                })
                            })
                            .unwrap_or(false);
                        if !queued {
                            shared.param_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                MidiAction::SmartPagePrev | MidiAction::SmartPageNext => {
                    let pages = ((snap.smart.num_params as usize + 7) / 8).max(1) as u8;
                    *smart_page = if matches!(action, MidiAction::SmartPageNext) {
                        (*smart_page + 1).min(pages - 1)
                    } else {
                        smart_page.saturating_sub(1)
                    };
                    feedback.push(Feedback::SmartPage { page: *smart_page });
                }
                MidiAction::Stop => {
                    launcher.stop_all(transport, recorder, feedback);
                }
                MidiAction::Play => {
                    if !transport.playing() {
                        transport.play();
                        feedback.push(Feedback::TransportPlaying { playing: true });
                    }
                }
                MidiAction::LoopToggle => {
                    let enabled = transport.toggle_loop();
                    feedback.push(Feedback::LoopToggled { enabled });
                }
                MidiAction::RecordToggle => {
                    let track = snap.smart.track;
                    if (track as usize) < num_tracks {
                        feedback.push(Feedback::TrackArmed {
                            track,
                            armed: !snap.tracks[track as usize].armed,
                        });
                    }
                }
                MidiAction::PitchBend { channel, value } => {
                    let raw = (value.clamp(0.0, 1.0) * 16_383.0) as u16;
                    let data = [0xe0 | channel, (raw & 0x7f) as u8, (raw >> 7) as u8];
                    for track in 0..num_tracks {
                        if monitored(track) {
                            live_events[track].push(Event::Midi { timing: 0, data });
                        }
                    }
                }
                MidiAction::ChannelPressure { channel, pressure } => {
                    let data = [0xd0 | channel, (pressure * 127.0) as u8, 0];
                    for track in 0..num_tracks {
                        if monitored(track) {
                            live_events[track].push(Event::Midi { timing: 0, data });
                        }
                    }
                }
                MidiAction::ProgramChange { channel, program } => {
                    let data = [0xc0 | channel, program, 0];
                    for track in 0..num_tracks {
                        if monitored(track) {
                            live_events[track].push(Event::Midi { timing: 0, data });
                        }
                    }
                }
                MidiAction::OtherCc { channel, cc, value } => {
                    let data = [0xb0 | channel, cc, (value * 127.0) as u8];
                    for track in 0..num_tracks {
                        if monitored(track) {
                            live_events[track].push(Event::Midi { timing: 0, data });
                        }
                    }
                }
            }
        }

        // Session machinery: intents, beat advance, boundary transitions
        launcher.reconcile(snap, transport, recorder, feedback);
        let loop_length = launcher.loop_length(snap, recorder);
        let span = transport.advance(frames, loop_length);
        launcher.run_block(snap, transport, span, recorder, feedback);

        // Feed the recorder from the key grid
        if recorder.is_active() {
            if !*recorder_was_active {
                // Keys already held when recording began open at the start
                let start = recorder.start_beat();
                for key in keys.held() {
                    let velocity = keys.velocity(key);
                    recorder.note_on(key, velocity, start);
                }
            } else {
                for key in keys.just_pressed() {
                    let velocity = keys.velocity(key);
                    recorder.note_on(key, velocity, span.from);
                }
                for key in keys.just_released() {
                    recorder.note_off(key, 0.0, span.from, feedback);
                }
            }
            recorder.advance(span.to, feedback);
        }
        *recorder_was_active = recorder.is_active();

        // Evaluate the graph
        let ctx = ProcessCtx {
            snapshot: snap,
            playback: launcher.playbacks(),
            live_events: live_events.as_slice(),
            fresh_notes: recorder.fresh_notes(),
            frames,
            steady_time: *steady_time,
            sample_rate: *sample_rate,
            samples_per_beat: transport.beats_to_samples(1.0),
            silence: silence.as_slice(),
        };

        let graph_ptr = shared.graph.load(Ordering::Acquire);
        if graph_ptr.is_null() {
            out.fill(0.0);
        } else {
            // SAFETY: graph swaps only happen under the rebuild barrier,
            // which this block checked before entering.
            let graph = unsafe { &*graph_ptr };
            graph.process(&ctx);
            let (left, right) = graph.master_output();
            for i in 0..frames {
                out[i * 2] = left[i];
                out[i * 2 + 1] = right[i];
            }
        }

        *steady_time += frames as i64;
        shared.gate.exit_block();
    }
}

/// The UI-thread half.
pub struct EngineHandle {
    shared: Arc<Shared>,
    clock: Arc<dyn UiClock>,
    feedback_rx: rtrb::Consumer<Feedback>,
    midi_dropped: Arc<AtomicU32>,
    feedback_dropped: Arc<AtomicU32>,
    config: EngineConfig,
}

/// Overflow counters for the UI's diagnostics surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterView {
    pub midi_dropped: u32,
    pub feedback_dropped: u32,
    pub param_dropped: u32,
}

impl EngineHandle {
    /// Publish a new session snapshot. Blocks (1 ms polls) while a block is
    /// in flight or a rebuild is running; audio never waits for the UI.
    pub fn publish(&self, edit: impl FnOnce(&mut Snapshot)) {
        self.shared
            .snapshots
            .publish(&self.shared.gate, &*self.clock, edit);
    }

    /// Drain the audio thread's feedback events.
    pub fn drain_feedback(&mut self, mut apply: impl FnMut(Feedback)) {
        while let Ok(event) = self.feedback_rx.pop() {
            apply(event);
        }
    }

    pub fn load_instrument(
        &self,
        track: usize,
        processor: Box<dyn Processor>,
    ) -> Result<Vec<ParamInfo>, EngineError> {
        let slot = self
            .shared
            .slots
            .tracks
            .get(track)
            .map(|t| t.instrument.clone())
            .ok_or(EngineError::InvalidState)?;
        self.install(&slot, processor)
    }

    pub fn load_effect(
        &self,
        track: usize,
        index: usize,
        processor: Box<dyn Processor>,
    ) -> Result<Vec<ParamInfo>, EngineError> {
        let slot = self
            .shared
            .slots
            .tracks
            .get(track)
            .and_then(|t| t.effects.get(index))
            .cloned()
            .ok_or(EngineError::InvalidState)?;
        self.install(&slot, processor)
    }

    pub fn load_master_effect(
        &self,
        index: usize,
        processor: Box<dyn Processor>,
    ) -> Result<Vec<ParamInfo>, EngineError> {
        let slot = self
            .shared
            .slots
            .master_fx
            .get(index)
            .cloned()
            .ok_or(EngineError::InvalidState)?;
        self.install(&slot, processor)
    }

    fn install(
        &self,
        slot: &PluginSlot,
        mut processor: Box<dyn Processor>,
    ) -> Result<Vec<ParamInfo>, EngineError> {
        if !processor.init(self.shared.sample_rate, self.shared.max_frames) {
            deck_error!("Plug-in '{}' refused to initialize", processor.name());
            return Err(EngineError::PluginLoadFailed);
        }
        processor.activate();

        let infos = (0..processor.param_count())
            .filter_map(|index| processor.param_info(index))
            .collect();

        slot.install(
            Box::new(SlotInstance::new(processor)),
            &self.shared.gate,
            &*self.clock,
        );
        Ok(infos)
    }

    pub fn unload_instrument(&self, track: usize) -> Result<(), EngineError> {
        let slot = self
            .shared
            .slots
            .tracks
            .get(track)
            .map(|t| t.instrument.clone())
            .ok_or(EngineError::InvalidState)?;
        slot.uninstall(&self.shared.gate, &*self.clock);
        Ok(())
    }

    pub fn unload_effect(&self, track: usize, index: usize) -> Result<(), EngineError> {
        let slot = self
            .shared
            .slots
            .tracks
            .get(track)
            .and_then(|t| t.effects.get(index))
            .cloned()
            .ok_or(EngineError::InvalidState)?;
        slot.uninstall(&self.shared.gate, &*self.clock);
        Ok(())
    }

    /// Whether a slot has latched its fault flag since the last clear.
    pub fn slot_faulted(&self, track: usize, device: usize) -> bool {
        self.shared
            .slots
            .device(track, device)
            .map(|slot| slot.faulted())
            .unwrap_or(false)
    }

    pub fn clear_slot_fault(&self, track: usize, device: usize) {
        if let Some(slot) = self.shared.slots.device(track, device) {
            slot.clear_fault();
        }
    }

    /// Deactivate and drop retired plug-in instances. Call this from the UI
    /// loop; it is the deallocating half of the slot hand-off.
    pub fn housekeeping(&self) {
        for slot in self.shared.slots.all_slots() {
            slot.drain_disposed();
        }
    }

    /// Rebuild the graph for a new track count (or worker count). On failure
    /// the previous graph keeps running and an error is returned.
    pub fn rebuild_graph(&self, num_tracks: usize, workers: usize) -> Result<(), EngineError> {
        let num_tracks = num_tracks.min(MAX_TRACKS);
        let graph = build_session_graph(
            &self.shared.slots,
            &self.shared.meters,
            num_tracks,
            self.shared.max_frames,
            workers,
        )
        .map_err(|err| {
            deck_error!("Graph rebuild failed: {}", err);
            EngineError::OutOfMemory
        })?;

        self.shared.gate.begin_rebuild(&*self.clock);
        let old = self
            .shared
            .graph
            .swap(Box::into_raw(Box::new(graph)), Ordering::AcqRel);
        self.shared.gate.end_rebuild();

        if !old.is_null() {
            // SAFETY: the barrier guaranteed no block was using it, and the
            // new pointer is already published.
            drop(unsafe { Box::from_raw(old) });
        }
        Ok(())
    }

    /// Point the smart-param knobs at a device, publishing its parameter
    /// ranges into the snapshot.
    pub fn set_smart_target(&self, track: usize, device: usize, params: &[ParamInfo]) {
        self.publish(|snap| {
            snap.smart.track = track as u8;
            snap.smart.device = device as u8;
            snap.smart.num_params = params.len().min(MAX_SMART_PARAMS) as u32;
            for (slot, info) in snap.smart.params.iter_mut().zip(params) {
                *slot = SmartParamSnap {
                    id: info.id,
                    min: info.min,
                    max: info.max,
                };
            }
        });
    }

    pub fn meters(&self) -> Arc<Meters> {
        self.shared.meters.clone()
    }

    pub fn counters(&self) -> CounterView {
        CounterView {
            midi_dropped: self.midi_dropped.load(Ordering::Relaxed),
            feedback_dropped: self.feedback_dropped.load(Ordering::Relaxed),
            param_dropped: self.shared.param_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }
}
