//! Everything needed to embed the engine.

// The logging/assert macros are exported at the crate root
pub use crate::{
    deck_debug_assert, deck_debug_assert_eq, deck_debug_assert_failure, deck_error, deck_log,
    deck_trace,
};

pub use crate::dsp::{
    Adsr, AdsrStage, AntiAliasMode, ExpoConverter, LadderFilter, OnePole, OversampleFactor,
    Oversampler, Oscillator, Vca, Waveform,
};
pub use crate::engine::{
    create_engine, CounterView, Engine, EngineConfig, EngineHandle, SessionSlots, TrackSlots,
};
pub use crate::error::EngineError;
pub use crate::event::{Event, EventList, Expression};
pub use crate::graph::{Graph, GraphBuilder, GraphError, Meters, Node, NodeId, NodeKind, PortKind, ProcessCtx};
pub use crate::midi::{midi_ring, KeyGrid, MidiAction, MidiDispatcher, MidiInput};
pub use crate::params::{ParamChange, ParamEventQueue, ParamFlags, ParamInfo};
pub use crate::processor::{
    PluginSlot, PortConfig, ProcessBlock, ProcessStatus, Processor, VoiceInfo,
};
pub use crate::session::{
    ClipState, Feedback, FeedbackTx, Launcher, MuteMetering, NoteSnap, Quantize, Recorder, RtGate,
    Snapshot, SnapshotPair, StdClock, TrackPlayback, Transport, UiClock, FX_PER_TRACK,
    MAX_NOTES_PER_CLIP, MAX_SCENES, MAX_TRACKS,
};
pub use crate::synth::{AnalogSynth, VoicePool, NUM_VOICES};
pub use crate::util;
