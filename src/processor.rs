//! The uniform processing contract every instrument and effect implements,
//! built-in or external. The shape follows the CLAP lifecycle: `init` →
//! `activate` → `start_processing` → `process`… → `stop_processing` →
//! `deactivate`, with parameter, state, and port introspection as optional
//! extensions.

use crate::event::EventList;
use crate::params::ParamInfo;

pub mod slot;

pub use slot::PluginSlot;

/// Indicates the current situation after a processor has processed audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Something went wrong while processing audio. The graph silences this
    /// node's output and latches its fault flag.
    Error(&'static str),
    /// Processing went fine. The host may suspend the processor when its
    /// input falls silent.
    Normal,
    /// The processor has a tail (reverb, delay) of the given length in
    /// samples.
    Tail(u32),
    /// The processor produces sound even from silent input and should not be
    /// suspended.
    KeepAlive,
}

/// Everything a processor sees for one span of audio.
pub struct ProcessBlock<'a> {
    /// A monotonic sample counter across the whole engine run. Never jumps
    /// backwards, also not when the musical transport does.
    pub steady_time: i64,
    /// Samples per channel in this block.
    pub frames: usize,
    pub in_events: &'a EventList,
    pub out_events: &'a mut EventList,
    pub in_audio: [&'a [f32]; 2],
    pub out_audio: [&'a mut [f32]; 2],
}

/// How many voices a polyphonic processor is using, for hosts that manage
/// per-voice modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceInfo {
    pub active: u32,
    pub capacity: u32,
}

/// Port direction descriptors. Stereo throughout; the flags only describe
/// which ports exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortConfig {
    pub has_input: bool,
    pub has_output: bool,
}

/// The uniform processor contract. All methods except the documented
/// UI-thread ones are called from the audio thread; `start_processing` and
/// `stop_processing` in particular are audio-thread only and bracket every
/// span of `process` calls.
#[allow(unused_variables)]
pub trait Processor: Send {
    /// A stable human-readable name, shown in fault logs.
    fn name(&self) -> &str;

    /// One-time setup with the rates and limits the processor will see.
    /// Returning `false` fails the load and leaves the slot empty.
    fn init(&mut self, sample_rate: f32, max_frames: usize) -> bool;

    /// Called when the host adds the processor to the graph. Buffers should
    /// be sized here, not in `process`.
    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    /// Audio-thread only. Called exactly once before the first `process` of a
    /// processing span.
    fn start_processing(&mut self) -> bool {
        true
    }

    /// Audio-thread only.
    fn stop_processing(&mut self) {}

    /// Clear voices, envelopes, and delay lines without touching parameters.
    fn reset(&mut self) {}

    fn process(&mut self, block: &mut ProcessBlock) -> ProcessStatus;

    //
    // `params` extension
    //

    fn param_count(&self) -> usize {
        0
    }

    /// Parameter metadata by enumeration index. UI thread; may allocate.
    fn param_info(&self, index: usize) -> Option<ParamInfo> {
        None
    }

    /// The current plain value of a parameter by stable id.
    fn param_value(&self, param_id: u32) -> Option<f32> {
        None
    }

    /// Apply parameter events while the processor is not processing, and let
    /// it emit any resulting output events. The audio-thread path for
    /// parameter changes is `ParamValue` events inside `process`.
    fn flush_params(&mut self, in_events: &EventList, out_events: &mut EventList) {}

    //
    // `state` extension (UI thread)
    //

    /// Serialize the full state to an opaque blob.
    fn save_state(&self) -> Option<Vec<u8>> {
        None
    }

    /// Restore state saved by [`save_state`][Self::save_state]. Returns
    /// `false` if the blob was not understood.
    fn load_state(&mut self, blob: &[u8]) -> bool {
        false
    }

    //
    // `gui` extension (UI thread)
    //

    /// Open the processor's own editor window, if it has one.
    fn show_gui(&mut self) {}

    fn hide_gui(&mut self) {}

    //
    // `voice_info` / port extensions
    //

    fn voice_info(&self) -> Option<VoiceInfo> {
        None
    }

    fn note_ports(&self) -> PortConfig {
        PortConfig::default()
    }

    fn audio_ports(&self) -> PortConfig {
        PortConfig {
            has_input: true,
            has_output: true,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A minimal instrument for graph and engine tests: writes a constant
    /// DC value for every sample a note is held.
    pub struct DcInstrument {
        pub level: f32,
        pub held: u32,
        pub started: bool,
    }

    impl DcInstrument {
        pub fn new(level: f32) -> Self {
            Self {
                level,
                held: 0,
                started: false,
            }
        }
    }

    impl Processor for DcInstrument {
        fn name(&self) -> &str {
            "dc instrument"
        }

        fn init(&mut self, _sample_rate: f32, _max_frames: usize) -> bool {
            true
        }

        fn start_processing(&mut self) -> bool {
            self.started = true;
            true
        }

        fn stop_processing(&mut self) {
            self.started = false;
        }

        fn process(&mut self, block: &mut ProcessBlock) -> ProcessStatus {
            for event in block.in_events.iter() {
                match event {
                    crate::event::Event::NoteOn { .. } => self.held += 1,
                    crate::event::Event::NoteOff { .. } => self.held = self.held.saturating_sub(1),
                    _ => (),
                }
            }
            let value = if self.held > 0 { self.level } else { 0.0 };
            for channel in block.out_audio.iter_mut() {
                channel[..block.frames].fill(value);
            }
            ProcessStatus::Normal
        }

        fn note_ports(&self) -> PortConfig {
            PortConfig {
                has_input: true,
                has_output: false,
            }
        }

        fn audio_ports(&self) -> PortConfig {
            PortConfig {
                has_input: false,
                has_output: true,
            }
        }
    }

    /// An effect that always fails, for fault-bypass tests.
    pub struct FaultyFx;

    impl Processor for FaultyFx {
        fn name(&self) -> &str {
            "faulty fx"
        }

        fn init(&mut self, _sample_rate: f32, _max_frames: usize) -> bool {
            true
        }

        fn process(&mut self, _block: &mut ProcessBlock) -> ProcessStatus {
            ProcessStatus::Error("synthetic fault")
        }
    }
}
