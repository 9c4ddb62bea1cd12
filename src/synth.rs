//! The built-in analog-modeling polysynth: three oscillators into the ladder
//! filter and VCA per voice, driven through the uniform processor contract.

pub mod voice;

pub use voice::{Voice, VoicePool, VoiceRenderParams, NUM_VOICES};

use serde::{Deserialize, Serialize};

use crate::dsp::{OversampleFactor, Waveform};
use crate::event::{Event, EventList, Expression};
use crate::params::{ParamFlags, ParamInfo};
use crate::processor::{PortConfig, ProcessBlock, ProcessStatus, Processor, VoiceInfo};

/// Stable parameter ids. Enumeration order (for `param_info`) follows
/// [`PARAM_SPECS`]; these ids never change across versions.
pub mod param_ids {
    pub const OSC1_WAVE: u32 = 0;
    pub const OSC2_WAVE: u32 = 1;
    pub const OSC3_WAVE: u32 = 2;
    pub const OSC2_DETUNE: u32 = 3;
    pub const OSC3_DETUNE: u32 = 4;
    pub const OSC2_LEVEL: u32 = 5;
    pub const OSC3_LEVEL: u32 = 6;
    pub const PULSE_WIDTH: u32 = 7;
    pub const CUTOFF: u32 = 8;
    pub const RESONANCE: u32 = 9;
    pub const ENV_AMOUNT: u32 = 10;
    pub const ATTACK: u32 = 11;
    pub const DECAY: u32 = 12;
    pub const SUSTAIN: u32 = 13;
    pub const RELEASE: u32 = 14;
    pub const OVERSAMPLING: u32 = 15;
}

struct ParamSpec {
    id: u32,
    name: &'static str,
    min: f32,
    max: f32,
    default: f32,
    stepped: bool,
}

const PARAM_SPECS: &[ParamSpec] = &[
    ParamSpec { id: param_ids::OSC1_WAVE, name: "Osc 1 Wave", min: 0.0, max: 3.0, default: 0.0, stepped: true },
    ParamSpec { id: param_ids::OSC2_WAVE, name: "Osc 2 Wave", min: 0.0, max: 3.0, default: 0.0, stepped: true },
    ParamSpec { id: param_ids::OSC3_WAVE, name: "Osc 3 Wave", min: 0.0, max: 3.0, default: 2.0, stepped: true },
    ParamSpec { id: param_ids::OSC2_DETUNE, name: "Osc 2 Detune", min: -100.0, max: 100.0, default: 7.0, stepped: false },
    ParamSpec { id: param_ids::OSC3_DETUNE, name: "Osc 3 Detune", min: -100.0, max: 100.0, default: -7.0, stepped: false },
    ParamSpec { id: param_ids::OSC2_LEVEL, name: "Osc 2 Level", min: 0.0, max: 1.0, default: 0.6, stepped: false },
    ParamSpec { id: param_ids::OSC3_LEVEL, name: "Osc 3 Level", min: 0.0, max: 1.0, default: 0.0, stepped: false },
    ParamSpec { id: param_ids::PULSE_WIDTH, name: "Pulse Width", min: 0.01, max: 0.99, default: 0.5, stepped: false },
    ParamSpec { id: param_ids::CUTOFF, name: "Cutoff", min: 20.0, max: 20_000.0, default: 2_500.0, stepped: false },
    ParamSpec { id: param_ids::RESONANCE, name: "Resonance", min: 0.0, max: 4.5, default: 0.4, stepped: false },
    ParamSpec { id: param_ids::ENV_AMOUNT, name: "Env → Cutoff", min: -4.0, max: 4.0, default: 1.5, stepped: false },
    ParamSpec { id: param_ids::ATTACK, name: "Attack", min: 0.001, max: 5.0, default: 0.005, stepped: false },
    ParamSpec { id: param_ids::DECAY, name: "Decay", min: 0.001, max: 5.0, default: 0.15, stepped: false },
    ParamSpec { id: param_ids::SUSTAIN, name: "Sustain", min: 0.0, max: 1.0, default: 0.7, stepped: false },
    ParamSpec { id: param_ids::RELEASE, name: "Release", min: 0.001, max: 5.0, default: 0.25, stepped: false },
    ParamSpec { id: param_ids::OVERSAMPLING, name: "Oversampling", min: 0.0, max: 2.0, default: 0.0, stepped: true },
];

/// Plain parameter values, mirrored into the voices on change.
#[derive(Debug, Clone)]
struct SynthParams {
    values: [f32; PARAM_SPECS.len()],
}

impl SynthParams {
    fn new() -> Self {
        let mut values = [0.0; PARAM_SPECS.len()];
        for (value, spec) in values.iter_mut().zip(PARAM_SPECS) {
            *value = spec.default;
        }
        Self { values }
    }

    fn index_of(id: u32) -> Option<usize> {
        PARAM_SPECS.iter().position(|spec| spec.id == id)
    }

    fn get(&self, id: u32) -> Option<f32> {
        Self::index_of(id).map(|i| self.values[i])
    }

    fn set(&mut self, id: u32, value: f32) -> bool {
        match Self::index_of(id) {
            Some(i) => {
                let spec = &PARAM_SPECS[i];
                let mut v = value.clamp(spec.min, spec.max);
                if spec.stepped {
                    v = v.round();
                }
                self.values[i] = v;
                true
            }
            None => false,
        }
    }
}

fn waveform_of(value: f32) -> Waveform {
    match value as u32 {
        0 => Waveform::Saw,
        1 => Waveform::Triangle,
        2 => Waveform::Square,
        _ => Waveform::Pulse,
    }
}

fn factor_of(value: f32) -> OversampleFactor {
    match value as u32 {
        0 => OversampleFactor::X1,
        1 => OversampleFactor::X2,
        _ => OversampleFactor::X4,
    }
}

/// Serialized state blob contents.
#[derive(Serialize, Deserialize)]
struct SynthState {
    params: Vec<(u32, f32)>,
}

pub struct AnalogSynth {
    sample_rate: f32,
    params: SynthParams,
    pool: VoicePool,
    factor: OversampleFactor,
}

impl AnalogSynth {
    pub fn new() -> Self {
        Self {
            sample_rate: 48_000.0,
            params: SynthParams::new(),
            pool: VoicePool::new(48_000.0),
            factor: OversampleFactor::X1,
        }
    }

    fn render_params(&self) -> VoiceRenderParams {
        let p = &self.params;
        VoiceRenderParams {
            waves: [
                waveform_of(p.get(param_ids::OSC1_WAVE).unwrap_or(0.0)),
                waveform_of(p.get(param_ids::OSC2_WAVE).unwrap_or(0.0)),
                waveform_of(p.get(param_ids::OSC3_WAVE).unwrap_or(0.0)),
            ],
            osc_levels: [
                1.0,
                p.get(param_ids::OSC2_LEVEL).unwrap_or(0.0),
                p.get(param_ids::OSC3_LEVEL).unwrap_or(0.0),
            ],
            detune_cents: [
                0.0,
                p.get(param_ids::OSC2_DETUNE).unwrap_or(0.0),
                p.get(param_ids::OSC3_DETUNE).unwrap_or(0.0),
            ],
            pulse_width: p.get(param_ids::PULSE_WIDTH).unwrap_or(0.5),
            cutoff_hz: p.get(param_ids::CUTOFF).unwrap_or(2_500.0),
            resonance: p.get(param_ids::RESONANCE).unwrap_or(0.0),
            env_octaves: p.get(param_ids::ENV_AMOUNT).unwrap_or(0.0),
        }
    }

    /// Apply a parameter change and propagate it into the voice pool where
    /// needed.
    fn apply_param(&mut self, id: u32, value: f32) {
        if !self.params.set(id, value) {
            deck_debug_assert_failure!("Unknown parameter id {}", id);
            return;
        }

        match id {
            param_ids::OVERSAMPLING => {
                // Takes effect on voices started from here on; yanking the
                // decimator state under a sounding voice would click
                self.factor = factor_of(self.params.get(id).unwrap_or(0.0));
            }
            param_ids::ATTACK | param_ids::DECAY | param_ids::SUSTAIN | param_ids::RELEASE => {
                self.propagate_adsr();
            }
            _ => (),
        }
    }

    fn propagate_adsr(&mut self) {
        let attack = self.params.get(param_ids::ATTACK).unwrap_or(0.005);
        let decay = self.params.get(param_ids::DECAY).unwrap_or(0.15);
        let sustain = self.params.get(param_ids::SUSTAIN).unwrap_or(0.7);
        let release = self.params.get(param_ids::RELEASE).unwrap_or(0.25);
        for voice in self.pool.iter_mut() {
            voice.set_adsr(attack, decay, sustain, release);
        }
    }

    fn apply_event(&mut self, event: &Event) {
        match *event {
            Event::NoteOn {
                channel,
                key,
                velocity,
                note_id,
                ..
            } => {
                let sample_rate = self.sample_rate;
                let factor = self.factor;
                let voice = self.pool.note_on(channel, key, note_id, velocity);
                if voice.factor() != factor {
                    voice.configure(sample_rate, factor);
                }
            }
            Event::NoteOff {
                channel,
                key,
                note_id,
                ..
            } => {
                self.pool.note_off(channel, key, note_id);
            }
            Event::NoteChoke {
                channel,
                key,
                note_id,
                ..
            } => {
                self.pool.choke(channel, key, note_id);
            }
            Event::NoteExpression {
                note_id,
                key,
                expression,
                value,
                ..
            } => {
                self.route_expression(key, note_id, expression, value);
            }
            Event::ParamValue {
                param_id, value, ..
            } => {
                self.apply_param(param_id, value);
            }
            Event::Midi { data, .. } => self.apply_raw_midi(data),
        }
    }

    fn route_expression(&mut self, key: u8, note_id: i32, expression: Expression, value: f32) {
        if note_id >= 0 {
            for voice in self.pool.iter_active_mut() {
                if voice.note_id() == note_id {
                    voice.set_expression(expression, value);
                    return;
                }
            }
        }
        if let Some(voice) = self.pool.get_voice_by_key(key) {
            voice.set_expression(expression, value);
        }
    }

    fn apply_raw_midi(&mut self, data: [u8; 3]) {
        match data[0] & 0xf0 {
            0x90 if data[2] > 0 => {
                let sample_rate = self.sample_rate;
                let factor = self.factor;
                let voice =
                    self.pool
                        .note_on(data[0] & 0x0f, data[1], -1, data[2] as f32 / 127.0);
                if voice.factor() != factor {
                    voice.configure(sample_rate, factor);
                }
            }
            0x80 | 0x90 => {
                self.pool.note_off(data[0] & 0x0f, data[1], -1);
            }
            0xe0 => {
                // Pitch bend sweeps every active voice's tuning by ±2 semitones
                let raw = (data[2] as u16) << 7 | data[1] as u16;
                let semitones = (raw as f32 / 16_383.0 - 0.5) * 4.0;
                for voice in self.pool.iter_active_mut() {
                    voice.set_expression(Expression::Tuning, semitones);
                }
            }
            _ => (),
        }
    }
}

impl Default for AnalogSynth {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for AnalogSynth {
    fn name(&self) -> &str {
        "Analog"
    }

    fn init(&mut self, sample_rate: f32, _max_frames: usize) -> bool {
        self.sample_rate = sample_rate;
        for voice in self.pool.iter_mut() {
            voice.configure(sample_rate, self.factor);
        }
        self.propagate_adsr();
        true
    }

    fn reset(&mut self) {
        self.pool.reset();
    }

    fn process(&mut self, block: &mut ProcessBlock) -> ProcessStatus {
        let frames = block.frames;
        for channel in block.out_audio.iter_mut() {
            channel[..frames].fill(0.0);
        }

        // Split the block at event boundaries so note starts are
        // sample-accurate, then render every active voice per segment
        let events = block.in_events.as_slice();
        let mut next_event = 0usize;
        let mut cursor = 0usize;

        while cursor < frames {
            while next_event < events.len() && events[next_event].timing() as usize <= cursor {
                self.apply_event(&events[next_event]);
                next_event += 1;
            }

            let segment_end = if next_event < events.len() {
                (events[next_event].timing() as usize).clamp(cursor + 1, frames)
            } else {
                frames
            };

            let params = self.render_params();
            let [out_l, out_r] = &mut block.out_audio;
            let (seg_l, seg_r) = (
                &mut out_l[cursor..segment_end],
                &mut out_r[cursor..segment_end],
            );
            for voice in self.pool.iter_active_mut() {
                voice.render_into(seg_l, seg_r, &params);
            }

            cursor = segment_end;
        }

        // Late events on the last sample
        while next_event < events.len() {
            self.apply_event(&events[next_event]);
            next_event += 1;
        }

        self.pool.sweep_finished();

        if self.pool.active_count() > 0 {
            ProcessStatus::KeepAlive
        } else {
            ProcessStatus::Normal
        }
    }

    fn param_count(&self) -> usize {
        PARAM_SPECS.len()
    }

    fn param_info(&self, index: usize) -> Option<ParamInfo> {
        PARAM_SPECS.get(index).map(|spec| ParamInfo {
            id: spec.id,
            name: spec.name.to_string(),
            min: spec.min,
            max: spec.max,
            default: spec.default,
            flags: if spec.stepped {
                ParamFlags::AUTOMATABLE | ParamFlags::STEPPED
            } else {
                ParamFlags::AUTOMATABLE
            },
        })
    }

    fn param_value(&self, param_id: u32) -> Option<f32> {
        self.params.get(param_id)
    }

    fn flush_params(&mut self, in_events: &EventList, _out_events: &mut EventList) {
        for event in in_events.iter() {
            if let Event::ParamValue {
                param_id, value, ..
            } = event
            {
                self.apply_param(*param_id, *value);
            }
        }
    }

    fn save_state(&self) -> Option<Vec<u8>> {
        let state = SynthState {
            params: PARAM_SPECS
                .iter()
                .map(|spec| (spec.id, self.params.get(spec.id).unwrap_or(spec.default)))
                .collect(),
        };
        serde_json::to_vec(&state).ok()
    }

    fn load_state(&mut self, blob: &[u8]) -> bool {
        match serde_json::from_slice::<SynthState>(blob) {
            Ok(state) => {
                for (id, value) in state.params {
                    self.apply_param(id, value);
                }
                true
            }
            Err(err) => {
                deck_error!("Failed to restore synth state: {}", err);
                false
            }
        }
    }

    fn voice_info(&self) -> Option<VoiceInfo> {
        Some(VoiceInfo {
            active: self.pool.active_count() as u32,
            capacity: NUM_VOICES as u32,
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    fn make_block<'a>(
        frames: usize,
        in_events: &'a EventList,
        out_events: &'a mut EventList,
        left: &'a mut [f32],
        right: &'a mut [f32],
    ) -> ProcessBlock<'a> {
        ProcessBlock {
            steady_time: 0,
            frames,
            in_events,
            out_events,
            in_audio: [&[], &[]],
            out_audio: [left, right],
        }
    }

    #[test]
    fn produces_audio_for_a_note() {
        let mut synth = AnalogSynth::new();
        assert!(synth.init(48_000.0, 256));

        let mut in_events = EventList::with_capacity(8);
        in_events.push(Event::NoteOn {
            timing: 0,
            channel: 0,
            key: 69,
            velocity: 1.0,
            note_id: 1,
        });
        let mut out_events = EventList::with_capacity(8);
        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];

        let mut block = make_block(256, &in_events, &mut out_events, &mut left, &mut right);
        let status = synth.process(&mut block);
        assert_eq!(status, ProcessStatus::KeepAlive);

        let energy: f32 = left.iter().map(|v| v * v).sum();
        assert!(energy > 0.0);
        assert!(left.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn mid_block_note_start_is_sample_accurate() {
        let mut synth = AnalogSynth::new();
        assert!(synth.init(48_000.0, 256));

        let mut in_events = EventList::with_capacity(8);
        in_events.push(Event::NoteOn {
            timing: 128,
            channel: 0,
            key: 60,
            velocity: 1.0,
            note_id: 1,
        });
        let mut out_events = EventList::with_capacity(8);
        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];

        let mut block = make_block(256, &in_events, &mut out_events, &mut left, &mut right);
        synth.process(&mut block);

        assert!(left[..128].iter().all(|&v| v == 0.0));
        let tail_energy: f32 = left[128..].iter().map(|v| v * v).sum();
        assert!(tail_energy > 0.0);
    }

    #[test]
    fn state_round_trips_parameter_values() {
        let mut synth = AnalogSynth::new();
        synth.init(48_000.0, 64);
        synth.apply_param(param_ids::CUTOFF, 1_234.0);
        synth.apply_param(param_ids::RESONANCE, 3.3);

        let blob = synth.save_state().unwrap();

        let mut restored = AnalogSynth::new();
        restored.init(48_000.0, 64);
        assert!(restored.load_state(&blob));
        assert_eq!(restored.param_value(param_ids::CUTOFF), Some(1_234.0));
        assert_eq!(restored.param_value(param_ids::RESONANCE), Some(3.3));

        // Every parameter must match after the round trip
        for spec in PARAM_SPECS {
            assert_eq!(synth.param_value(spec.id), restored.param_value(spec.id));
        }
    }

    #[test]
    fn param_events_change_values_mid_block() {
        let mut synth = AnalogSynth::new();
        synth.init(48_000.0, 64);

        let mut in_events = EventList::with_capacity(8);
        in_events.push(Event::ParamValue {
            timing: 0,
            param_id: param_ids::CUTOFF,
            value: 440.0,
        });
        let mut out_events = EventList::with_capacity(8);
        let mut left = vec![0.0f32; 64];
        let mut right = vec![0.0f32; 64];
        let mut block = make_block(64, &in_events, &mut out_events, &mut left, &mut right);
        synth.process(&mut block);

        assert_eq!(synth.param_value(param_ids::CUTOFF), Some(440.0));
    }

    #[test]
    fn oversampling_keeps_running_voices_on_their_old_factor() {
        let mut synth = AnalogSynth::new();
        synth.init(48_000.0, 256);

        let mut in_events = EventList::with_capacity(8);
        in_events.push(Event::NoteOn {
            timing: 0,
            channel: 0,
            key: 60,
            velocity: 1.0,
            note_id: 1,
        });
        // Flip to ×4 mid-block, then start a second note
        in_events.push(Event::ParamValue {
            timing: 64,
            param_id: param_ids::OVERSAMPLING,
            value: 2.0,
        });
        in_events.push(Event::NoteOn {
            timing: 128,
            channel: 0,
            key: 64,
            velocity: 1.0,
            note_id: 2,
        });

        let mut out_events = EventList::with_capacity(8);
        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];
        let mut block = make_block(256, &in_events, &mut out_events, &mut left, &mut right);
        synth.process(&mut block);

        // The transition must not produce a discontinuity or non-finite
        // output; the first voice keeps rendering on its original factor
        assert!(left.iter().all(|v| v.is_finite()));
        let mut voices = 0;
        for voice in synth.pool.iter_active_mut() {
            match voice.note_id() {
                1 => assert_eq!(voice.factor(), crate::dsp::OversampleFactor::X1),
                2 => assert_eq!(voice.factor(), crate::dsp::OversampleFactor::X4),
                _ => (),
            }
            voices += 1;
        }
        assert_eq!(voices, 2);
    }

    #[test]
    fn voice_info_reports_the_pool() {
        let mut synth = AnalogSynth::new();
        synth.init(48_000.0, 64);
        let info = synth.voice_info().unwrap();
        assert_eq!(info.active, 0);
        assert_eq!(info.capacity, NUM_VOICES as u32);
    }
}
