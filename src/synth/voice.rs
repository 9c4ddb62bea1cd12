//! The fixed voice pool and per-voice DSP state.

use crate::dsp::{
    Adsr, AntiAliasMode, LadderFilter, Oscillator, OversampleFactor, Oversampler, Vca, Waveform,
};
use crate::event::{Expression, NUM_EXPRESSIONS};

/// Voices per instrument. The pool is a flat index-addressed array so voice
/// identity stays stable for the lifetime of a note.
pub const NUM_VOICES: usize = 128;

/// Vibrato LFO rate once the vibrato expression opens it up.
const VIBRATO_HZ: f32 = 5.0;
/// Vibrato depth at full expression, in semitones.
const VIBRATO_SEMITONES: f32 = 0.5;

/// Per-block constants a voice needs while rendering, derived from the synth
/// parameters once per segment instead of per voice.
#[derive(Debug, Clone, Copy)]
pub struct VoiceRenderParams {
    pub waves: [Waveform; 3],
    pub osc_levels: [f32; 3],
    pub detune_cents: [f32; 3],
    pub pulse_width: f32,
    pub cutoff_hz: f32,
    pub resonance: f32,
    /// Envelope-to-cutoff amount in octaves.
    pub env_octaves: f32,
}

/// One voice: identity, expression map, and the full oscillator → ladder →
/// VCA chain with its own oversampler.
pub struct Voice {
    active: bool,
    channel: u8,
    key: u8,
    note_id: i32,
    /// Monotonic age for the steal policy.
    internal_id: u64,
    velocity: f32,
    expr: [f32; NUM_EXPRESSIONS],

    oscs: [Oscillator; 3],
    filter: LadderFilter,
    vca: Vca,
    adsr: Adsr,
    oversampler: Oversampler,
    lfo_phase: f32,
    inner_rate: f32,
    factor: OversampleFactor,
}

impl Voice {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            active: false,
            channel: 0,
            key: 0,
            note_id: -1,
            internal_id: 0,
            velocity: 0.0,
            expr: [0.0; NUM_EXPRESSIONS],
            oscs: [
                Oscillator::new(440.0, sample_rate),
                Oscillator::new(440.0, sample_rate),
                Oscillator::new(440.0, sample_rate),
            ],
            filter: LadderFilter::new(sample_rate),
            vca: Vca::new(sample_rate),
            adsr: Adsr::new(sample_rate),
            oversampler: Oversampler::new(OversampleFactor::X1),
            lfo_phase: 0.0,
            inner_rate: sample_rate,
            factor: OversampleFactor::X1,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_released(&self) -> bool {
        self.adsr.is_released()
    }

    pub fn is_finished(&self) -> bool {
        self.active && self.adsr.is_idle()
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn note_id(&self) -> i32 {
        self.note_id
    }

    pub fn internal_id(&self) -> u64 {
        self.internal_id
    }

    pub fn matches(&self, channel: u8, key: u8, note_id: i32) -> bool {
        if note_id >= 0 {
            self.note_id == note_id
        } else {
            self.channel == channel && self.key == key
        }
    }

    /// The oversampling factor this voice was configured with. Factor changes
    /// only apply to voices started afterwards so a sounding voice never has
    /// its decimator state yanked out from under it.
    pub fn factor(&self) -> OversampleFactor {
        self.factor
    }

    /// The whole chain runs at the oversampler's inner rate; reconfigure every
    /// stage when the host rate or the oversampling factor changes.
    pub fn configure(&mut self, host_rate: f32, factor: OversampleFactor) {
        self.factor = factor;
        self.oversampler.set_factor(factor);
        self.inner_rate = self.oversampler.inner_rate(host_rate);
        let mode = if factor == OversampleFactor::X1 {
            AntiAliasMode::Digital
        } else {
            AntiAliasMode::Oversampled
        };
        for osc in self.oscs.iter_mut() {
            osc.set_sample_rate(self.inner_rate);
            osc.set_mode(mode);
        }
        self.filter.set_sample_rate(self.inner_rate);
        self.vca.set_sample_rate(self.inner_rate);
        self.adsr.set_sample_rate(self.inner_rate);
    }

    pub fn set_adsr(&mut self, attack: f32, decay: f32, sustain: f32, release: f32) {
        self.adsr.set_times(attack, decay, sustain, release);
    }

    pub fn start(
        &mut self,
        channel: u8,
        key: u8,
        note_id: i32,
        velocity: f32,
        internal_id: u64,
    ) {
        self.active = true;
        self.channel = channel;
        self.key = key;
        self.note_id = note_id;
        self.internal_id = internal_id;
        self.velocity = velocity;
        for (slot, expression) in self.expr.iter_mut().zip(EXPRESSIONS) {
            *slot = expression.neutral();
        }

        let cv = Self::key_cv(key);
        for osc in self.oscs.iter_mut() {
            osc.reset(cv);
        }
        self.filter.reset();
        self.vca.reset();
        self.oversampler.reset();
        self.lfo_phase = 0.0;
        self.adsr.trigger();
    }

    pub fn release(&mut self) {
        self.adsr.release();
    }

    pub fn choke(&mut self) {
        self.adsr.choke();
        self.active = false;
    }

    /// Reclaim a voice whose envelope has run out.
    pub fn sweep(&mut self) {
        if self.is_finished() {
            self.active = false;
        }
    }

    pub fn set_expression(&mut self, expression: Expression, value: f32) {
        self.expr[expression.index()] = value;
    }

    /// Pitch CV in volts (1 V/oct) for a MIDI key, relative to A4.
    #[inline]
    fn key_cv(key: u8) -> f32 {
        (key as f32 - 69.0) / 12.0
    }

    /// Render and accumulate `left.len()` samples into the stereo pair.
    pub fn render_into(&mut self, left: &mut [f32], right: &mut [f32], params: &VoiceRenderParams) {
        deck_debug_assert_eq!(left.len(), right.len());
        if !self.active {
            return;
        }

        let tuning = self.expr[Expression::Tuning.index()];
        let vibrato = self.expr[Expression::Vibrato.index()];
        let volume = self.expr[Expression::Volume.index()]
            * self.expr[Expression::Expression.index()];
        let pan = self.expr[Expression::Pan.index()].clamp(-1.0, 1.0);
        let brightness = self.expr[Expression::Brightness.index()];
        let pressure = self.expr[Expression::Pressure.index()];

        // Equal-power-ish pan without a trig call per sample
        let gain_l = (0.5 * (1.0 - pan)).sqrt();
        let gain_r = (0.5 * (1.0 + pan)).sqrt();

        // Brightness shifts the cutoff by ±2 octaves around its center value
        // and pressure drives the envelope amount up
        let cutoff_base = params.cutoff_hz * ((brightness - 0.5) * 4.0).exp2();
        let env_octaves = params.env_octaves * (1.0 + pressure);

        let base_cv = Self::key_cv(self.key) + tuning / 12.0;
        let velocity = self.velocity;
        let vib_step = VIBRATO_HZ / self.inner_rate;

        let Self {
            oscs,
            filter,
            vca,
            adsr,
            oversampler,
            lfo_phase,
            ..
        } = self;

        filter.set_resonance(params.resonance);
        for (osc, wave) in oscs.iter_mut().zip(params.waves) {
            osc.set_wave(wave);
            osc.set_pulse_width(params.pulse_width);
        }

        let mut scratch = [0.0f32; 1];
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            oversampler.process(&mut scratch, || {
                let env = adsr.next();

                *lfo_phase += vib_step;
                if *lfo_phase >= 1.0 {
                    *lfo_phase -= 1.0;
                }
                let vib_cv = vibrato
                    * VIBRATO_SEMITONES
                    * (std::f32::consts::TAU * *lfo_phase).sin()
                    / 12.0;

                let mut mix = 0.0;
                for ((osc, level), detune) in oscs
                    .iter_mut()
                    .zip(params.osc_levels)
                    .zip(params.detune_cents)
                {
                    if level > 0.0 {
                        mix += osc.next(base_cv + vib_cv + detune / 1200.0) * level;
                    }
                }

                filter.set_cutoff(cutoff_base * (env_octaves * env).exp2());
                let filtered = filter.tick(mix);

                vca.tick(filtered, env * velocity * volume)
            });

            *l += scratch[0] * gain_l;
            *r += scratch[0] * gain_r;
        }
    }
}

/// Iteration order for resetting the expression map.
const EXPRESSIONS: [Expression; NUM_EXPRESSIONS] = [
    Expression::Volume,
    Expression::Pan,
    Expression::Tuning,
    Expression::Vibrato,
    Expression::Expression,
    Expression::Brightness,
    Expression::Pressure,
];

/// The fixed pool. Never allocates after construction; note-ons reuse
/// finished voices and steal when the pool is exhausted.
pub struct VoicePool {
    voices: Vec<Voice>,
    next_internal_id: u64,
}

impl VoicePool {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            voices: (0..NUM_VOICES).map(|_| Voice::new(sample_rate)).collect(),
            next_internal_id: 0,
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.iter_mut()
    }

    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.iter_mut().filter(|v| v.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    pub fn reset(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.choke();
        }
        self.next_internal_id = 0;
    }

    /// Allocate a voice for a note-on: a free voice if one exists, otherwise
    /// the oldest released voice, otherwise the oldest held voice.
    pub fn note_on(
        &mut self,
        channel: u8,
        key: u8,
        note_id: i32,
        velocity: f32,
    ) -> &mut Voice {
        let internal_id = self.next_internal_id;
        self.next_internal_id = self.next_internal_id.wrapping_add(1);

        let index = self
            .voices
            .iter()
            .position(|v| !v.is_active())
            .unwrap_or_else(|| self.steal_index());

        let voice = &mut self.voices[index];
        voice.start(channel, key, note_id, velocity, internal_id);
        voice
    }

    fn steal_index(&self) -> usize {
        // Oldest released first so held notes survive as long as possible
        let released = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_released())
            .min_by_key(|(_, v)| v.internal_id());
        if let Some((index, _)) = released {
            return index;
        }

        self.voices
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| v.internal_id())
            .map(|(index, _)| index)
            // The pool is never empty
            .unwrap_or(0)
    }

    /// Release every voice matching the address. A non-negative `note_id`
    /// targets that exact voice.
    pub fn note_off(&mut self, channel: u8, key: u8, note_id: i32) {
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.matches(channel, key, note_id) {
                voice.release();
                if note_id >= 0 {
                    return;
                }
            }
        }
    }

    pub fn choke(&mut self, channel: u8, key: u8, note_id: i32) {
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.matches(channel, key, note_id) {
                voice.choke();
                if note_id >= 0 {
                    return;
                }
            }
        }
    }

    /// The most recent active voice on a key, for routing modulation events
    /// that address keys rather than note ids.
    pub fn get_voice_by_key(&mut self, key: u8) -> Option<&mut Voice> {
        self.voices
            .iter_mut()
            .filter(|v| v.is_active() && v.key() == key)
            .max_by_key(|v| v.internal_id())
    }

    /// Reclaim voices whose envelopes finished during the last block.
    pub fn sweep_finished(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.sweep();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_reclaims() {
        let mut pool = VoicePool::new(48_000.0);
        pool.note_on(0, 60, -1, 0.8);
        pool.note_on(0, 64, -1, 0.8);
        assert_eq!(pool.active_count(), 2);

        pool.note_off(0, 60, -1);
        let voice = pool.get_voice_by_key(60).unwrap();
        assert!(voice.is_released());

        // The released voice is not reclaimed until its envelope runs out
        pool.sweep_finished();
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn steals_oldest_released_first() {
        let mut pool = VoicePool::new(48_000.0);
        for key in 0..NUM_VOICES as u8 {
            pool.note_on(0, key, -1, 0.5);
        }
        assert_eq!(pool.active_count(), NUM_VOICES);

        // Release two, the older one must be stolen first
        pool.note_off(0, 3, -1);
        pool.note_off(0, 10, -1);
        let stolen = pool.note_on(0, 120, -1, 0.5);
        assert_eq!(stolen.key(), 120);
        assert!(pool.get_voice_by_key(3).is_none());
        assert!(pool.get_voice_by_key(10).is_some());
    }

    #[test]
    fn steals_oldest_held_when_nothing_released() {
        let mut pool = VoicePool::new(48_000.0);
        for key in 0..NUM_VOICES as u8 {
            pool.note_on(0, key, -1, 0.5);
        }
        pool.note_on(1, 0, -1, 0.5);
        // Key 0 on channel 0 was the oldest note and got stolen
        let survivor = pool.get_voice_by_key(0).unwrap();
        assert_eq!(survivor.channel(), 1);
    }

    #[test]
    fn note_id_addresses_one_voice() {
        let mut pool = VoicePool::new(48_000.0);
        pool.note_on(0, 60, 7, 0.5);
        pool.note_on(0, 60, 8, 0.5);
        pool.note_off(0, 60, 7);

        let released: usize = {
            let mut n = 0;
            for v in pool.iter_active_mut() {
                if v.is_released() {
                    n += 1;
                }
            }
            n
        };
        assert_eq!(released, 1);
    }

    #[test]
    fn renders_audio_after_note_on() {
        let mut pool = VoicePool::new(48_000.0);
        let voice = pool.note_on(0, 69, -1, 1.0);
        voice.set_adsr(0.001, 0.1, 0.8, 0.1);

        let params = VoiceRenderParams {
            waves: [Waveform::Saw; 3],
            osc_levels: [1.0, 0.0, 0.0],
            detune_cents: [0.0; 3],
            pulse_width: 0.5,
            cutoff_hz: 10_000.0,
            resonance: 0.0,
            env_octaves: 0.0,
        };
        let mut left = [0.0f32; 512];
        let mut right = [0.0f32; 512];
        voice.render_into(&mut left, &mut right, &params);

        let energy: f32 = left.iter().map(|v| v * v).sum();
        assert!(energy > 0.0);
        assert!(left.iter().all(|v| v.is_finite()));
    }
}
