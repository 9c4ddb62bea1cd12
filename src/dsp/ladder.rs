//! The 24 dB/oct transistor ladder filter: four WDF-coupled capacitor
//! integrators whose transconductance is set by a shared bias current.

use super::{tanh_rat, VT};

/// Per-stage integration capacitance.
const LADDER_CAP_FARADS: f32 = 220e-9;
/// The bias current range of the exponential current source feeding the
/// ladder. Clamping the current clamps the cutoff to the range the circuit
/// can actually reach.
const IC_MIN_AMPS: f32 = 0.6e-6;
const IC_MAX_AMPS: f32 = 700e-6;
/// Input level scaling: the differential pairs live at transistor voltages,
/// so ±1 full-scale audio is padded down to a ±50 mV swing (about 2·Vt)
/// before it hits the first stage and scaled back up on the way out.
const INPUT_LEVEL: f32 = 0.05;

/// Moog-style ladder. Cutoff is expressed through the bias current
/// (`fc = Ic / (2π·Vt·C)`), per-stage currents saturate as
/// `Ic · tanh(Vdiff / 2Vt)`, and the resonance feedback is soft-clipped
/// before being subtracted from the input.
#[derive(Debug, Clone)]
pub struct LadderFilter {
    stages: [f32; 4],
    sample_rate: f32,
    resonance: f32,
    /// One-pole coefficient derived from the bias current.
    g: f32,
    makeup: f32,
}

impl LadderFilter {
    pub fn new(sample_rate: f32) -> Self {
        let mut filter = Self {
            stages: [0.0; 4],
            sample_rate,
            resonance: 0.0,
            g: 0.0,
            makeup: 1.0,
        };
        filter.set_cutoff(1_000.0);
        filter
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    pub fn reset(&mut self) {
        self.stages = [0.0; 4];
    }

    /// Set the cutoff frequency in hertz. The requested frequency is mapped
    /// onto the bias current and clamped to the current source's range, so
    /// the effective cutoff may differ from the request at the extremes.
    pub fn set_cutoff(&mut self, cutoff_hz: f32) {
        let ic = (2.0 * std::f32::consts::PI * VT * LADDER_CAP_FARADS * cutoff_hz)
            .clamp(IC_MIN_AMPS, IC_MAX_AMPS);
        // ωc = Ic / (Vt·C); the exponential step response form stays stable
        // for any ωc·ts
        let wc = ic / (VT * LADDER_CAP_FARADS);
        self.g = 1.0 - (-wc / self.sample_rate).exp();
    }

    /// `resonance` ranges 0 to 4.5; self-oscillation sets in near 4.
    pub fn set_resonance(&mut self, resonance: f32) {
        self.resonance = resonance.clamp(0.0, 4.5);
        // The feedback loop attenuates the passband by 1/(1 + k); make the
        // loss up so sweeping resonance doesn't duck the level
        self.makeup = 1.0 + self.resonance;
    }

    /// The effective cutoff in hertz after the bias-current clamp.
    pub fn cutoff(&self) -> f32 {
        let wc = -(1.0 - self.g).ln() * self.sample_rate;
        wc / (2.0 * std::f32::consts::PI)
    }

    #[inline]
    pub fn tick(&mut self, input: f32) -> f32 {
        let vt2 = 2.0 * VT;

        // Feedback from the fourth stage is soft-clipped by the same
        // differential-pair law before it recirculates
        let fb = vt2 * tanh_rat(self.stages[3] * self.resonance / vt2);
        let mut stage_in = input * INPUT_LEVEL - fb;

        for stage in self.stages.iter_mut() {
            // Ic · (tanh(v_in/2Vt) − tanh(v_out/2Vt)) charging the stage cap,
            // folded into the exact one-pole step
            *stage += self.g * vt2 * (tanh_rat(stage_in / vt2) - tanh_rat(*stage / vt2));
            stage_in = *stage;
        }

        self.stages[3] / INPUT_LEVEL * self.makeup
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.tick(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_dc_when_open() {
        let mut filter = LadderFilter::new(48_000.0);
        filter.set_cutoff(20_000.0);
        filter.set_resonance(0.0);
        let mut out = 0.0;
        for _ in 0..48_000 {
            out = filter.tick(0.5);
        }
        assert!((out - 0.5).abs() < 0.05, "out = {out}");
    }

    #[test]
    fn attenuates_above_cutoff() {
        let sample_rate = 48_000.0;
        let mut filter = LadderFilter::new(sample_rate);
        filter.set_cutoff(200.0);
        filter.set_resonance(0.0);

        // 8 kHz sine, 40 dB/decade above cutoff should crush it
        let mut peak: f32 = 0.0;
        for n in 0..48_000 {
            let x = (2.0 * std::f32::consts::PI * 8_000.0 * n as f32 / sample_rate).sin() * 0.5;
            let y = filter.tick(x);
            if n > 4_800 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.01, "peak = {peak}");
    }

    #[test]
    fn cutoff_clamps_to_bias_range() {
        let mut filter = LadderFilter::new(48_000.0);
        filter.set_cutoff(1.0);
        // Ic floor of 0.6 µA puts the lowest reachable cutoff around 17 Hz
        assert!(filter.cutoff() > 10.0);
        filter.set_cutoff(1.0e6);
        assert!(filter.cutoff() < 25_000.0);
    }

    #[test]
    fn stable_at_max_resonance() {
        let mut filter = LadderFilter::new(48_000.0);
        filter.set_cutoff(2_000.0);
        filter.set_resonance(4.5);
        // Impulse, then let it ring for a million samples
        let mut out = filter.tick(1.0);
        for _ in 0..1_000_000 {
            out = filter.tick(0.0);
            assert!(out.is_finite());
        }
        // Bounded: every internal node saturates
        assert!(out.abs() < 100.0);
    }
}
