//! The voltage-controlled amplifier stage.

use super::OnePole;

/// Control range of the exponential law, 60 dB.
const RANGE: f32 = 1_000.0;

/// Exponential VCA: a control value in `[0, 1]` maps onto a 60 dB gain curve,
/// with a 5 ms one-pole on the control to suppress zipper noise from coarse
/// envelope or automation updates.
#[derive(Debug, Clone)]
pub struct Vca {
    smoother: OnePole,
    ln_range: f32,
    norm: f32,
}

impl Vca {
    pub fn new(sample_rate: f32) -> Self {
        let mut smoother = OnePole::new(5e-3, sample_rate);
        smoother.reset(0.0);
        Self {
            smoother,
            ln_range: RANGE.ln(),
            norm: 1.0 / (RANGE - 1.0),
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.smoother.set_time_constant(5e-3, sample_rate);
    }

    pub fn reset(&mut self) {
        self.smoother.reset(0.0);
    }

    /// Advance one sample: smooth the control, apply the exponential law, and
    /// scale the input.
    #[inline]
    pub fn tick(&mut self, input: f32, control: f32) -> f32 {
        let c = self.smoother.next(control.clamp(0.0, 1.0));
        let gain = ((c * self.ln_range).exp() - 1.0) * self.norm;
        input * gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints() {
        let mut vca = Vca::new(48_000.0);
        // Settle at zero control
        for _ in 0..4_800 {
            assert_eq!(vca.tick(1.0, 0.0), 0.0);
        }
        // Then at full control
        let mut out = 0.0;
        for _ in 0..4_800 {
            out = vca.tick(1.0, 1.0);
        }
        assert!((out - 1.0).abs() < 0.01, "out = {out}");
    }

    #[test]
    fn control_is_smoothed() {
        let mut vca = Vca::new(48_000.0);
        vca.reset();
        // A full-scale control step must not arrive within one sample
        let first = vca.tick(1.0, 1.0);
        assert!(first < 0.1, "first = {first}");
    }
}
