//! Integer oversampling for the nonlinear analog cores: render at ×2 or ×4
//! the host rate, then decimate through symmetric halfband FIR stages.

use super::fir_coefficients::{
    LP_FIR_HALFBAND_CENTER, LP_FIR_HALFBAND_CENTER_DELAY, LP_FIR_HALFBAND_EVEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OversampleFactor {
    X1,
    X2,
    X4,
}

impl OversampleFactor {
    #[inline]
    pub fn times(self) -> usize {
        match self {
            OversampleFactor::X1 => 1,
            OversampleFactor::X2 => 2,
            OversampleFactor::X4 => 4,
        }
    }

    pub fn from_times(times: usize) -> Option<Self> {
        match times {
            1 => Some(OversampleFactor::X1),
            2 => Some(OversampleFactor::X2),
            4 => Some(OversampleFactor::X4),
            _ => None,
        }
    }
}

/// One 2:1 decimation stage. The halfband's odd taps vanish, so the filter is
/// polyphase-split into an even-phase history (walked stride-1) plus a single
/// center tap on the odd-phase history.
#[derive(Debug, Clone)]
struct HalfbandDecimator {
    /// Same-parity history as the produced output samples, newest first.
    even_hist: [f32; 16],
    /// Opposite-parity history, newest first.
    odd_hist: [f32; 8],
}

impl HalfbandDecimator {
    fn new() -> Self {
        Self {
            even_hist: [0.0; 16],
            odd_hist: [0.0; 8],
        }
    }

    fn reset(&mut self) {
        self.even_hist = [0.0; 16];
        self.odd_hist = [0.0; 8];
    }

    /// Consume two inner-rate samples (`x0` first), produce one output sample
    /// aligned with `x1`.
    #[inline]
    fn process(&mut self, x0: f32, x1: f32) -> f32 {
        self.odd_hist.copy_within(0..7, 1);
        self.odd_hist[0] = x0;
        self.even_hist.copy_within(0..15, 1);
        self.even_hist[0] = x1;

        let mut acc = LP_FIR_HALFBAND_CENTER * self.odd_hist[LP_FIR_HALFBAND_CENTER_DELAY];
        for (tap, sample) in LP_FIR_HALFBAND_EVEN.iter().zip(self.even_hist.iter()) {
            acc += tap * sample;
        }
        acc
    }
}

/// Runs a per-sample render callback at 1×, 2×, or 4× the host rate and
/// decimates the result down to host-rate output. At ×1 the callback output
/// is passed straight through.
#[derive(Debug, Clone)]
pub struct Oversampler {
    factor: OversampleFactor,
    /// 2x → 1x stage, also the final stage of the ×4 chain.
    down_2x: HalfbandDecimator,
    /// 4x → 2x stage.
    down_4x: HalfbandDecimator,
}

impl Oversampler {
    pub fn new(factor: OversampleFactor) -> Self {
        Self {
            factor,
            down_2x: HalfbandDecimator::new(),
            down_4x: HalfbandDecimator::new(),
        }
    }

    #[inline]
    pub fn factor(&self) -> OversampleFactor {
        self.factor
    }

    /// Switch the factor mid-stream. The decimator histories are cleared; the
    /// short FIR ring-in stays far below audibility as long as the caller's
    /// signal path is gain-smoothed.
    pub fn set_factor(&mut self, factor: OversampleFactor) {
        if factor != self.factor {
            self.factor = factor;
            self.down_2x.reset();
            self.down_4x.reset();
        }
    }

    pub fn reset(&mut self) {
        self.down_2x.reset();
        self.down_4x.reset();
    }

    /// The rate the render callback runs at for a given host rate.
    pub fn inner_rate(&self, host_rate: f32) -> f32 {
        host_rate * self.factor.times() as f32
    }

    /// Fill `out` with host-rate samples, calling `render` once per inner
    /// sample.
    pub fn process(&mut self, out: &mut [f32], mut render: impl FnMut() -> f32) {
        match self.factor {
            OversampleFactor::X1 => {
                for sample in out.iter_mut() {
                    *sample = render();
                }
            }
            OversampleFactor::X2 => {
                for sample in out.iter_mut() {
                    let x0 = render();
                    let x1 = render();
                    *sample = self.down_2x.process(x0, x1);
                }
            }
            OversampleFactor::X4 => {
                for sample in out.iter_mut() {
                    let a = {
                        let x0 = render();
                        let x1 = render();
                        self.down_4x.process(x0, x1)
                    };
                    let b = {
                        let x0 = render();
                        let x1 = render();
                        self.down_4x.process(x0, x1)
                    };
                    *sample = self.down_2x.process(a, b);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_factor_is_a_passthrough() {
        let mut os = Oversampler::new(OversampleFactor::X1);
        let mut out = [0.0f32; 8];
        let mut n = 0;
        os.process(&mut out, || {
            n += 1;
            n as f32
        });
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn render_runs_at_the_inner_rate() {
        for (factor, expected) in [
            (OversampleFactor::X1, 16),
            (OversampleFactor::X2, 32),
            (OversampleFactor::X4, 64),
        ] {
            let mut os = Oversampler::new(factor);
            let mut out = [0.0f32; 16];
            let mut calls = 0usize;
            os.process(&mut out, || {
                calls += 1;
                0.0
            });
            assert_eq!(calls, expected);
        }
    }

    #[test]
    fn dc_passes_at_unity_gain() {
        let mut os = Oversampler::new(OversampleFactor::X4);
        let mut out = [0.0f32; 64];
        os.process(&mut out, || 1.0);
        // After both FIR delay lines fill, DC must come through at unity
        let settled = out[48];
        assert!((settled - 1.0).abs() < 1e-3, "settled = {settled}");
    }

    #[test]
    fn decimation_kills_inner_nyquist() {
        // A tone at the inner Nyquist (alternating signs at 2x) must not
        // survive decimation
        let mut os = Oversampler::new(OversampleFactor::X2);
        let mut out = [0.0f32; 64];
        let mut n = 0u32;
        os.process(&mut out, || {
            n += 1;
            if n % 2 == 0 {
                1.0
            } else {
                -1.0
            }
        });
        let peak = out[32..].iter().fold(0.0f32, |a, v| a.max(v.abs()));
        assert!(peak < 1e-3, "peak = {peak}");
    }
}
