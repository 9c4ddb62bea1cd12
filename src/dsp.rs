//! The signal-processing kernel behind the built-in instrument: analog-modeled
//! oscillator and ladder filter cores, envelopes, the VCA, and the integer
//! oversampler that lets the nonlinear cores run above the host rate.
//!
//! The analog cores are wave digital filter (WDF) discretizations: each
//! reactive element becomes a one-port with a port resistance and a reflected
//! wave, which keeps component values (the 10 nF oscillator capacitor, the
//! ladder's bias currents) meaningful in the digital model.

mod envelope;
mod fir_coefficients;
mod ladder;
mod oscillator;
mod oversampling;
mod vca;

pub use envelope::{Adsr, AdsrStage};
pub use ladder::LadderFilter;
pub use oscillator::{AntiAliasMode, ExpoConverter, Oscillator, SawCore, Waveform};
pub use oversampling::{OversampleFactor, Oversampler};
pub use vca::Vca;

/// Thermal voltage at room temperature, in volts. Both analog cores lean on
/// this for their transistor models.
pub const VT: f32 = 0.026;

/// A one-pole lowpass smoother for control signals. Used with a 2 ms time
/// constant on oscillator CV and 5 ms on the VCA to suppress zipper noise.
#[derive(Debug, Clone, Default)]
pub struct OnePole {
    coeff: f32,
    state: f32,
}

impl OnePole {
    pub fn new(time_constant_secs: f32, sample_rate: f32) -> Self {
        let mut smoother = Self::default();
        smoother.set_time_constant(time_constant_secs, sample_rate);
        smoother
    }

    /// Reconfigure the smoother. Needs to be called again when the sample
    /// rate changes.
    pub fn set_time_constant(&mut self, time_constant_secs: f32, sample_rate: f32) {
        deck_debug_assert!(sample_rate > 0.0);
        self.coeff = 1.0 - (-1.0 / (time_constant_secs * sample_rate)).exp();
    }

    /// Jump to `value` without smoothing.
    pub fn reset(&mut self, value: f32) {
        self.state = value;
    }

    #[inline]
    pub fn next(&mut self, target: f32) -> f32 {
        self.state += self.coeff * (target - self.state);
        self.state
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.state
    }
}

/// Cheap `tanh` via the rational approximation `x(27 + x²) / (27 + 9x²)`.
/// Accurate to a few percent over `[-3, 3]`; the input is clamped to that
/// range since the rational form diverges outside it.
#[inline]
pub fn tanh_rat(x: f32) -> f32 {
    let x = x.clamp(-3.0, 3.0);
    let x2 = x * x;
    x * (27.0 + x2) / (27.0 + 9.0 * x2)
}

/// The 4-point polynomial bandlimited step correction. For a step
/// discontinuity at normalized phase 0 with per-sample phase increment `dt`,
/// returns the residual to add around the discontinuity and exactly zero in
/// `dt <= t <= 1 - dt`.
#[inline]
pub fn polyblep(t: f32, dt: f32) -> f32 {
    if dt <= 0.0 {
        return 0.0;
    }
    if t < dt {
        let x = t / dt;
        x * (2.0 - x) - 1.0
    } else if t > 1.0 - dt {
        let x = (t - 1.0) / dt;
        x * x + 2.0 * x + 1.0
    } else {
        0.0
    }
}

/// The integrated counterpart of [`polyblep`], correcting slope
/// discontinuities. Dimensionless; callers scale by the slope change times
/// `dt`.
#[inline]
pub fn polyblamp(t: f32, dt: f32) -> f32 {
    if dt <= 0.0 {
        return 0.0;
    }
    if t < dt {
        let x = t / dt - 1.0;
        -(x * x * x) / 3.0
    } else if t > 1.0 - dt {
        let x = (t - 1.0) / dt + 1.0;
        (x * x * x) / 3.0
    } else {
        0.0
    }
}

/// A wave digital one-port capacitor discretized with the bilinear transform.
/// The reflected wave equals the previous incident wave; driving the port
/// with a known current yields the trapezoidal voltage update
/// `v[n] = v[n-1] + R(i[n] + i[n-1])` with `R = ts / 2C`.
#[derive(Debug, Clone, Default)]
pub struct WdfCapacitor {
    port_r: f32,
    incident: f32,
}

impl WdfCapacitor {
    pub fn new(capacitance: f32, sample_rate: f32) -> Self {
        let mut cap = Self::default();
        cap.set_sample_rate(capacitance, sample_rate);
        cap
    }

    pub fn set_sample_rate(&mut self, capacitance: f32, sample_rate: f32) {
        deck_debug_assert!(capacitance > 0.0 && sample_rate > 0.0);
        self.port_r = 1.0 / (2.0 * capacitance * sample_rate);
    }

    /// Port resistance in ohms.
    #[inline]
    pub fn port_resistance(&self) -> f32 {
        self.port_r
    }

    /// Drive the port with current `i` (amps, into the capacitor) for one
    /// sample and return the resulting port voltage.
    #[inline]
    pub fn tick(&mut self, i: f32) -> f32 {
        let reflected = self.incident;
        let v = reflected + self.port_r * i;
        self.incident = v + self.port_r * i;
        v
    }

    /// Like [`tick()`][Self::tick()], but with a resistive load of the given
    /// conductance (siemens) across the port. The load is solved implicitly,
    /// which keeps discharge through small resistances stable:
    /// `v = (b + R·i) / (1 + R·g)`.
    #[inline]
    pub fn tick_loaded(&mut self, i: f32, load_conductance: f32) -> f32 {
        let reflected = self.incident;
        let v = (reflected + self.port_r * i) / (1.0 + self.port_r * load_conductance);
        self.incident = 2.0 * v - reflected;
        v
    }

    /// Empty the capacitor.
    pub fn reset(&mut self) {
        self.incident = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn polyblep_zero_in_the_flat_region() {
        let dt = 0.01;
        let mut t = dt;
        while t <= 1.0 - dt {
            assert_eq!(polyblep(t, dt), 0.0, "t = {t}");
            t += 0.007;
        }
        assert_eq!(polyblamp(0.5, dt), 0.0);
    }

    #[test]
    fn polyblep_endpoints() {
        let dt = 0.1;
        // Approaching the wrap from both sides the residual tends to -1/+1 so
        // the corrected step is halved on each side
        assert_relative_eq!(polyblep(0.0, dt), -1.0);
        assert_relative_eq!(polyblep(1.0 - 1e-7, dt), 1.0, epsilon = 1e-5);
        // And it fades to zero at the window edges
        assert_relative_eq!(polyblep(dt, dt), 0.0);
        assert_relative_eq!(polyblamp(dt, dt), 0.0);
    }

    #[test]
    fn tanh_rat_tracks_tanh() {
        let mut x = -3.0f32;
        while x <= 3.0 {
            assert_relative_eq!(tanh_rat(x), x.tanh(), epsilon = 0.03);
            x += 0.125;
        }
        // Clamped outside the accurate range instead of diverging
        assert!(tanh_rat(10.0) <= 1.01);
        assert!(tanh_rat(-10.0) >= -1.01);
    }

    #[test]
    fn wdf_capacitor_integrates_current() {
        // 1 µF at 1 kHz driven with a constant 1 mA charges by
        // i/C = 1000 V/s, so 1 V per millisecond
        let mut cap = WdfCapacitor::new(1e-6, 1000.0);
        let mut v = 0.0;
        for _ in 0..1000 {
            v = cap.tick(1e-3);
        }
        // The trapezoidal rule loses half a sample at the start
        assert_relative_eq!(v, 1000.0 * 1e-3 / 1e-6 * 1e-3, max_relative = 0.01);
    }

    #[test]
    fn one_pole_converges() {
        let mut smoother = OnePole::new(0.005, 48_000.0);
        smoother.reset(0.0);
        let mut v = 0.0;
        // Five time constants in
        for _ in 0..(48_000 / 200 * 5) {
            v = smoother.next(1.0);
        }
        assert!(v > 0.99);
    }
}
