//! The ADSR envelope: linear attack, exponential decay and release.

/// Exponential segments are considered done when they get within this factor
/// of their target, then snap. This reaches 99.99% of the distance over the
/// configured segment time.
const EXP_TERMINATION: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdsrStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// One envelope instance. Times are in seconds; the per-sample steps are
/// recomputed whenever a time or the sample rate changes, so changing the
/// sample rate mid-note keeps segment durations instead of segment slopes.
#[derive(Debug, Clone)]
pub struct Adsr {
    stage: AdsrStage,
    value: f32,

    attack_secs: f32,
    decay_secs: f32,
    sustain: f32,
    release_secs: f32,
    sample_rate: f32,

    attack_step: f32,
    decay_coeff: f32,
    decay_steps_left: i32,
    release_coeff: f32,
    release_steps_left: i32,
}

impl Adsr {
    pub fn new(sample_rate: f32) -> Self {
        let mut adsr = Self {
            stage: AdsrStage::Idle,
            value: 0.0,
            attack_secs: 0.005,
            decay_secs: 0.1,
            sustain: 0.7,
            release_secs: 0.2,
            sample_rate,
            attack_step: 0.0,
            decay_coeff: 0.0,
            decay_steps_left: 0,
            release_coeff: 0.0,
            release_steps_left: 0,
        };
        adsr.recompute();
        adsr
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.recompute();
    }

    pub fn set_times(&mut self, attack_secs: f32, decay_secs: f32, sustain: f32, release_secs: f32) {
        self.attack_secs = attack_secs.max(1e-4);
        self.decay_secs = decay_secs.max(1e-4);
        self.sustain = sustain.clamp(0.0, 1.0);
        self.release_secs = release_secs.max(1e-4);
        self.recompute();
    }

    fn recompute(&mut self) {
        self.attack_step = 1.0 / (self.attack_secs * self.sample_rate).max(1.0);
        self.decay_coeff = exp_coeff(self.decay_secs, self.sample_rate);
        self.release_coeff = exp_coeff(self.release_secs, self.sample_rate);
    }

    /// Start (or retrigger) the envelope from its current value.
    pub fn trigger(&mut self) {
        self.stage = AdsrStage::Attack;
    }

    /// Enter the release segment.
    pub fn release(&mut self) {
        if self.stage != AdsrStage::Idle {
            self.stage = AdsrStage::Release;
            self.release_steps_left = (self.release_secs * self.sample_rate) as i32;
        }
    }

    /// Kill the envelope immediately, for choked notes.
    pub fn choke(&mut self) {
        self.stage = AdsrStage::Idle;
        self.value = 0.0;
    }

    #[inline]
    pub fn stage(&self) -> AdsrStage {
        self.stage
    }

    /// Whether the envelope has fully finished; the owning voice can be
    /// reclaimed once this returns true.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.stage == AdsrStage::Idle
    }

    /// Whether the envelope is past its note-off.
    #[inline]
    pub fn is_released(&self) -> bool {
        matches!(self.stage, AdsrStage::Release | AdsrStage::Idle)
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        match self.stage {
            AdsrStage::Idle => 0.0,
            AdsrStage::Attack => {
                self.value += self.attack_step;
                if self.value >= 1.0 {
                    self.value = 1.0;
                    self.stage = AdsrStage::Decay;
                    self.decay_steps_left = (self.decay_secs * self.sample_rate) as i32;
                }
                self.value
            }
            AdsrStage::Decay => {
                self.value =
                    self.value * self.decay_coeff + self.sustain * (1.0 - self.decay_coeff);
                self.decay_steps_left -= 1;
                if self.decay_steps_left <= 0 {
                    self.value = self.sustain;
                    self.stage = AdsrStage::Sustain;
                }
                self.value
            }
            AdsrStage::Sustain => {
                self.value = self.sustain;
                self.value
            }
            AdsrStage::Release => {
                self.value *= self.release_coeff;
                self.release_steps_left -= 1;
                if self.release_steps_left <= 0 || self.value < 1e-5 {
                    self.value = 0.0;
                    self.stage = AdsrStage::Idle;
                }
                self.value
            }
        }
    }
}

/// Per-sample coefficient reaching 99.99% of the distance to the target over
/// `secs`.
fn exp_coeff(secs: f32, sample_rate: f32) -> f32 {
    let steps = (secs * sample_rate).max(1.0) as f64;
    EXP_TERMINATION.powf(steps.recip()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attack_is_linear_and_on_time() {
        let sample_rate = 48_000.0;
        let mut adsr = Adsr::new(sample_rate);
        adsr.set_times(0.010, 0.1, 0.5, 0.1);
        adsr.trigger();

        let halfway = adsr_run(&mut adsr, (0.005 * sample_rate) as usize);
        assert!((halfway - 0.5).abs() < 0.01, "halfway = {halfway}");
        let top = adsr_run(&mut adsr, (0.005 * sample_rate) as usize);
        assert!(top >= 0.99);
        assert_eq!(adsr.stage(), AdsrStage::Decay);
    }

    #[test]
    fn decay_settles_on_sustain() {
        let mut adsr = Adsr::new(48_000.0);
        adsr.set_times(0.001, 0.050, 0.6, 0.1);
        adsr.trigger();
        let settled = adsr_run(&mut adsr, 48_000 / 10);
        assert_eq!(adsr.stage(), AdsrStage::Sustain);
        assert_eq!(settled, 0.6);
    }

    #[test]
    fn release_reaches_idle() {
        let mut adsr = Adsr::new(48_000.0);
        adsr.set_times(0.001, 0.010, 0.8, 0.020);
        adsr.trigger();
        adsr_run(&mut adsr, 4_800);
        adsr.release();
        assert!(adsr.is_released());
        adsr_run(&mut adsr, (0.021 * 48_000.0) as usize);
        assert!(adsr.is_idle());
        assert_eq!(adsr.next(), 0.0);
    }

    #[test]
    fn choke_is_immediate() {
        let mut adsr = Adsr::new(48_000.0);
        adsr.trigger();
        adsr_run(&mut adsr, 100);
        adsr.choke();
        assert!(adsr.is_idle());
        assert_eq!(adsr.next(), 0.0);
    }

    fn adsr_run(adsr: &mut Adsr, samples: usize) -> f32 {
        let mut v = 0.0;
        for _ in 0..samples {
            v = adsr.next();
        }
        v
    }
}
