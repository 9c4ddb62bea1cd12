//! Decimation filter coefficients for the oversampler.
//!
//! 31-tap halfband lowpass, Kaiser-windowed sinc designed for ≈90 dB stopband
//! attenuation with the transition band centered on a quarter of the inner
//! rate. Being a halfband, every odd tap except the center vanishes, which is
//! what makes the polyphase split in the decimator worthwhile.

pub const LP_FIR_HALFBAND_LEN: usize = 31;

#[allow(clippy::excessive_precision)]
pub const LP_FIR_HALFBAND: [f32; LP_FIR_HALFBAND_LEN] = [
    -2.0163935481e-05,
    0.0,
    3.9600582015e-04,
    0.0,
    -2.0090931937e-03,
    0.0,
    6.6164193134e-03,
    0.0,
    -1.7205130370e-02,
    0.0,
    3.9314644866e-02,
    0.0,
    -8.9471285055e-02,
    0.0,
    3.1238232687e-01,
    4.9999255138e-01,
    3.1238232687e-01,
    0.0,
    -8.9471285055e-02,
    0.0,
    3.9314644866e-02,
    0.0,
    -1.7205130370e-02,
    0.0,
    6.6164193134e-03,
    0.0,
    -2.0090931937e-03,
    0.0,
    3.9600582015e-04,
    0.0,
    -2.0163935481e-05,
];

/// The even-index taps (`h[0], h[2], …, h[30]`), the only nonzero phase apart
/// from the center tap.
#[allow(clippy::excessive_precision)]
pub const LP_FIR_HALFBAND_EVEN: [f32; 16] = [
    -2.0163935481e-05,
    3.9600582015e-04,
    -2.0090931937e-03,
    6.6164193134e-03,
    -1.7205130370e-02,
    3.9314644866e-02,
    -8.9471285055e-02,
    3.1238232687e-01,
    3.1238232687e-01,
    -8.9471285055e-02,
    3.9314644866e-02,
    -1.7205130370e-02,
    6.6164193134e-03,
    -2.0090931937e-03,
    3.9600582015e-04,
    -2.0163935481e-05,
];

/// The center tap `h[15]`.
#[allow(clippy::excessive_precision)]
pub const LP_FIR_HALFBAND_CENTER: f32 = 4.9999255138e-01;

/// Delay (in opposite-parity samples) of the center tap inside the polyphase
/// decimator: `(LEN / 2 - 1) / 2`.
pub const LP_FIR_HALFBAND_CENTER_DELAY: usize = 7;
