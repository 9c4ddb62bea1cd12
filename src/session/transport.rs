//! The tempo clock. Beats are musical time; `seconds = beats · 60 / bpm`.

use super::clip::Quantize;

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 999.0;

/// The span of musical time covered by one audio block, on the unwrapped
/// timeline: `to` may exceed the loop length, with `wrapped_by` telling
/// listeners how much got subtracted from the stored playhead afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockSpan {
    pub from: f64,
    pub to: f64,
    pub wrapped_by: f64,
}

#[derive(Debug, Clone)]
pub struct Transport {
    bpm: f64,
    playing: bool,
    playhead_beat: f64,
    quantize: Quantize,
    sample_rate: f64,
    loop_enabled: bool,
}

impl Transport {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            bpm: 120.0,
            playing: false,
            playhead_beat: 0.0,
            quantize: Quantize::Quarter,
            sample_rate: sample_rate as f64,
            loop_enabled: true,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate as f64;
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_quantize(&mut self, quantize: Quantize) {
        self.quantize = quantize;
    }

    pub fn quantize(&self) -> Quantize {
        self.quantize
    }

    pub fn playing(&self) -> bool {
        self.playing
    }

    pub fn playhead_beat(&self) -> f64 {
        self.playhead_beat
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_enabled = !self.loop_enabled;
        self.loop_enabled
    }

    /// Start from the top.
    pub fn play(&mut self) {
        self.playing = true;
        self.playhead_beat = 0.0;
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.playhead_beat = 0.0;
    }

    /// Musical length of one sample.
    #[inline]
    pub fn beats_per_sample(&self) -> f64 {
        self.bpm / (60.0 * self.sample_rate)
    }

    /// Convert a span of beats to (fractional) samples at the current tempo.
    #[inline]
    pub fn beats_to_samples(&self, beats: f64) -> f64 {
        beats * 60.0 / self.bpm * self.sample_rate
    }

    /// The next quantize boundary at or after the playhead.
    pub fn next_boundary(&self) -> f64 {
        self.quantize.next_boundary(self.playhead_beat)
    }

    /// Advance the playhead by one block and wrap it against `loop_length`.
    /// When stopped the playhead holds still and the span is empty.
    pub fn advance(&mut self, frames: usize, loop_length: f64) -> BlockSpan {
        let from = self.playhead_beat;
        if !self.playing || frames == 0 {
            return BlockSpan {
                from,
                to: from,
                wrapped_by: 0.0,
            };
        }

        let to = from + frames as f64 * self.beats_per_sample();

        let mut wrapped_by = 0.0;
        let mut playhead = to;
        if loop_length > 0.0 {
            while playhead >= loop_length {
                playhead -= loop_length;
                wrapped_by += loop_length;
            }
        }
        self.playhead_beat = playhead;

        BlockSpan {
            from,
            to,
            wrapped_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bpm_is_clamped() {
        let mut transport = Transport::new(48_000.0);
        transport.set_bpm(5.0);
        assert_eq!(transport.bpm(), MIN_BPM);
        transport.set_bpm(2_000.0);
        assert_eq!(transport.bpm(), MAX_BPM);
    }

    #[test]
    fn advance_matches_the_beat_formula() {
        let mut transport = Transport::new(48_000.0);
        transport.set_bpm(120.0);
        transport.play();

        // 480 frames at 120 bpm / 48 kHz = 480 * 120 / (60 * 48000) beats
        let span = transport.advance(480, 1_000.0);
        assert_relative_eq!(span.to - span.from, 0.02, epsilon = 1e-9);
        assert_relative_eq!(transport.playhead_beat(), 0.02, epsilon = 1e-9);
    }

    #[test]
    fn playhead_wraps_at_loop_length() {
        let mut transport = Transport::new(48_000.0);
        transport.set_bpm(120.0);
        transport.play();

        // Almost a full 4-beat loop, then step across the wrap
        transport.advance(95_000, 4.0);
        let span = transport.advance(2_000, 4.0);
        assert!(span.to > 4.0);
        assert_relative_eq!(span.wrapped_by, 4.0);
        assert!(transport.playhead_beat() < 4.0);
        assert_relative_eq!(
            transport.playhead_beat(),
            span.to - 4.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn zero_frames_is_a_no_op() {
        let mut transport = Transport::new(48_000.0);
        transport.play();
        transport.advance(1_000, 8.0);
        let before = transport.playhead_beat();
        let span = transport.advance(0, 8.0);
        assert_eq!(span.from, span.to);
        assert_eq!(transport.playhead_beat(), before);
    }
}
