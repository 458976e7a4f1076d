//! Audio processor (spec §4.2): sample-accurate, click-free gain ramps for
//! ducking agent audio while the human is speaking.

use std::collections::HashMap;
use va_core::audio::{db_to_gain, gain_to_db};
use va_core::SpeakerId;

/// Shape of the gain transition over the ramp's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampCurve {
    Linear,
    Exponential,
    Logarithmic,
}

impl RampCurve {
    fn shape(self, p: f32) -> f32 {
        match self {
            RampCurve::Linear => p,
            RampCurve::Exponential => p * p,
            RampCurve::Logarithmic => 1.0 - (1.0 - p).powi(2),
        }
    }
}

/// Named attenuation profiles plus an escape hatch for a custom value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DuckingProfile {
    Soft,
    Medium,
    Hard,
    Custom(f32),
}

impl DuckingProfile {
    pub fn reduction_db(self) -> f32 {
        match self {
            DuckingProfile::Soft => -6.0,
            DuckingProfile::Medium => -12.0,
            DuckingProfile::Hard => -18.0,
            DuckingProfile::Custom(db) => db,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AudioProcessorConfig {
    pub profile: DuckingProfile,
    pub curve: RampCurve,
    pub ramp_up_ms: u32,
    pub ramp_down_ms: u32,
    pub sample_rate_hz: u32,
}

impl Default for AudioProcessorConfig {
    fn default() -> Self {
        Self {
            profile: DuckingProfile::Medium,
            curve: RampCurve::Exponential,
            ramp_up_ms: 50,
            ramp_down_ms: 150,
            sample_rate_hz: va_core::audio::DEFAULT_SAMPLE_RATE_HZ,
        }
    }
}

/// Per-channel ramp state (spec §3 `GainRamp`). Linear-domain gains in `[0,1]`.
#[derive(Debug, Clone, Copy)]
struct GainRamp {
    active: bool,
    start_gain: f32,
    target_gain: f32,
    current_gain: f32,
    ramp_samples_total: u64,
    elapsed_samples: u64,
    curve: RampCurve,
}

impl GainRamp {
    fn new() -> Self {
        Self {
            active: false,
            start_gain: 1.0,
            target_gain: 1.0,
            current_gain: 1.0,
            ramp_samples_total: 0,
            elapsed_samples: 0,
            curve: RampCurve::Exponential,
        }
    }

    fn begin(&mut self, target: f32, ramp_samples: u64, curve: RampCurve, immediate: bool) {
        if immediate || ramp_samples == 0 {
            self.current_gain = target;
            self.target_gain = target;
            self.active = false;
            return;
        }
        self.start_gain = self.current_gain;
        self.target_gain = target;
        self.ramp_samples_total = ramp_samples;
        self.elapsed_samples = 0;
        self.curve = curve;
        self.active = true;
    }

    /// Advance by one sample, returning the gain to apply at this position.
    fn step(&mut self) -> f32 {
        if !self.active {
            return self.current_gain;
        }
        let p = (self.elapsed_samples as f32 / self.ramp_samples_total as f32).clamp(0.0, 1.0);
        let shaped = self.curve.shape(p);
        let gain = self.start_gain + (self.target_gain - self.start_gain) * shaped;
        self.current_gain = gain;
        self.elapsed_samples += 1;
        if self.elapsed_samples >= self.ramp_samples_total {
            self.current_gain = self.target_gain;
            self.active = false;
        }
        self.current_gain
    }
}

/// One processor per speaker channel: holds a single [`GainRamp`] and
/// applies it sample-by-sample to 16-bit PCM audio.
pub struct AudioProcessor {
    config: AudioProcessorConfig,
    ramp: GainRamp,
}

impl AudioProcessor {
    pub fn new(config: AudioProcessorConfig) -> Self {
        Self {
            config,
            ramp: GainRamp::new(),
        }
    }

    fn ramp_samples(&self, ms: u32) -> u64 {
        (self.config.sample_rate_hz as u64 * ms as u64) / 1000
    }

    pub fn start_ducking(&mut self, immediate: bool) {
        let target = db_to_gain(self.config.profile.reduction_db());
        let samples = self.ramp_samples(self.config.ramp_up_ms);
        self.ramp.begin(target, samples, self.config.curve, immediate);
    }

    pub fn stop_ducking(&mut self, immediate: bool) {
        let samples = self.ramp_samples(self.config.ramp_down_ms);
        self.ramp.begin(1.0, samples, self.config.curve, immediate);
    }

    pub fn is_ducking(&self) -> bool {
        self.ramp.current_gain < 0.99 || self.ramp.target_gain < 0.99
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp.active
    }

    pub fn current_gain(&self) -> f32 {
        self.ramp.current_gain
    }

    pub fn current_gain_db(&self) -> f32 {
        gain_to_db(self.ramp.current_gain)
    }

    /// Apply the channel's gain to little-endian PCM16 `buffer`, sample by
    /// sample. Returns a new buffer of identical length; a trailing odd
    /// byte is copied through unchanged.
    pub fn process(&mut self, buffer: &[u8]) -> Vec<u8> {
        if !self.ramp.active && self.ramp.current_gain == 1.0 {
            return buffer.to_vec();
        }

        let mut out = Vec::with_capacity(buffer.len());
        let mut chunks = buffer.chunks_exact(2);
        for chunk in &mut chunks {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            let gain = self.ramp.step();
            let scaled = (sample as f32 * gain).round();
            let clamped = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            out.extend_from_slice(&clamped.to_le_bytes());
        }
        let remainder = chunks.remainder();
        out.extend_from_slice(remainder);
        out
    }
}

/// Maps [`SpeakerId`] to its own [`AudioProcessor`], created lazily on
/// first use (spec §4.2 "multi-channel façade").
pub struct AudioProcessorBank {
    config: AudioProcessorConfig,
    channels: HashMap<SpeakerId, AudioProcessor>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStatus {
    pub ducking: bool,
    pub gain: f32,
    pub gain_db: f32,
}

impl AudioProcessorBank {
    pub fn new(config: AudioProcessorConfig) -> Self {
        Self {
            config,
            channels: HashMap::new(),
        }
    }

    fn channel(&mut self, speaker: SpeakerId) -> &mut AudioProcessor {
        self.channels
            .entry(speaker)
            .or_insert_with(|| AudioProcessor::new(self.config))
    }

    pub fn start_ducking(&mut self, speakers: &[SpeakerId], immediate: bool) {
        for &s in speakers {
            self.channel(s).start_ducking(immediate);
        }
    }

    pub fn stop_ducking(&mut self, speakers: &[SpeakerId], immediate: bool) {
        for &s in speakers {
            self.channel(s).stop_ducking(immediate);
        }
    }

    pub fn process(&mut self, speaker: SpeakerId, buffer: &[u8]) -> Vec<u8> {
        self.channel(speaker).process(buffer)
    }

    pub fn status(&self) -> HashMap<SpeakerId, ChannelStatus> {
        self.channels
            .iter()
            .map(|(&speaker, proc)| {
                (
                    speaker,
                    ChannelStatus {
                        ducking: proc.is_ducking(),
                        gain: proc.current_gain(),
                        gain_db: proc.current_gain_db(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use va_core::audio::rms;

    fn constant_tone(samples: usize, amplitude: f32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let v = if i % 2 == 0 { amplitude } else { -amplitude };
            let s = (v * 32767.0) as i16;
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }

    fn buffer_rms(buffer: &[u8]) -> f32 {
        let samples: Vec<f32> = buffer
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect();
        rms(&samples)
    }

    #[test]
    fn unity_gain_passes_through_unchanged() {
        let mut p = AudioProcessor::new(AudioProcessorConfig::default());
        let input = constant_tone(480, 0.5);
        let output = p.process(&input);
        assert_eq!(input, output);
    }

    #[test]
    fn trailing_odd_byte_is_copied_through() {
        let mut p = AudioProcessor::new(AudioProcessorConfig::default());
        p.start_ducking(true);
        let mut input = constant_tone(10, 0.5);
        input.push(0x42);
        let output = p.process(&input);
        assert_eq!(output.len(), input.len());
        assert_eq!(*output.last().unwrap(), 0x42);
    }

    #[test]
    fn immediate_ducking_applies_target_gain_at_once() {
        let mut p = AudioProcessor::new(AudioProcessorConfig::default());
        p.start_ducking(true);
        assert!(!p.is_ramping());
        let expected_gain = db_to_gain(DuckingProfile::Medium.reduction_db());
        assert_relative_eq!(p.current_gain(), expected_gain, epsilon = 1e-6);
    }

    #[test]
    fn ramped_ducking_reduces_output_rms() {
        let mut p = AudioProcessor::new(AudioProcessorConfig::default());
        let input = constant_tone(48_000, 0.5); // 1 second at 48kHz
        let baseline = buffer_rms(&p.process(&input));

        let mut ducked = AudioProcessor::new(AudioProcessorConfig::default());
        ducked.start_ducking(false);
        let output = ducked.process(&input);
        let ducked_rms = buffer_rms(&output);

        assert!(ducked_rms < baseline, "{ducked_rms} should be < {baseline}");
    }

    #[test]
    fn gain_to_db_round_trips() {
        for db in [-60.0, -30.0, -12.0, -6.0, 0.0_f32] {
            let gain = db_to_gain(db);
            assert_relative_eq!(gain_to_db(gain), db, epsilon = 1e-4);
        }
    }

    #[test]
    fn bank_lazily_creates_channels_and_reports_status() {
        let mut bank = AudioProcessorBank::new(AudioProcessorConfig::default());
        bank.start_ducking(&[SpeakerId::Host, SpeakerId::Guest], true);
        let status = bank.status();
        assert_eq!(status.len(), 2);
        assert!(status[&SpeakerId::Host].ducking);
    }
}
